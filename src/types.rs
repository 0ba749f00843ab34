//! Core data model: storage targets, catalog files, scans, change events, and
//! checkpoints. These mirror the rows in `catalog::schema` one-to-one; the
//! `catalog` repositories are what translate between them and SQL.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub type TargetId = i64;
pub type FileId = i64;
pub type ScanId = i64;

/// A root filesystem location this crate monitors. `local` is the only kind
/// this crate walks directly; `nfs`/`smb` targets are mounted first by the
/// surrounding deployment and walked as ordinary local paths from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageTarget {
    pub id: TargetId,
    pub name: String,
    pub kind: TargetKind,
    pub root_path: PathBuf,
    pub server: Option<String>,
    pub share: Option<String>,
    pub credential_ref: Option<String>,
    pub enabled: bool,
    pub tuning: TargetTuning,
    pub schedule_cron: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    Local,
    Nfs,
    Smb,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Local => "local",
            TargetKind::Nfs => "nfs",
            TargetKind::Smb => "smb",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(TargetKind::Local),
            "nfs" => Some(TargetKind::Nfs),
            "smb" => Some(TargetKind::Smb),
            _ => None,
        }
    }
}

/// Per-target tuning knobs, loaded from config (see [`crate::config`]) and
/// carried on the target row so a scan in progress is reproducible from the
/// catalog alone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetTuning {
    pub parallel_workers: usize,
    pub random_sample_percent: u8,
    pub checksum_algorithm: crate::checksum::ChecksumAlgorithm,
    pub checkpoint_interval: usize,
    pub batch_size: usize,
    pub large_change: LargeChangeThresholds,
}

impl Default for TargetTuning {
    fn default() -> Self {
        TargetTuning {
            parallel_workers: 4,
            random_sample_percent: 5,
            checksum_algorithm: crate::checksum::ChecksumAlgorithm::Blake3,
            checkpoint_interval: 500,
            batch_size: 500,
            large_change: LargeChangeThresholds::default(),
        }
    }
}

/// Large-change thresholds; any one of the three, if set, can independently
/// trip the detector. `None` means that axis is not evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LargeChangeThresholds {
    pub count: Option<i64>,
    pub percent: Option<f64>,
    pub bytes: Option<i64>,
}

/// A catalog record for one path beneath a target's root. Deletion is a
/// tombstone (`deleted_at` set), never a row delete, so history (change
/// events referencing `file_id`) stays intact.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub id: FileId,
    pub storage_target_id: TargetId,
    pub path: PathBuf,
    pub size: u64,
    pub mtime: i64,
    pub first_seen: i64,
    pub last_seen: i64,
    pub current_checksum: Option<String>,
    pub checksum_type: Option<crate::checksum::ChecksumAlgorithm>,
    pub last_checksummed_at: Option<i64>,
    pub deleted_at: Option<i64>,
}

impl File {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// One run of the scan-and-reconcile pipeline against a single target.
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    pub id: ScanId,
    pub storage_target_id: TargetId,
    pub status: ScanStatus,
    pub counters: ScanCounters,
    pub error_messages: Vec<String>,
    pub is_large_change: bool,
    pub resumed_from: Option<ScanId>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Partial,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Partial => "partial",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScanStatus::Pending),
            "running" => Some(ScanStatus::Running),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            "partial" => Some(ScanStatus::Partial),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Partial
        )
    }
}

/// Running tallies for a scan. `deleted_or_modified_old_bytes` feeds the
/// bytes axis of the large-change detector; it sums `old_size` across
/// deleted and modified files, not the new size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCounters {
    pub files_scanned: i64,
    pub files_added: i64,
    pub files_deleted: i64,
    pub files_modified: i64,
    pub files_verified: i64,
    pub errors_count: i64,
    pub deleted_or_modified_old_bytes: i64,
}

impl ScanCounters {
    pub fn changed(&self) -> i64 {
        self.files_deleted + self.files_modified
    }
}

/// A single detected change, append-only and ordered by `id` within a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub id: i64,
    pub scan_id: ScanId,
    pub file_id: FileId,
    pub path: PathBuf,
    pub kind: ChangeEventKind,
    pub occurred_at: i64,
}

/// Tagged sum rather than a row of nullable before/after columns, per the
/// redesign note: each variant only carries the fields that make sense for
/// it, so a `Verified` event can't accidentally be read as "nothing changed
/// but we also have stale old_checksum/new_checksum values."
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEventKind {
    Added {
        new_checksum: String,
        new_size: u64,
    },
    Modified {
        old_checksum: Option<String>,
        new_checksum: String,
        old_size: u64,
        new_size: u64,
    },
    Deleted {
        old_checksum: Option<String>,
        old_size: u64,
    },
    Verified {
        checksum: String,
    },
}

impl ChangeEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeEventKind::Added { .. } => "added",
            ChangeEventKind::Modified { .. } => "modified",
            ChangeEventKind::Deleted { .. } => "deleted",
            ChangeEventKind::Verified { .. } => "verified",
        }
    }
}

/// Durable progress marker for one scan, updated every `checkpoint_interval`
/// files processed (and on graceful cancellation) so a crashed or cancelled
/// scan can resume from `last_processed_path` instead of the walk root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCheckpoint {
    pub scan_id: ScanId,
    pub last_processed_path: PathBuf,
    pub files_processed: i64,
}
