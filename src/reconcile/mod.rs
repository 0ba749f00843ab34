//! Reconciler: merges the walker's record stream with the worker pool's
//! checksum results into catalog writes and change events.
//!
//! Drains both channels concurrently with `crossbeam_channel::Select` into
//! a true merge, rather than draining the walk first and joining the pool
//! after — a good portion of records need a round trip through the
//! checksum pool before they can be reconciled, so waiting for the walk to
//! finish first would throw away the parallelism the pool exists for.

pub mod large_change;
pub mod sampling;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File as StdFile;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::Select;

use crate::catalog::Catalog;
use crate::error::FixityError;
use crate::pool::{ChecksumJob, ChecksumResult, WorkerPool};
use crate::types::{ChangeEvent, ChangeEventKind, File, ScanCounters, ScanId, StorageTarget};
use crate::walk::{self, WalkEvent};

pub struct ReconcileOutcome {
    pub counters: ScanCounters,
    pub cancelled: bool,
}

/// What to do once a path's checksum (if any) is known.
enum PendingAction {
    Added,
    MetadataChanged { old: File },
    SampleVerify { old: File },
}

struct PendingWork {
    seq: u64,
    size: u64,
    mtime: i64,
    action: PendingAction,
}

/// Tracks completion of walker records under out-of-order checksum
/// resolution, advancing `last_processed_path` only once every record
/// before it in walk order has also finished — the reorder-buffer
/// generalization of "correlate checksum results by path" needed so
/// checkpoints never regress (see SPEC_FULL.md §4.4).
struct CheckpointTracker {
    next_seq: u64,
    completed_ahead: BTreeSet<u64>,
    path_by_seq: HashMap<u64, PathBuf>,
    frontier_path: Option<PathBuf>,
    frontier_count: i64,
}

impl CheckpointTracker {
    fn new() -> Self {
        CheckpointTracker {
            next_seq: 0,
            completed_ahead: BTreeSet::new(),
            path_by_seq: HashMap::new(),
            frontier_path: None,
            frontier_count: 0,
        }
    }

    fn register(&mut self, seq: u64, path: PathBuf) {
        self.path_by_seq.insert(seq, path);
    }

    /// Advances the contiguous frontier as far as completions allow.
    fn complete(&mut self, seq: u64) {
        if seq != self.next_seq {
            self.completed_ahead.insert(seq);
            return;
        }
        let mut advanced = self.path_by_seq.remove(&seq);
        self.next_seq += 1;
        self.frontier_count += 1;
        while self.completed_ahead.remove(&self.next_seq) {
            advanced = self.path_by_seq.remove(&self.next_seq);
            self.next_seq += 1;
            self.frontier_count += 1;
        }
        if advanced.is_some() {
            self.frontier_path = advanced;
        }
    }
}

enum Progress {
    Entry(WalkEvent),
    WalkClosed,
    HandledResult,
    Idle,
}

/// Runs one scan's worth of reconciliation against `target`, starting from
/// `resume_from` (the prior checkpoint's `last_processed_path`, if any).
/// `now` is applied uniformly to every row/event this scan produces — this
/// crate timestamps at scan granularity, not per-entry.
pub fn run(
    catalog: &Catalog,
    target: &StorageTarget,
    scan_id: ScanId,
    scan_started_at: i64,
    resume_from: Option<PathBuf>,
    now: i64,
    cancel: &AtomicBool,
) -> Result<ReconcileOutcome, FixityError> {
    let tuning = &target.tuning;
    let active_before = catalog.count_active(target.id)?;
    let sample_target_size = sampling::sample_size(active_before, tuning.random_sample_percent);
    let sample_set: HashSet<PathBuf> = catalog
        .sample_for_verification(target.id, sample_target_size.max(0) as usize)?
        .into_iter()
        .collect();

    let mut walk = Some(walk::walk(&target.root_path, resume_from)?);
    let mut pool = WorkerPool::new(tuning.parallel_workers);

    let mut tracker = CheckpointTracker::new();
    let mut pending: HashMap<PathBuf, PendingWork> = HashMap::new();
    let mut next_seq = 0u64;

    let mut batch_events: Vec<ChangeEvent> = Vec::new();
    let mut batch_counters = ScanCounters::default();
    let mut files_since_checkpoint: i64 = 0;
    let mut cancelled = false;

    loop {
        if walk.is_none() && pending.is_empty() {
            break;
        }
        if cancel.load(Ordering::Relaxed) && !cancelled {
            cancelled = true;
            walk = None; // stop pulling new entries; drain what's already in flight
        }

        let progress = if let Some(w) = walk.as_ref() {
            let mut select = Select::new();
            let walk_idx = select.recv(&w.events);
            let pool_idx = select.recv(pool.results());
            let op = select.select();
            if op.index() == walk_idx {
                match op.recv(&w.events) {
                    Ok(event) => Progress::Entry(event),
                    Err(_) => Progress::WalkClosed,
                }
            } else {
                debug_assert_eq!(op.index(), pool_idx);
                let result = op
                    .recv(pool.results())
                    .expect("pool result sender outlives this loop");
                handle_checksum_result(
                    catalog,
                    target,
                    scan_id,
                    now,
                    result,
                    &mut pending,
                    &mut tracker,
                    &mut batch_events,
                    &mut batch_counters,
                )?;
                Progress::HandledResult
            }
        } else if !pending.is_empty() {
            let result = pool.results().recv().map_err(|_| FixityError::Cancelled)?;
            handle_checksum_result(
                catalog,
                target,
                scan_id,
                now,
                result,
                &mut pending,
                &mut tracker,
                &mut batch_events,
                &mut batch_counters,
            )?;
            Progress::HandledResult
        } else {
            Progress::Idle
        };

        match progress {
            Progress::WalkClosed => walk = None,
            Progress::Entry(WalkEvent::Entry(record)) => {
                let seq = next_seq;
                next_seq += 1;
                tracker.register(seq, record.path.clone());
                process_walk_record(
                    catalog,
                    target,
                    seq,
                    record.path,
                    record.size,
                    record.mtime_unix,
                    now,
                    &sample_set,
                    &mut pool,
                    &mut pending,
                    &mut tracker,
                    &mut batch_counters,
                )?;
            }
            Progress::Entry(WalkEvent::EntryError { path, message }) => {
                batch_counters.errors_count += 1;
                let label = path
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "<unknown path>".to_string());
                catalog.append_error(scan_id, &format!("{label}: {message}"))?;
            }
            Progress::HandledResult | Progress::Idle => {}
        }

        if batch_counters.files_scanned as usize >= tuning.batch_size {
            flush(
                catalog,
                scan_id,
                &mut batch_events,
                &mut batch_counters,
                &mut files_since_checkpoint,
                tuning.checkpoint_interval as i64,
                &tracker,
            )?;
        }
    }

    pool.stop();

    flush(
        catalog,
        scan_id,
        &mut batch_events,
        &mut batch_counters,
        &mut files_since_checkpoint,
        0, // force the final checkpoint write regardless of interval
        &tracker,
    )?;

    let mut total_counters = catalog.get_scan(scan_id)?.counters;

    if !cancelled {
        let deleted = catalog.sweep_deleted(target.id, scan_started_at, now)?;
        if !deleted.is_empty() {
            let mut delete_events = Vec::with_capacity(deleted.len());
            let mut delta = ScanCounters::default();
            for file in &deleted {
                delta.files_deleted += 1;
                delta.deleted_or_modified_old_bytes += file.size as i64;
                delete_events.push(ChangeEvent {
                    id: 0,
                    scan_id,
                    file_id: file.id,
                    path: file.path.clone(),
                    kind: ChangeEventKind::Deleted {
                        old_checksum: file.current_checksum.clone(),
                        old_size: file.size,
                    },
                    occurred_at: now,
                });
            }
            catalog.append_change_events(&delete_events)?;
            catalog.apply_counter_delta(scan_id, &delta)?;
            total_counters = catalog.get_scan(scan_id)?.counters;
        }
        catalog.delete_checkpoint(scan_id)?;
    }

    Ok(ReconcileOutcome {
        counters: total_counters,
        cancelled,
    })
}

#[allow(clippy::too_many_arguments)]
fn process_walk_record(
    catalog: &Catalog,
    target: &StorageTarget,
    seq: u64,
    path: PathBuf,
    size: u64,
    mtime: i64,
    now: i64,
    sample_set: &HashSet<PathBuf>,
    pool: &mut WorkerPool,
    pending: &mut HashMap<PathBuf, PendingWork>,
    tracker: &mut CheckpointTracker,
    batch_counters: &mut ScanCounters,
) -> Result<(), FixityError> {
    let existing = catalog.get_file(target.id, &path)?;

    let action = match existing {
        None => Some(PendingAction::Added),
        Some(ref f) if !f.is_live() => Some(PendingAction::Added),
        Some(ref f) if f.size != size || f.mtime != mtime => {
            Some(PendingAction::MetadataChanged { old: f.clone() })
        }
        Some(ref f) if sample_set.contains(&path) => Some(PendingAction::SampleVerify { old: f.clone() }),
        Some(_) => None,
    };

    batch_counters.files_scanned += 1;

    match action {
        None => {
            catalog.touch_last_seen(target.id, &path, now)?;
            // Fully reconciled without a checksum round trip: the frontier
            // can advance past this record right away.
            tracker.complete(seq);
            Ok(())
        }
        Some(action) => {
            let algorithm = target.tuning.checksum_algorithm;
            let abs_path = target.root_path.join(&path);
            pending.insert(
                path.clone(),
                PendingWork {
                    seq,
                    size,
                    mtime,
                    action,
                },
            );
            pool.submit(ChecksumJob::new(path, algorithm, move || {
                Ok(Box::new(StdFile::open(&abs_path)?) as Box<dyn std::io::Read + Send>)
            }))
            .map_err(|_| FixityError::Cancelled)?;
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_checksum_result(
    catalog: &Catalog,
    target: &StorageTarget,
    scan_id: ScanId,
    now: i64,
    result: ChecksumResult,
    pending: &mut HashMap<PathBuf, PendingWork>,
    tracker: &mut CheckpointTracker,
    batch_events: &mut Vec<ChangeEvent>,
    batch_counters: &mut ScanCounters,
) -> Result<(), FixityError> {
    let Some(work) = pending.remove(&result.path) else {
        return Ok(());
    };

    if let Some(message) = result.error {
        batch_counters.errors_count += 1;
        catalog.append_error(scan_id, &format!("{}: {message}", result.path.display()))?;
        tracker.complete(work.seq);
        return Ok(());
    }
    let digest = result.digest.expect("digest present when error is absent");

    match work.action {
        PendingAction::Added => {
            let file_id = catalog.upsert_live_file(
                target.id,
                &result.path,
                work.size,
                work.mtime,
                &digest,
                target.tuning.checksum_algorithm,
                now,
            )?;
            batch_counters.files_added += 1;
            batch_events.push(ChangeEvent {
                id: 0,
                scan_id,
                file_id,
                path: result.path,
                kind: ChangeEventKind::Added {
                    new_checksum: digest,
                    new_size: work.size,
                },
                occurred_at: now,
            });
        }
        PendingAction::MetadataChanged { old } => {
            let file_id = catalog.upsert_live_file(
                target.id,
                &result.path,
                work.size,
                work.mtime,
                &digest,
                target.tuning.checksum_algorithm,
                now,
            )?;
            batch_counters.files_modified += 1;
            batch_counters.deleted_or_modified_old_bytes += old.size as i64;
            batch_events.push(ChangeEvent {
                id: 0,
                scan_id,
                file_id,
                path: result.path,
                kind: ChangeEventKind::Modified {
                    old_checksum: old.current_checksum,
                    new_checksum: digest,
                    old_size: old.size,
                    new_size: work.size,
                },
                occurred_at: now,
            });
        }
        PendingAction::SampleVerify { old } => {
            let file_id = catalog.upsert_live_file(
                target.id,
                &result.path,
                work.size,
                work.mtime,
                &digest,
                target.tuning.checksum_algorithm,
                now,
            )?;
            if old.current_checksum.as_deref() == Some(digest.as_str()) {
                batch_counters.files_verified += 1;
                batch_events.push(ChangeEvent {
                    id: 0,
                    scan_id,
                    file_id,
                    path: result.path,
                    kind: ChangeEventKind::Verified { checksum: digest },
                    occurred_at: now,
                });
            } else {
                // Same size, different content: a silent change the
                // metadata-only check would have missed.
                batch_counters.files_modified += 1;
                batch_counters.deleted_or_modified_old_bytes += old.size as i64;
                batch_events.push(ChangeEvent {
                    id: 0,
                    scan_id,
                    file_id,
                    path: result.path,
                    kind: ChangeEventKind::Modified {
                        old_checksum: old.current_checksum,
                        new_checksum: digest,
                        old_size: old.size,
                        new_size: work.size,
                    },
                    occurred_at: now,
                });
            }
        }
    }

    tracker.complete(work.seq);
    Ok(())
}

fn flush(
    catalog: &Catalog,
    scan_id: ScanId,
    batch_events: &mut Vec<ChangeEvent>,
    batch_counters: &mut ScanCounters,
    files_since_checkpoint: &mut i64,
    checkpoint_interval: i64,
    tracker: &CheckpointTracker,
) -> Result<(), FixityError> {
    if !batch_events.is_empty() || *batch_counters != ScanCounters::default() {
        match catalog.append_change_events(batch_events) {
            Ok(()) => {
                catalog.apply_counter_delta(scan_id, batch_counters)?;
            }
            Err(FixityError::CatalogUnavailable(e)) => return Err(FixityError::CatalogUnavailable(e)),
            Err(other) => {
                catalog.append_error(scan_id, &format!("batch commit failed: {other}"))?;
            }
        }
        batch_events.clear();
        *batch_counters = ScanCounters::default();
    }
    maybe_write_checkpoint(catalog, scan_id, files_since_checkpoint, checkpoint_interval, tracker)
}

fn maybe_write_checkpoint(
    catalog: &Catalog,
    scan_id: ScanId,
    files_since_checkpoint: &mut i64,
    checkpoint_interval: i64,
    tracker: &CheckpointTracker,
) -> Result<(), FixityError> {
    let Some(path) = tracker.frontier_path.as_ref() else {
        return Ok(());
    };
    if tracker.frontier_count - *files_since_checkpoint >= checkpoint_interval || checkpoint_interval == 0 {
        catalog.upsert_checkpoint(scan_id, path, tracker.frontier_count)?;
        *files_since_checkpoint = tracker.frontier_count;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_tracker_holds_back_the_frontier_until_contiguous() {
        let mut tracker = CheckpointTracker::new();
        tracker.register(0, PathBuf::from("a"));
        tracker.register(1, PathBuf::from("b"));
        tracker.register(2, PathBuf::from("c"));

        // seq 2 finishes first (out of order): frontier cannot move yet.
        tracker.complete(2);
        assert_eq!(tracker.frontier_path, None);

        // seq 0 finishes: frontier advances to "a" only.
        tracker.complete(0);
        assert_eq!(tracker.frontier_path, Some(PathBuf::from("a")));

        // seq 1 finishes: frontier can now jump straight to "c" since 2 was
        // already done.
        tracker.complete(1);
        assert_eq!(tracker.frontier_path, Some(PathBuf::from("c")));
        assert_eq!(tracker.frontier_count, 3);
    }

    #[test]
    fn checkpoint_tracker_in_order_completion_advances_every_step() {
        let mut tracker = CheckpointTracker::new();
        for i in 0..3 {
            tracker.register(i, PathBuf::from(format!("p{i}")));
        }
        tracker.complete(0);
        assert_eq!(tracker.frontier_path, Some(PathBuf::from("p0")));
        tracker.complete(1);
        assert_eq!(tracker.frontier_path, Some(PathBuf::from("p1")));
        tracker.complete(2);
        assert_eq!(tracker.frontier_path, Some(PathBuf::from("p2")));
    }
}
