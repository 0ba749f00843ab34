//! Repository for `storage_targets`.

use rusqlite::params;

use crate::checksum::ChecksumAlgorithm;
use crate::error::{CatalogError, FixityError};
use crate::types::{LargeChangeThresholds, StorageTarget, TargetId, TargetKind, TargetTuning};

use super::Catalog;

impl Catalog {
    pub fn get_target(&self, id: TargetId) -> Result<StorageTarget, FixityError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, kind, root_path, server, share, credential_ref, enabled, \
             parallel_workers, random_sample_percent, checksum_algorithm, checkpoint_interval, \
             batch_size, large_change_threshold_count, large_change_threshold_percent, \
             large_change_threshold_bytes, schedule_cron, created_at, updated_at \
             FROM storage_targets WHERE id = ?1",
            params![id],
            row_to_target,
        )
        .map_err(|e| FixityError::from(CatalogError::from(e)))
    }

    pub fn list_enabled_targets(&self) -> Result<Vec<StorageTarget>, FixityError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, kind, root_path, server, share, credential_ref, enabled, \
                 parallel_workers, random_sample_percent, checksum_algorithm, checkpoint_interval, \
                 batch_size, large_change_threshold_count, large_change_threshold_percent, \
                 large_change_threshold_bytes, schedule_cron, created_at, updated_at \
                 FROM storage_targets WHERE enabled = 1 ORDER BY id",
            )
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        let rows = stmt
            .query_map([], row_to_target)
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| FixityError::from(CatalogError::from(e)))?);
        }
        Ok(out)
    }

    pub fn insert_target(&self, target: &NewStorageTarget, now: i64) -> Result<TargetId, FixityError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO storage_targets (\
                name, kind, root_path, server, share, credential_ref, enabled, \
                parallel_workers, random_sample_percent, checksum_algorithm, checkpoint_interval, \
                batch_size, large_change_threshold_count, large_change_threshold_percent, \
                large_change_threshold_bytes, schedule_cron, created_at, updated_at\
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?17)",
            params![
                target.name,
                target.kind.as_str(),
                target.root_path.to_string_lossy(),
                target.server,
                target.share,
                target.credential_ref,
                target.enabled as i64,
                target.tuning.parallel_workers as i64,
                target.tuning.random_sample_percent as i64,
                target.tuning.checksum_algorithm.as_str(),
                target.tuning.checkpoint_interval as i64,
                target.tuning.batch_size as i64,
                target.tuning.large_change.count,
                target.tuning.large_change.percent,
                target.tuning.large_change.bytes,
                target.schedule_cron,
                now,
            ],
        )
        .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        Ok(conn.last_insert_rowid())
    }
}

/// Fields needed to create a target; `id`/`created_at`/`updated_at` are
/// assigned by the catalog.
pub struct NewStorageTarget {
    pub name: String,
    pub kind: TargetKind,
    pub root_path: std::path::PathBuf,
    pub server: Option<String>,
    pub share: Option<String>,
    pub credential_ref: Option<String>,
    pub enabled: bool,
    pub tuning: TargetTuning,
    pub schedule_cron: Option<String>,
}

fn row_to_target(row: &rusqlite::Row) -> rusqlite::Result<StorageTarget> {
    let kind_str: String = row.get(2)?;
    let checksum_str: String = row.get(10)?;
    Ok(StorageTarget {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: TargetKind::parse(&kind_str).unwrap_or(TargetKind::Local),
        root_path: std::path::PathBuf::from(row.get::<_, String>(3)?),
        server: row.get(4)?,
        share: row.get(5)?,
        credential_ref: row.get(6)?,
        enabled: row.get::<_, i64>(7)? != 0,
        tuning: TargetTuning {
            parallel_workers: row.get::<_, i64>(8)? as usize,
            random_sample_percent: row.get::<_, i64>(9)? as u8,
            checksum_algorithm: ChecksumAlgorithm::parse(&checksum_str)
                .unwrap_or(ChecksumAlgorithm::Blake3),
            checkpoint_interval: row.get::<_, i64>(11)? as usize,
            batch_size: row.get::<_, i64>(12)? as usize,
            large_change: LargeChangeThresholds {
                count: row.get(13)?,
                percent: row.get(14)?,
                bytes: row.get(15)?,
            },
        },
        schedule_cron: row.get(16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}
