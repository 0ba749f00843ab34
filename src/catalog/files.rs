//! Repository for `files`: the live/tombstoned record of every path a
//! target's walk has ever observed.

use std::path::{Path, PathBuf};

use rusqlite::{OptionalExtension, params};

use crate::checksum::ChecksumAlgorithm;
use crate::error::{CatalogError, FixityError};
use crate::types::{File, FileId, TargetId};

use super::Catalog;

const SELECT_COLUMNS: &str = "id, storage_target_id, path, size, mtime, first_seen, last_seen, \
    current_checksum, checksum_type, last_checksummed_at, deleted_at";

impl Catalog {
    pub fn get_file(&self, target_id: TargetId, path: &Path) -> Result<Option<File>, FixityError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM files WHERE storage_target_id = ?1 AND path = ?2"
            ),
            params![target_id, path.to_string_lossy()],
            row_to_file,
        )
        .optional()
        .map_err(|e| FixityError::from(CatalogError::from(e)))
    }

    /// Inserts a brand-new live row, or revives a tombstoned one, for
    /// `path`. Used both for genuinely new files and for the "tombstoned &
    /// present again" reconciliation case, which clears `deleted_at` and
    /// resets `first_seen` is left untouched (history of first appearance
    /// is preserved; only the tombstone and current content are reset).
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_live_file(
        &self,
        target_id: TargetId,
        path: &Path,
        size: u64,
        mtime: i64,
        checksum: &str,
        checksum_type: ChecksumAlgorithm,
        now: i64,
    ) -> Result<FileId, FixityError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO files (storage_target_id, path, size, mtime, first_seen, last_seen, \
                current_checksum, checksum_type, last_checksummed_at, deleted_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?7, ?5, NULL) \
             ON CONFLICT (storage_target_id, path) DO UPDATE SET \
                size = excluded.size, \
                mtime = excluded.mtime, \
                last_seen = excluded.last_seen, \
                current_checksum = excluded.current_checksum, \
                checksum_type = excluded.checksum_type, \
                last_checksummed_at = excluded.last_checksummed_at, \
                deleted_at = NULL",
            params![
                target_id,
                path.to_string_lossy(),
                size as i64,
                mtime,
                now,
                checksum,
                checksum_type.as_str(),
            ],
        )
        .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        let id: i64 = conn
            .query_row(
                "SELECT id FROM files WHERE storage_target_id = ?1 AND path = ?2",
                params![target_id, path.to_string_lossy()],
                |row| row.get(0),
            )
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        Ok(id)
    }

    /// Updates `last_seen` only, without touching checksum or size. Used
    /// for files the walker revisited but did not need to (re)checksum;
    /// this is what keeps them out of the deletion sweep.
    pub fn touch_last_seen(&self, target_id: TargetId, path: &Path, now: i64) -> Result<(), FixityError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE files SET last_seen = ?3 WHERE storage_target_id = ?1 AND path = ?2",
            params![target_id, path.to_string_lossy(), now],
        )
        .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        Ok(())
    }

    /// Tombstones every live file under `target_id` whose `last_seen` is
    /// older than `scan_started_at` — the post-pass that turns "the walker
    /// never reached this path" into a deletion, run once the walk (and all
    /// outstanding checksums) has finished. Returns the rows tombstoned so
    /// the caller can emit `Deleted` change events for them.
    pub fn sweep_deleted(
        &self,
        target_id: TargetId,
        scan_started_at: i64,
        now: i64,
    ) -> Result<Vec<File>, FixityError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM files \
                 WHERE storage_target_id = ?1 AND deleted_at IS NULL AND last_seen < ?2"
            ))
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        let rows = stmt
            .query_map(params![target_id, scan_started_at], row_to_file)
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| FixityError::from(CatalogError::from(e)))?);
        }
        drop(stmt);
        conn.execute(
            "UPDATE files SET deleted_at = ?3 \
             WHERE storage_target_id = ?1 AND deleted_at IS NULL AND last_seen < ?2",
            params![target_id, scan_started_at, now],
        )
        .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        Ok(out)
    }

    /// Draws up to `limit` live files for the verification sample, ordered
    /// by `last_checksummed_at ASC` with nulls first — a deterministic,
    /// bounded pre-fetch rather than per-path random sampling, per the
    /// redesign note.
    pub fn sample_for_verification(
        &self,
        target_id: TargetId,
        limit: usize,
    ) -> Result<Vec<PathBuf>, FixityError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT path FROM files \
                 WHERE storage_target_id = ?1 AND deleted_at IS NULL \
                 ORDER BY last_checksummed_at IS NOT NULL, last_checksummed_at ASC \
                 LIMIT ?2",
            )
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        let rows = stmt
            .query_map(params![target_id, limit as i64], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(PathBuf::from(
                row.map_err(|e| FixityError::from(CatalogError::from(e)))?,
            ));
        }
        Ok(out)
    }

    pub fn count_active(&self, target_id: TargetId) -> Result<i64, FixityError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT COUNT(*) FROM files WHERE storage_target_id = ?1 AND deleted_at IS NULL",
            params![target_id],
            |row| row.get(0),
        )
        .map_err(|e| FixityError::from(CatalogError::from(e)))
    }
}

fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<File> {
    let checksum_type: Option<String> = row.get(8)?;
    Ok(File {
        id: row.get(0)?,
        storage_target_id: row.get(1)?,
        path: PathBuf::from(row.get::<_, String>(2)?),
        size: row.get::<_, i64>(3)? as u64,
        mtime: row.get(4)?,
        first_seen: row.get(5)?,
        last_seen: row.get(6)?,
        current_checksum: row.get(7)?,
        checksum_type: checksum_type.and_then(|s| ChecksumAlgorithm::parse(&s).ok()),
        last_checksummed_at: row.get(9)?,
        deleted_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::targets::NewStorageTarget;
    use crate::types::{TargetKind, TargetTuning};

    fn target_id(catalog: &Catalog) -> TargetId {
        catalog
            .insert_target(
                &NewStorageTarget {
                    name: "t".into(),
                    kind: TargetKind::Local,
                    root_path: "/srv".into(),
                    server: None,
                    share: None,
                    credential_ref: None,
                    enabled: true,
                    tuning: TargetTuning::default(),
                    schedule_cron: None,
                },
                1,
            )
            .unwrap()
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
        let tid = target_id(&catalog);
        catalog
            .upsert_live_file(tid, Path::new("a.txt"), 10, 1000, "deadbeef", ChecksumAlgorithm::Blake3, 100)
            .unwrap();
        let file = catalog.get_file(tid, Path::new("a.txt")).unwrap().unwrap();
        assert_eq!(file.size, 10);
        assert_eq!(file.current_checksum.as_deref(), Some("deadbeef"));
        assert!(file.is_live());
    }

    #[test]
    fn tombstone_round_trips_through_reappearance() {
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
        let tid = target_id(&catalog);
        catalog
            .upsert_live_file(tid, Path::new("a.txt"), 10, 1000, "deadbeef", ChecksumAlgorithm::Blake3, 100)
            .unwrap();
        let tombstoned = catalog.sweep_deleted(tid, 200, 200).unwrap();
        assert_eq!(tombstoned.len(), 1);
        let file = catalog.get_file(tid, Path::new("a.txt")).unwrap().unwrap();
        assert!(!file.is_live());

        catalog
            .upsert_live_file(tid, Path::new("a.txt"), 11, 1100, "cafebabe", ChecksumAlgorithm::Blake3, 300)
            .unwrap();
        let file = catalog.get_file(tid, Path::new("a.txt")).unwrap().unwrap();
        assert!(file.is_live());
        assert_eq!(file.size, 11);
    }

    #[test]
    fn touch_last_seen_keeps_a_file_out_of_the_deletion_sweep() {
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
        let tid = target_id(&catalog);
        catalog
            .upsert_live_file(tid, Path::new("a.txt"), 10, 1000, "deadbeef", ChecksumAlgorithm::Blake3, 100)
            .unwrap();
        catalog.touch_last_seen(tid, Path::new("a.txt"), 500).unwrap();
        let tombstoned = catalog.sweep_deleted(tid, 200, 600).unwrap();
        assert!(tombstoned.is_empty());
    }

    #[test]
    fn sample_for_verification_prefers_never_checksummed_and_oldest() {
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
        let tid = target_id(&catalog);
        catalog
            .upsert_live_file(tid, Path::new("old.txt"), 1, 100, "a", ChecksumAlgorithm::Blake3, 100)
            .unwrap();
        catalog
            .upsert_live_file(tid, Path::new("new.txt"), 1, 900, "b", ChecksumAlgorithm::Blake3, 900)
            .unwrap();
        let sample = catalog.sample_for_verification(tid, 1).unwrap();
        assert_eq!(sample, vec![PathBuf::from("old.txt")]);
    }
}
