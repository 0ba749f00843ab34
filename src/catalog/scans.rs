//! Repository for `scans`.
//!
//! "At most one running scan per target" is enforced durably by the
//! `idx_one_running_scan_per_target` partial unique index (see
//! `catalog::schema`), not just by the in-process coordinator registry.
//! `start_scan` performs a conditional insert and maps the resulting
//! constraint violation to [`FixityError::Busy`]: insert, or fail outright
//! if it would collide, rather than silently overwrite.

use rusqlite::params;

use crate::error::{CatalogError, FixityError};
use crate::types::{Scan, ScanCounters, ScanId, ScanStatus, TargetId};

use super::Catalog;

impl Catalog {
    /// Attempts to start a new scan for `target_id`. Fails with
    /// [`FixityError::Busy`] if one is already running, not with a raw
    /// SQLite constraint error.
    pub fn start_scan(
        &self,
        target_id: TargetId,
        resumed_from: Option<ScanId>,
        now: i64,
    ) -> Result<ScanId, FixityError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO scans (storage_target_id, status, resumed_from, started_at) \
             VALUES (?1, 'running', ?2, ?3)",
            params![target_id, resumed_from, now],
        );
        match inserted {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(FixityError::Busy)
            }
            Err(e) => Err(FixityError::from(CatalogError::from(e))),
        }
    }

    pub fn running_scan_for_target(&self, target_id: TargetId) -> Result<Option<ScanId>, FixityError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id FROM scans WHERE storage_target_id = ?1 AND status = 'running'",
            params![target_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(FixityError::from(CatalogError::from(other))),
        })
    }

    /// Applies a delta to a running scan's counters. The coordinator is the
    /// only writer of scan counters, and it always applies them as deltas
    /// (never re-derives a row via read-modify-write), so concurrent
    /// batches from the same scan never race each other.
    pub fn apply_counter_delta(&self, scan_id: ScanId, delta: &ScanCounters) -> Result<(), FixityError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE scans SET \
                files_scanned = files_scanned + ?2, \
                files_added = files_added + ?3, \
                files_deleted = files_deleted + ?4, \
                files_modified = files_modified + ?5, \
                files_verified = files_verified + ?6, \
                errors_count = errors_count + ?7, \
                deleted_or_modified_old_bytes = deleted_or_modified_old_bytes + ?8 \
             WHERE id = ?1",
            params![
                scan_id,
                delta.files_scanned,
                delta.files_added,
                delta.files_deleted,
                delta.files_modified,
                delta.files_verified,
                delta.errors_count,
                delta.deleted_or_modified_old_bytes,
            ],
        )
        .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        Ok(())
    }

    pub fn append_error(&self, scan_id: ScanId, message: &str) -> Result<(), FixityError> {
        let conn = self.conn()?;
        let existing: String = conn
            .query_row(
                "SELECT error_messages FROM scans WHERE id = ?1",
                params![scan_id],
                |row| row.get(0),
            )
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        let mut messages: Vec<String> =
            serde_json::from_str(&existing).map_err(|e| FixityError::from(CatalogError::from(e)))?;
        messages.push(message.to_string());
        let encoded = serde_json::to_string(&messages).map_err(|e| FixityError::from(CatalogError::from(e)))?;
        conn.execute(
            "UPDATE scans SET error_messages = ?2, errors_count = errors_count + 1 WHERE id = ?1",
            params![scan_id, encoded],
        )
        .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        Ok(())
    }

    pub fn finalize_scan(
        &self,
        scan_id: ScanId,
        status: ScanStatus,
        is_large_change: bool,
        now: i64,
    ) -> Result<(), FixityError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE scans SET status = ?2, is_large_change = ?3, completed_at = ?4 WHERE id = ?1",
            params![scan_id, status.as_str(), is_large_change as i64, now],
        )
        .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        Ok(())
    }

    pub fn get_scan(&self, scan_id: ScanId) -> Result<Scan, FixityError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, storage_target_id, status, files_scanned, files_added, files_deleted, \
                files_modified, files_verified, errors_count, deleted_or_modified_old_bytes, \
                error_messages, is_large_change, resumed_from, started_at, completed_at \
             FROM scans WHERE id = ?1",
            params![scan_id],
            row_to_scan,
        )
        .map_err(|e| FixityError::from(CatalogError::from(e)))
    }

    /// Scans left in `running` state — survivors of a crash, since a clean
    /// shutdown always finalizes to `completed`/`failed`/`partial` first.
    pub fn scans_left_running(&self) -> Result<Vec<Scan>, FixityError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, storage_target_id, status, files_scanned, files_added, files_deleted, \
                    files_modified, files_verified, errors_count, deleted_or_modified_old_bytes, \
                    error_messages, is_large_change, resumed_from, started_at, completed_at \
                 FROM scans WHERE status = 'running'",
            )
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        let rows = stmt
            .query_map([], row_to_scan)
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| FixityError::from(CatalogError::from(e)))?);
        }
        Ok(out)
    }
}

fn row_to_scan(row: &rusqlite::Row) -> rusqlite::Result<Scan> {
    let status_str: String = row.get(2)?;
    let error_messages_json: String = row.get(10)?;
    let error_messages = serde_json::from_str(&error_messages_json).unwrap_or_default();
    Ok(Scan {
        id: row.get(0)?,
        storage_target_id: row.get(1)?,
        status: ScanStatus::parse(&status_str).unwrap_or(ScanStatus::Failed),
        counters: ScanCounters {
            files_scanned: row.get(3)?,
            files_added: row.get(4)?,
            files_deleted: row.get(5)?,
            files_modified: row.get(6)?,
            files_verified: row.get(7)?,
            errors_count: row.get(8)?,
            deleted_or_modified_old_bytes: row.get(9)?,
        },
        error_messages,
        is_large_change: row.get::<_, i64>(11)? != 0,
        resumed_from: row.get(12)?,
        started_at: row.get(13)?,
        completed_at: row.get(14)?,
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
    fn second_concurrent_scan_for_same_target_is_busy() {
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
        let tid = target_id(&catalog);
        catalog.start_scan(tid, None, 100).unwrap();
        let err = catalog.start_scan(tid, None, 101).unwrap_err();
        assert!(matches!(err, FixityError::Busy));
    }

    #[test]
    fn finalizing_a_scan_allows_a_new_one_to_start() {
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
        let tid = target_id(&catalog);
        let scan_id = catalog.start_scan(tid, None, 100).unwrap();
        catalog
            .finalize_scan(scan_id, ScanStatus::Completed, false, 200)
            .unwrap();
        let second = catalog.start_scan(tid, None, 201).unwrap();
        assert_ne!(scan_id, second);
    }

    #[test]
    fn counter_deltas_accumulate() {
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
        let tid = target_id(&catalog);
        let scan_id = catalog.start_scan(tid, None, 100).unwrap();
        catalog
            .apply_counter_delta(
                scan_id,
                &ScanCounters {
                    files_scanned: 3,
                    files_added: 2,
                    ..Default::default()
                },
            )
            .unwrap();
        catalog
            .apply_counter_delta(
                scan_id,
                &ScanCounters {
                    files_scanned: 2,
                    files_modified: 1,
                    ..Default::default()
                },
            )
            .unwrap();
        let scan = catalog.get_scan(scan_id).unwrap();
        assert_eq!(scan.counters.files_scanned, 5);
        assert_eq!(scan.counters.files_added, 2);
        assert_eq!(scan.counters.files_modified, 1);
    }

    #[test]
    fn appended_errors_are_preserved_as_an_ordered_list() {
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
        let tid = target_id(&catalog);
        let scan_id = catalog.start_scan(tid, None, 100).unwrap();
        catalog.append_error(scan_id, "permission denied: a.txt").unwrap();
        catalog.append_error(scan_id, "permission denied: b.txt").unwrap();
        let scan = catalog.get_scan(scan_id).unwrap();
        assert_eq!(
            scan.error_messages,
            vec!["permission denied: a.txt", "permission denied: b.txt"]
        );
        assert_eq!(scan.counters.errors_count, 2);
    }

    #[test]
    fn scans_left_running_finds_crash_survivors() {
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
        let tid = target_id(&catalog);
        let scan_id = catalog.start_scan(tid, None, 100).unwrap();
        let survivors = catalog.scans_left_running().unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].id, scan_id);
    }
}
