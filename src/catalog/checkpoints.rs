//! Repository for `scan_checkpoints`.

use std::path::PathBuf;

use rusqlite::{OptionalExtension, params};

use crate::error::{CatalogError, FixityError};
use crate::types::{ScanCheckpoint, ScanId};

use super::Catalog;

impl Catalog {
    pub fn upsert_checkpoint(
        &self,
        scan_id: ScanId,
        last_processed_path: &std::path::Path,
        files_processed: i64,
    ) -> Result<(), FixityError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scan_checkpoints (scan_id, last_processed_path, files_processed) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT (scan_id) DO UPDATE SET \
                last_processed_path = excluded.last_processed_path, \
                files_processed = excluded.files_processed",
            params![scan_id, last_processed_path.to_string_lossy(), files_processed],
        )
        .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        Ok(())
    }

    pub fn get_checkpoint(&self, scan_id: ScanId) -> Result<Option<ScanCheckpoint>, FixityError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT scan_id, last_processed_path, files_processed FROM scan_checkpoints WHERE scan_id = ?1",
            params![scan_id],
            |row| {
                Ok(ScanCheckpoint {
                    scan_id: row.get(0)?,
                    last_processed_path: PathBuf::from(row.get::<_, String>(1)?),
                    files_processed: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| FixityError::from(CatalogError::from(e)))
    }

    pub fn delete_checkpoint(&self, scan_id: ScanId) -> Result<(), FixityError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM scan_checkpoints WHERE scan_id = ?1", params![scan_id])
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::targets::NewStorageTarget;
    use crate::types::{TargetKind, TargetTuning};

    fn scan_id(catalog: &Catalog) -> ScanId {
        let tid = catalog
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
            .unwrap();
        catalog.start_scan(tid, None, 1).unwrap()
    }

    #[test]
    fn checkpoint_upserts_monotonically() {
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
        let sid = scan_id(&catalog);
        catalog
            .upsert_checkpoint(sid, std::path::Path::new("a/b.txt"), 10)
            .unwrap();
        catalog
            .upsert_checkpoint(sid, std::path::Path::new("a/c.txt"), 20)
            .unwrap();
        let checkpoint = catalog.get_checkpoint(sid).unwrap().unwrap();
        assert_eq!(checkpoint.last_processed_path, PathBuf::from("a/c.txt"));
        assert_eq!(checkpoint.files_processed, 20);
    }

    #[test]
    fn missing_checkpoint_is_none() {
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
        let sid = scan_id(&catalog);
        assert!(catalog.get_checkpoint(sid).unwrap().is_none());
    }

    #[test]
    fn delete_checkpoint_clears_it() {
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
        let sid = scan_id(&catalog);
        catalog
            .upsert_checkpoint(sid, std::path::Path::new("a.txt"), 1)
            .unwrap();
        catalog.delete_checkpoint(sid).unwrap();
        assert!(catalog.get_checkpoint(sid).unwrap().is_none());
    }
}
