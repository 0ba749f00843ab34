//! Repository for `change_events`.
//!
//! Events are appended in one transaction per reconciler batch so that a
//! crash mid-batch never leaves a partial set of events committed ahead of
//! the checkpoint that would have covered them.

use rusqlite::params;

use crate::error::{CatalogError, FixityError};
use crate::types::{ChangeEvent, ChangeEventKind, FileId, ScanId};

use super::Catalog;

impl Catalog {
    pub fn append_change_events(&self, events: &[ChangeEvent]) -> Result<(), FixityError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        for event in events {
            let (event_type, old_checksum, new_checksum, old_size, new_size) = decompose(&event.kind);
            tx.execute(
                "INSERT INTO change_events \
                    (scan_id, file_id, path, event_type, old_checksum, new_checksum, old_size, new_size, occurred_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    event.scan_id,
                    event.file_id,
                    event.path.to_string_lossy(),
                    event_type,
                    old_checksum,
                    new_checksum,
                    old_size,
                    new_size,
                    event.occurred_at,
                ],
            )
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        }
        tx.commit().map_err(|e| FixityError::from(CatalogError::from(e)))?;
        Ok(())
    }

    pub fn events_for_scan(&self, scan_id: ScanId) -> Result<Vec<ChangeEvent>, FixityError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, scan_id, file_id, path, event_type, old_checksum, new_checksum, \
                    old_size, new_size, occurred_at \
                 FROM change_events WHERE scan_id = ?1 ORDER BY id",
            )
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        let rows = stmt
            .query_map(params![scan_id], row_to_event)
            .map_err(|e| FixityError::from(CatalogError::from(e)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| FixityError::from(CatalogError::from(e)))?);
        }
        Ok(out)
    }
}

fn decompose(
    kind: &ChangeEventKind,
) -> (&'static str, Option<String>, Option<String>, Option<i64>, Option<i64>) {
    match kind {
        ChangeEventKind::Added { new_checksum, new_size } => {
            ("added", None, Some(new_checksum.clone()), None, Some(*new_size as i64))
        }
        ChangeEventKind::Modified {
            old_checksum,
            new_checksum,
            old_size,
            new_size,
        } => (
            "modified",
            old_checksum.clone(),
            Some(new_checksum.clone()),
            Some(*old_size as i64),
            Some(*new_size as i64),
        ),
        ChangeEventKind::Deleted { old_checksum, old_size } => {
            ("deleted", old_checksum.clone(), None, Some(*old_size as i64), None)
        }
        ChangeEventKind::Verified { checksum } => ("verified", None, Some(checksum.clone()), None, None),
    }
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<ChangeEvent> {
    let event_type: String = row.get(4)?;
    let old_checksum: Option<String> = row.get(5)?;
    let new_checksum: Option<String> = row.get(6)?;
    let old_size: Option<i64> = row.get(7)?;
    let new_size: Option<i64> = row.get(8)?;
    let kind = match event_type.as_str() {
        "added" => ChangeEventKind::Added {
            new_checksum: new_checksum.unwrap_or_default(),
            new_size: new_size.unwrap_or_default() as u64,
        },
        "deleted" => ChangeEventKind::Deleted {
            old_checksum,
            old_size: old_size.unwrap_or_default() as u64,
        },
        "verified" => ChangeEventKind::Verified {
            checksum: new_checksum.unwrap_or_default(),
        },
        _ => ChangeEventKind::Modified {
            old_checksum,
            new_checksum: new_checksum.unwrap_or_default(),
            old_size: old_size.unwrap_or_default() as u64,
            new_size: new_size.unwrap_or_default() as u64,
        },
    };
    Ok(ChangeEvent {
        id: row.get(0)?,
        scan_id: row.get(1)?,
        file_id: row.get::<_, i64>(2)? as FileId,
        path: std::path::PathBuf::from(row.get::<_, String>(3)?),
        kind,
        occurred_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::targets::NewStorageTarget;
    use crate::types::{TargetKind, TargetTuning};
    use std::path::PathBuf;

    fn setup() -> (Catalog, i64, i64) {
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
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
        let scan_id = catalog.start_scan(tid, None, 1).unwrap();
        let file_id = catalog
            .upsert_live_file(tid, std::path::Path::new("a.txt"), 10, 1, "abc", crate::checksum::ChecksumAlgorithm::Blake3, 1)
            .unwrap();
        (catalog, scan_id, file_id)
    }

    #[test]
    fn events_preserve_ordering_and_kind() {
        let (catalog, scan_id, file_id) = setup();
        let events = vec![
            ChangeEvent {
                id: 0,
                scan_id,
                file_id,
                path: PathBuf::from("a.txt"),
                kind: ChangeEventKind::Added {
                    new_checksum: "abc".into(),
                    new_size: 10,
                },
                occurred_at: 10,
            },
            ChangeEvent {
                id: 0,
                scan_id,
                file_id,
                path: PathBuf::from("a.txt"),
                kind: ChangeEventKind::Modified {
                    old_checksum: Some("abc".into()),
                    new_checksum: "def".into(),
                    old_size: 10,
                    new_size: 20,
                },
                occurred_at: 11,
            },
        ];
        catalog.append_change_events(&events).unwrap();
        let stored = catalog.events_for_scan(scan_id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].kind.as_str(), "added");
        assert_eq!(stored[1].kind.as_str(), "modified");
        assert!(stored[0].id < stored[1].id);
    }
}
