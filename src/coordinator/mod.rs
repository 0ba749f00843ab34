//! Per-process scan coordinator: mutual exclusion, lifecycle, and recovery.
//!
//! The registry is an explicit field here, not a module-level singleton —
//! whoever embeds this crate owns exactly one `Coordinator` and shares it
//! across however many scans it wants to allow concurrently. The catalog's
//! `idx_one_running_scan_per_target` partial unique index is the durable
//! half of "at most one running scan per target"; this registry is the
//! cheap, in-process half that avoids spawning a reconciler thread just to
//! have it immediately lose the race to the index.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::{error, info, warn};

use crate::catalog::Catalog;
use crate::error::FixityError;
use crate::reconcile;
use crate::types::{ScanId, ScanStatus, TargetId};

struct RunningScan {
    scan_id: ScanId,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// A snapshot of one in-flight scan, returned by [`Coordinator::running_scans`].
#[derive(Debug, Clone, Copy)]
pub struct RunningScanInfo {
    pub target_id: TargetId,
    pub scan_id: ScanId,
}

/// Handle to a scan just started by [`Coordinator::scan_target`]. Dropping
/// it does not cancel the scan; call [`Coordinator::cancel`] explicitly.
pub struct ScanHandle {
    pub scan_id: ScanId,
}

pub struct Coordinator {
    catalog: Catalog,
    registry: Mutex<HashMap<TargetId, RunningScan>>,
}

impl Coordinator {
    pub fn new(catalog: Catalog) -> Self {
        Coordinator {
            catalog,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a scan for `target_id` in a background thread and returns
    /// immediately. Fails with [`FixityError::Busy`] if one is already
    /// running — checked against both the in-process registry and, via
    /// `start_scan`'s conditional insert, the catalog itself.
    pub fn scan_target(&self, target_id: TargetId, now: i64) -> Result<ScanHandle, FixityError> {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        if registry.contains_key(&target_id) {
            return Err(FixityError::Busy);
        }

        let target = self.catalog.get_target(target_id)?;
        let scan_id = self.catalog.start_scan(target_id, None, now)?;

        let cancel = Arc::new(AtomicBool::new(false));
        let handle = spawn_reconcile_thread(
            self.catalog.clone(),
            target,
            scan_id,
            now,
            None,
            now,
            cancel.clone(),
        );

        registry.insert(
            target_id,
            RunningScan {
                scan_id,
                cancel,
                handle,
            },
        );
        Ok(ScanHandle { scan_id })
    }

    /// Cooperatively cancels the running scan for `target_id`, if any.
    /// Returns `true` if a running scan was found and signalled.
    pub fn cancel(&self, target_id: TargetId) -> bool {
        let registry = self.registry.lock().expect("registry mutex poisoned");
        match registry.get(&target_id) {
            Some(running) => {
                running.cancel.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Snapshot of targets with a scan currently running, per the in-process
    /// registry (not a catalog query).
    pub fn running_scans(&self) -> Vec<RunningScanInfo> {
        let registry = self.registry.lock().expect("registry mutex poisoned");
        registry
            .iter()
            .map(|(target_id, running)| RunningScanInfo {
                target_id: *target_id,
                scan_id: running.scan_id,
            })
            .collect()
    }

    /// Blocks until the scan for `target_id` (if any) has finished and its
    /// thread has been reaped. Intended for tests and graceful shutdown.
    pub fn join(&self, target_id: TargetId) {
        let running = self
            .registry
            .lock()
            .expect("registry mutex poisoned")
            .remove(&target_id);
        if let Some(running) = running {
            let _ = running.handle.join();
        }
    }

    /// Startup recovery: every scan the catalog still shows as `running` is
    /// a crash survivor, since a clean shutdown always finalizes a scan
    /// before returning. Scans with a checkpoint are resumed from
    /// `last_processed_path`; scans with none are marked `failed` outright,
    /// since there is nothing to resume from.
    pub fn recover(&self, now: i64) -> Result<Vec<ScanId>, FixityError> {
        let mut resumed = Vec::new();
        for orphan in self.catalog.scans_left_running()? {
            let checkpoint = self.catalog.get_checkpoint(orphan.id)?;
            match checkpoint {
                Some(checkpoint) => {
                    let target = self.catalog.get_target(orphan.storage_target_id)?;
                    let mut registry = self.registry.lock().expect("registry mutex poisoned");
                    if registry.contains_key(&orphan.storage_target_id) {
                        warn!(
                            "recover: target {} already has a scan registered, skipping orphan scan {}",
                            orphan.storage_target_id, orphan.id
                        );
                        continue;
                    }
                    self.catalog
                        .finalize_scan(orphan.id, ScanStatus::Partial, false, now)?;
                    let new_scan_id =
                        self.catalog
                            .start_scan(orphan.storage_target_id, Some(orphan.id), now)?;
                    let cancel = Arc::new(AtomicBool::new(false));
                    let handle = spawn_reconcile_thread(
                        self.catalog.clone(),
                        target,
                        new_scan_id,
                        orphan.started_at,
                        Some(checkpoint.last_processed_path),
                        now,
                        cancel.clone(),
                    );
                    registry.insert(
                        orphan.storage_target_id,
                        RunningScan {
                            scan_id: new_scan_id,
                            cancel,
                            handle,
                        },
                    );
                    info!(
                        "recover: resuming scan for target {} (scan {} -> {})",
                        orphan.storage_target_id, orphan.id, new_scan_id
                    );
                    resumed.push(new_scan_id);
                }
                None => {
                    self.catalog
                        .finalize_scan(orphan.id, ScanStatus::Failed, false, now)?;
                    warn!(
                        "recover: scan {} for target {} had no checkpoint, marked failed",
                        orphan.id, orphan.storage_target_id
                    );
                }
            }
        }
        Ok(resumed)
    }
}

/// `scan_started_at` is the cutoff `reconcile::run` uses to decide which
/// catalog rows are stale enough to tombstone (`sweep_deleted`); for a scan
/// resumed from a checkpoint this must stay pinned to the *original*
/// orphaned scan's start time, not the recovery time, or files already
/// reconciled before the crash (with `last_seen` before the orphan started)
/// would look stale and get tombstoned. `now` is the wall-clock time applied
/// to every row and event this run produces.
fn spawn_reconcile_thread(
    catalog: Catalog,
    target: crate::types::StorageTarget,
    scan_id: ScanId,
    scan_started_at: i64,
    resume_from: Option<PathBuf>,
    now: i64,
    cancel: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let outcome = reconcile::run(
            &catalog,
            &target,
            scan_id,
            scan_started_at,
            resume_from,
            now,
            &cancel,
        );
        match outcome {
            Ok(outcome) => {
                let prior_active = match catalog.count_active(target.id) {
                    Ok(n) => n - outcome.counters.files_added + outcome.counters.files_deleted,
                    Err(_) => 0,
                };
                let is_large_change = crate::reconcile::large_change::is_large_change(
                    &outcome.counters,
                    prior_active,
                    &target.tuning.large_change,
                );
                let status = if outcome.cancelled {
                    ScanStatus::Partial
                } else {
                    ScanStatus::Completed
                };
                if let Err(e) = catalog.finalize_scan(scan_id, status, is_large_change, now) {
                    error!("failed to finalize scan {scan_id}: {e}");
                }
            }
            Err(e) => {
                error!("scan {scan_id} for target {} failed: {e}", target.id);
                let _ = catalog.append_error(scan_id, &e.to_string());
                let _ = catalog.finalize_scan(scan_id, ScanStatus::Failed, false, now);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::targets::NewStorageTarget;
    use crate::types::{TargetKind, TargetTuning};

    fn make_target(catalog: &Catalog, root: &std::path::Path) -> TargetId {
        catalog
            .insert_target(
                &NewStorageTarget {
                    name: "t".into(),
                    kind: TargetKind::Local,
                    root_path: root.to_path_buf(),
                    server: None,
                    share: None,
                    credential_ref: None,
                    enabled: true,
                    tuning: TargetTuning {
                        parallel_workers: 1,
                        ..TargetTuning::default()
                    },
                    schedule_cron: None,
                },
                1,
            )
            .unwrap()
    }

    #[test]
    fn scanning_the_same_target_twice_concurrently_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
        let target_id = make_target(&catalog, dir.path());
        let coordinator = Coordinator::new(catalog);

        let _first = coordinator.scan_target(target_id, 1000).unwrap();
        let second = coordinator.scan_target(target_id, 1001);
        assert!(matches!(second, Err(FixityError::Busy)));
        coordinator.join(target_id);
    }

    #[test]
    fn recover_marks_checkpointless_orphans_failed() {
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
        let target_id = make_target(&catalog, std::path::Path::new("/srv"));
        let scan_id = catalog.start_scan(target_id, None, 100).unwrap();

        let coordinator = Coordinator::new(catalog.clone());
        let resumed = coordinator.recover(200).unwrap();
        assert!(resumed.is_empty());
        let scan = catalog.get_scan(scan_id).unwrap();
        assert_eq!(scan.status, ScanStatus::Failed);
    }

    #[test]
    fn recover_resumes_orphans_with_a_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let catalog = Catalog::open_in_memory_for_tests().unwrap();
        let target_id = make_target(&catalog, dir.path());
        let scan_id = catalog.start_scan(target_id, None, 100).unwrap();
        catalog
            .upsert_checkpoint(scan_id, std::path::Path::new("a.txt"), 1)
            .unwrap();

        let coordinator = Coordinator::new(catalog.clone());
        let resumed = coordinator.recover(200).unwrap();
        assert_eq!(resumed.len(), 1);
        coordinator.join(target_id);

        let orphan = catalog.get_scan(scan_id).unwrap();
        assert_eq!(orphan.status, ScanStatus::Partial);
        assert_eq!(orphan.resumed_from, None);
        let new_scan = catalog.get_scan(resumed[0]).unwrap();
        assert_eq!(new_scan.resumed_from, Some(scan_id));
    }
}
