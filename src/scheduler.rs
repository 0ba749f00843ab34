//! Thin cron-based collaborator: on each tick, starts a scan for every
//! enabled target whose `schedule_cron` is due. Holds no scan state and
//! performs no catalog writes of its own beyond what `Coordinator::scan_target`
//! already does — the excluded HTTP layer could replace this with its own
//! timer without touching the coordinator or catalog at all.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use log::{debug, warn};

use crate::catalog::Catalog;
use crate::coordinator::Coordinator;
use crate::error::FixityError;

/// Runs one scheduling pass: for each enabled target with a parseable
/// `schedule_cron`, starts a scan if `after` falls on or after the next
/// scheduled fire time on or before `now`. Targets already running (per the
/// coordinator registry or the catalog's busy check) are skipped silently —
/// they'll be picked up again on the next tick.
pub fn tick(catalog: &Catalog, coordinator: &Coordinator, now: DateTime<Utc>) -> Result<(), FixityError> {
    for target in catalog.list_enabled_targets()? {
        let Some(cron_expr) = target.schedule_cron.as_deref() else {
            continue;
        };
        let schedule = match Schedule::from_str(cron_expr) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!("target {} has an unparseable schedule {cron_expr:?}: {e}", target.id);
                continue;
            }
        };
        if !is_due(&schedule, now) {
            continue;
        }
        match coordinator.scan_target(target.id, now.timestamp()) {
            Ok(handle) => debug!("scheduler started scan {} for target {}", handle.scan_id, target.id),
            Err(FixityError::Busy) => debug!("scheduler skipped target {}: scan already running", target.id),
            Err(e) => warn!("scheduler failed to start scan for target {}: {e}", target.id),
        }
    }
    Ok(())
}

/// A target is due if `now`'s minute matches the cron expression. Cron
/// fields are minute-grained, so this is exact as long as the scheduler
/// ticks at least once a minute.
fn is_due(schedule: &Schedule, now: DateTime<Utc>) -> bool {
    schedule.includes(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_minute_schedule_is_always_due() {
        let schedule = Schedule::from_str("* * * * * *").unwrap();
        assert!(is_due(&schedule, Utc::now()));
    }

    #[test]
    fn far_future_only_schedule_is_not_due() {
        let schedule = Schedule::from_str("0 0 0 1 1 * 2099").unwrap();
        assert!(!is_due(&schedule, Utc::now()));
    }
}
