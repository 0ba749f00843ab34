//! Pure large-change detector: no I/O, evaluated once a scan's counters are
//! final (or, for the count/bytes axes, as soon as they are known to be
//! final — neither depends on the prior active count).

use crate::types::{LargeChangeThresholds, ScanCounters};

/// Returns true if any configured threshold is met or exceeded.
/// `prior_active_count` is the number of live files the target had before
/// this scan started (used for the percent axis); `0` disables that axis
/// rather than dividing by zero.
pub fn is_large_change(
    counters: &ScanCounters,
    prior_active_count: i64,
    thresholds: &LargeChangeThresholds,
) -> bool {
    let changed = counters.changed();

    if let Some(count_threshold) = thresholds.count
        && changed >= count_threshold
    {
        return true;
    }

    if let Some(percent_threshold) = thresholds.percent
        && prior_active_count > 0
        && (changed as f64 / prior_active_count as f64) * 100.0 >= percent_threshold
    {
        return true;
    }

    if let Some(bytes_threshold) = thresholds.bytes
        && counters.deleted_or_modified_old_bytes >= bytes_threshold
    {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(deleted: i64, modified: i64, old_bytes: i64) -> ScanCounters {
        ScanCounters {
            files_deleted: deleted,
            files_modified: modified,
            deleted_or_modified_old_bytes: old_bytes,
            ..Default::default()
        }
    }

    #[test]
    fn no_thresholds_configured_never_trips() {
        let c = counters(1000, 1000, 1_000_000_000);
        assert!(!is_large_change(&c, 10, &LargeChangeThresholds::default()));
    }

    #[test]
    fn count_threshold_trips_at_exact_boundary() {
        let thresholds = LargeChangeThresholds {
            count: Some(10),
            ..Default::default()
        };
        assert!(is_large_change(&counters(5, 5, 0), 1000, &thresholds));
        assert!(!is_large_change(&counters(4, 5, 0), 1000, &thresholds));
    }

    #[test]
    fn percent_threshold_ignores_zero_prior_count() {
        let thresholds = LargeChangeThresholds {
            percent: Some(1.0),
            ..Default::default()
        };
        assert!(!is_large_change(&counters(100, 0, 0), 0, &thresholds));
    }

    #[test]
    fn percent_threshold_trips_on_ratio() {
        let thresholds = LargeChangeThresholds {
            percent: Some(50.0),
            ..Default::default()
        };
        assert!(is_large_change(&counters(5, 0, 0), 10, &thresholds));
        assert!(!is_large_change(&counters(4, 0, 0), 10, &thresholds));
    }

    #[test]
    fn bytes_threshold_trips_independently() {
        let thresholds = LargeChangeThresholds {
            bytes: Some(1_000),
            ..Default::default()
        };
        assert!(is_large_change(&counters(0, 0, 1_000), 10, &thresholds));
        assert!(!is_large_change(&counters(0, 0, 999), 10, &thresholds));
    }
}
