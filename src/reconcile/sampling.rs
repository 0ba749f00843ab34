//! Verification sample sizing.
//!
//! The sample itself is drawn by `Catalog::sample_for_verification`
//! (deterministic, ordered by `last_checksummed_at ASC` with nulls first);
//! this module only computes how many files that draw should ask for.

/// Rounds up, so a 1% target against a small corpus still samples at least
/// one file rather than truncating to zero.
pub fn sample_size(active_file_count: i64, percent: u8) -> i64 {
    if active_file_count <= 0 || percent == 0 {
        return 0;
    }
    let percent = percent.min(100) as i64;
    active_file_count.saturating_mul(percent).div_ceil(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_percent_never_samples() {
        assert_eq!(sample_size(1000, 0), 0);
    }

    #[test]
    fn zero_active_files_never_samples() {
        assert_eq!(sample_size(0, 50), 0);
    }

    #[test]
    fn small_corpus_rounds_up_to_at_least_one() {
        assert_eq!(sample_size(3, 1), 1);
    }

    #[test]
    fn hundred_percent_samples_everything() {
        assert_eq!(sample_size(57, 100), 57);
    }

    #[test]
    fn percent_above_100_is_clamped() {
        assert_eq!(sample_size(10, 250), 10);
    }
}
