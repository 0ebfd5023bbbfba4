//! Duration / bar-size compatibility policy.
//!
//! A bar size is accepted for a duration when one bar fits inside the
//! duration and the duration does not produce more than
//! [`MAX_BARS_PER_REQUEST`] bars, both measured in calendar seconds
//! (D = 1 day, W = 7 days, M = 30 days, Y = 365 days).
//!
//! | Bar size | Longest accepted duration |
//! |----------|---------------------------|
//! | 1 sec    | 1 D                       |
//! | 5 secs   | 5 D                       |
//! | 10 secs  | 1 W                       |
//! | 15 secs  | 2 W                       |
//! | 30 secs  | 1 M                       |
//! | 1 min    | 2 M                       |
//! | 2 mins   | 3 M                       |
//! | 3 mins   | 6 M                       |
//! | 5 mins   | 6 M                       |
//! | 10 mins  | 1 Y                       |
//! | 15 mins+ | 2 Y                       |
//!
//! Bars of a day or longer are also bounded below: `1 week` needs at least
//! `1 W` and `1 month` at least `1 M`.

use crate::enums::{BarSize, HistoryDuration};
use crate::error::ValidationError;

/// Upper bound on `duration / bar_size` for a single request.
pub const MAX_BARS_PER_REQUEST: u64 = 100_000;

/// Check that `bar_size` makes sense over `duration`.
///
/// Returns the calendar upper bound on the number of bars the request can
/// produce.
pub fn check_compatibility(
    duration: HistoryDuration,
    bar_size: BarSize,
) -> Result<u64, ValidationError> {
    let span = duration.seconds();
    let width = bar_size.seconds();

    if width > span {
        return Err(ValidationError::IncompatibleBarSize {
            bar_size,
            duration,
            reason: "a single bar is longer than the requested duration".to_string(),
        });
    }

    let bars = span / width;
    if bars > MAX_BARS_PER_REQUEST {
        return Err(ValidationError::IncompatibleBarSize {
            bar_size,
            duration,
            reason: format!(
                "would produce up to {} bars (limit {})",
                bars, MAX_BARS_PER_REQUEST
            ),
        });
    }

    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_second_bars_over_one_day_accepted() {
        assert_eq!(
            check_compatibility(HistoryDuration::Day1, BarSize::Sec1).unwrap(),
            86_400
        );
    }

    #[test]
    fn test_one_second_bars_over_two_years_rejected() {
        let err = check_compatibility(HistoryDuration::Years2, BarSize::Sec1).unwrap_err();
        assert!(matches!(err, ValidationError::IncompatibleBarSize { .. }));
        assert!(check_compatibility(HistoryDuration::Days2, BarSize::Sec1).is_err());
    }

    #[test]
    fn test_table_boundaries() {
        assert!(check_compatibility(HistoryDuration::Months2, BarSize::Min1).is_ok());
        assert!(check_compatibility(HistoryDuration::Months3, BarSize::Min1).is_err());
        assert!(check_compatibility(HistoryDuration::Month1, BarSize::Sec30).is_ok());
        assert!(check_compatibility(HistoryDuration::Months2, BarSize::Sec30).is_err());
        assert!(check_compatibility(HistoryDuration::Months6, BarSize::Min5).is_ok());
        assert!(check_compatibility(HistoryDuration::Year1, BarSize::Min5).is_err());
        assert!(check_compatibility(HistoryDuration::Years2, BarSize::Min5).is_err());
        assert!(check_compatibility(HistoryDuration::Year1, BarSize::Min10).is_ok());
        assert!(check_compatibility(HistoryDuration::Years2, BarSize::Min10).is_err());
        assert!(check_compatibility(HistoryDuration::Years2, BarSize::Min15).is_ok());
    }

    /// Longest accepted duration per intraday bar size, as documented in
    /// the module table.
    #[test]
    fn test_longest_duration_per_bar_size() {
        let expected = [
            (BarSize::Sec1, HistoryDuration::Day1),
            (BarSize::Sec5, HistoryDuration::Days5),
            (BarSize::Sec10, HistoryDuration::Week1),
            (BarSize::Sec15, HistoryDuration::Weeks2),
            (BarSize::Sec30, HistoryDuration::Month1),
            (BarSize::Min1, HistoryDuration::Months2),
            (BarSize::Min2, HistoryDuration::Months3),
            (BarSize::Min3, HistoryDuration::Months6),
            (BarSize::Min5, HistoryDuration::Months6),
            (BarSize::Min10, HistoryDuration::Year1),
            (BarSize::Min15, HistoryDuration::Years2),
            (BarSize::Hour1, HistoryDuration::Years2),
            (BarSize::Day1, HistoryDuration::Years2),
        ];
        for (bar, longest) in expected {
            let accepted = HistoryDuration::ALL
                .into_iter()
                .filter(|d| check_compatibility(*d, bar).is_ok())
                .max_by_key(|d| d.seconds());
            assert_eq!(accepted, Some(longest), "{}", bar);
        }
    }

    #[test]
    fn test_bar_longer_than_duration_rejected() {
        assert!(check_compatibility(HistoryDuration::Week1, BarSize::Month1).is_err());
        assert!(check_compatibility(HistoryDuration::Day1, BarSize::Week1).is_err());
        assert!(check_compatibility(HistoryDuration::Month1, BarSize::Month1).is_ok());
        assert!(check_compatibility(HistoryDuration::Day1, BarSize::Day1).is_ok());
    }

    /// The policy is a pure function of its inputs: every pair gives the
    /// same answer each time it is asked.
    #[test]
    fn test_policy_is_consistent_across_table() {
        for duration in HistoryDuration::ALL {
            for bar in BarSize::ALL {
                let first = check_compatibility(duration, bar).is_ok();
                let second = check_compatibility(duration, bar).is_ok();
                assert_eq!(first, second);
                if first {
                    assert!(bar.seconds() <= duration.seconds());
                }
            }
        }
    }
}
