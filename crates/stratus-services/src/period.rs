//! Billing-period math
//!
//! Billing periods are calendar months. The helpers here are the single
//! source of truth for period boundaries, proration denominators, and the
//! usage-window derivations used by the calculator. Everything takes dates
//! in, dates out; the timezone is UTC throughout.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// First day of the month containing `date`
pub fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).expect("month start is always valid")
}

/// First day of the month after the one containing `date`
pub fn next_month_start(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("next month start is always valid")
}

/// First day of the month before the one containing `date`
pub fn prev_month_start(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 1 {
        (date.year() - 1, 12)
    } else {
        (date.year(), date.month() - 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("previous month start is always valid")
}

/// Number of days in the month containing `date`
pub fn days_in_month(date: NaiveDate) -> i64 {
    (next_month_start(date) - month_start(date)).num_days()
}

/// Days left in the current period, counting `today` itself.
///
/// An upgrade on the first day of a 31-day month has 31 of 31 days
/// remaining; on the second day, 30 of 31.
pub fn days_remaining_in_month(today: NaiveDate) -> i64 {
    (next_month_start(today) - today).num_days()
}

/// Midnight UTC at the start of `date`
pub fn date_to_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
}

/// The usage window billed by an invoice: the calendar month immediately
/// preceding the invoice's own billing period.
///
/// Deriving the window from the invoice rather than from wall-clock time
/// keeps delayed month-end processing correct: a draft whose billing period
/// is February bills January's usage even if the job actually runs in March.
pub fn billing_usage_window(
    invoice_period_start: NaiveDate,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = prev_month_start(invoice_period_start);
    (date_to_utc(start), date_to_utc(invoice_period_start))
}

/// The usage window shown on the DRAFT between rollovers: the current
/// calendar month so far, `[month_start, now)`.
pub fn display_usage_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (date_to_utc(month_start(now.date_naive())), now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_month_boundaries() {
        assert_eq!(month_start(d(2025, 1, 17)), d(2025, 1, 1));
        assert_eq!(next_month_start(d(2025, 1, 17)), d(2025, 2, 1));
        assert_eq!(next_month_start(d(2025, 12, 31)), d(2026, 1, 1));
        assert_eq!(prev_month_start(d(2025, 1, 17)), d(2024, 12, 1));
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(d(2025, 1, 10)), 31);
        assert_eq!(days_in_month(d(2025, 2, 10)), 28);
        assert_eq!(days_in_month(d(2024, 2, 10)), 29); // leap year
        assert_eq!(days_in_month(d(2025, 4, 10)), 30);
    }

    #[test]
    fn test_days_remaining() {
        assert_eq!(days_remaining_in_month(d(2025, 1, 1)), 31);
        assert_eq!(days_remaining_in_month(d(2025, 1, 2)), 30);
        assert_eq!(days_remaining_in_month(d(2025, 1, 31)), 1);
    }

    #[test]
    fn test_billing_window_ignores_wall_clock() {
        // A February invoice bills January regardless of when it is
        // processed.
        let (start, end) = billing_usage_window(d(2025, 2, 1));
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_billing_window_non_leap_feb() {
        // March invoice in a non-leap year bills all 28 days of February.
        let (start, end) = billing_usage_window(d(2025, 3, 1));
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
        assert_eq!((end - start).num_days(), 28);
    }

    #[test]
    fn test_billing_window_leap_feb() {
        let (start, end) = billing_usage_window(d(2024, 3, 1));
        assert_eq!((end - start).num_days(), 29);
    }

    #[test]
    fn test_billing_window_year_boundary() {
        // January invoice bills December of the previous year.
        let (start, end) = billing_usage_window(d(2025, 1, 1));
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_display_window_is_month_to_now() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 9, 30, 0).unwrap();
        let (start, end) = display_usage_window(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(end, now);
    }
}
