//! Recurrence date generator
//!
//! Pure expansion of a recurrence pattern, a set of time slots and a horizon
//! into concrete appointment start instants. No I/O; the only failure is a
//! malformed slot time.
//!
//! All instants are UTC and weekday/business-day checks use the UTC calendar.
//! Instances produced by different slots are merged and sorted but never
//! deduplicated: two slots naming the same instant yield two instances, and
//! downstream billing relies on that count.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Utc, Weekday};
use chrono::TimeZone;
use tracing::debug;

use crate::error::{Result, SchedulingError};
use crate::models::{RecurrencePattern, RecurrenceRule, TimeSlot};

/// Parse a slot time of the form "HH:MM" (24h clock).
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    let invalid = || SchedulingError::InvalidTimeFormat(value.to_string());

    let (hours, minutes) = value.trim().split_once(':').ok_or_else(invalid)?;
    let is_digits = |s: &str| !s.is_empty() && s.len() <= 2 && s.bytes().all(|b| b.is_ascii_digit());
    if !is_digits(hours) || !is_digits(minutes) {
        return Err(invalid());
    }

    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hours, minutes, 0).ok_or_else(invalid)
}

/// Monday through Friday
pub fn is_business_day(instant: &DateTime<Utc>) -> bool {
    !matches!(instant.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Last representable instant of a calendar day, for horizons given as dates.
pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::default());
    Utc.from_utc_datetime(&midnight) + Duration::days(1) - Duration::milliseconds(1)
}

/// Expand a recurrence into ascending start instants within `[start_date, end_date]`.
///
/// Every slot is walked independently with a cursor that starts at
/// `start_date` and advances one period at a time. Slots that lack the field
/// their pattern needs contribute nothing.
pub fn generate_dates(
    pattern: RecurrencePattern,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    time_slots: &[TimeSlot],
    business_days_only: bool,
) -> Result<Vec<DateTime<Utc>>> {
    let times = time_slots
        .iter()
        .map(|slot| parse_time_of_day(&slot.time))
        .collect::<Result<Vec<_>>>()?;

    if time_slots.is_empty() || end_date < start_date {
        return Ok(Vec::new());
    }

    let mut dates = Vec::new();
    for (slot, time) in time_slots.iter().zip(times) {
        let mut period: u32 = 0;
        while let Some(cursor) = advance(pattern, start_date, period) {
            if cursor > end_date {
                break;
            }

            if let Some(day) = candidate_day(pattern, cursor.date_naive(), slot) {
                let candidate = Utc.from_utc_datetime(&day.and_time(time));
                let in_horizon = candidate >= start_date && candidate <= end_date;
                if in_horizon
                    && slot_matches(pattern, &candidate, slot)
                    && (!business_days_only || is_business_day(&candidate))
                {
                    dates.push(candidate);
                }
            }

            period = match period.checked_add(1) {
                Some(next) => next,
                None => break,
            };
        }
    }

    dates.sort();
    debug!(
        pattern = %pattern,
        slots = time_slots.len(),
        generated = dates.len(),
        "Expanded recurrence"
    );
    Ok(dates)
}

/// Expand a persisted rule from `from` (clamped to the rule start) to its horizon.
pub fn expand_rule(rule: &RecurrenceRule, from: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
    generate_dates(
        rule.pattern,
        from.max(rule.start_date),
        rule.end_date,
        &rule.time_slots,
        rule.business_days_only,
    )
}

/// Cursor position after `period` steps. Calendar steps are taken from the
/// original start so month-end clamping never accumulates.
fn advance(pattern: RecurrencePattern, start: DateTime<Utc>, period: u32) -> Option<DateTime<Utc>> {
    match pattern {
        RecurrencePattern::Daily => start.checked_add_signed(Duration::days(i64::from(period))),
        RecurrencePattern::Weekly => start.checked_add_signed(Duration::weeks(i64::from(period))),
        RecurrencePattern::Monthly => start.checked_add_months(Months::new(period)),
        RecurrencePattern::Yearly => start.checked_add_months(Months::new(period.checked_mul(12)?)),
    }
}

/// Shift the cursor's day to satisfy the slot's day constraint.
fn candidate_day(pattern: RecurrencePattern, cursor: NaiveDate, slot: &TimeSlot) -> Option<NaiveDate> {
    match pattern {
        RecurrencePattern::Daily => Some(cursor),
        RecurrencePattern::Weekly => {
            let target = u32::from(slot.day_of_week.filter(|d| *d <= 6)?);
            let current = cursor.weekday().num_days_from_sunday();
            let shift = (target + 7 - current) % 7;
            cursor.checked_add_signed(Duration::days(i64::from(shift)))
        }
        RecurrencePattern::Monthly => cursor.with_day(u32::from(slot.day_of_month?)),
        RecurrencePattern::Yearly => NaiveDate::from_ymd_opt(
            cursor.year(),
            u32::from(slot.month?),
            u32::from(slot.day_of_month?),
        ),
    }
}

/// Re-verify the day constraint on the time-adjusted candidate.
fn slot_matches(pattern: RecurrencePattern, candidate: &DateTime<Utc>, slot: &TimeSlot) -> bool {
    match pattern {
        RecurrencePattern::Daily => true,
        RecurrencePattern::Weekly => {
            slot.day_of_week.map(u32::from) == Some(candidate.weekday().num_days_from_sunday())
        }
        RecurrencePattern::Monthly => slot.day_of_month.map(u32::from) == Some(candidate.day()),
        RecurrencePattern::Yearly => {
            slot.month.map(u32::from) == Some(candidate.month())
                && slot.day_of_month.map(u32::from) == Some(candidate.day())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(parse_time_of_day("14:00").unwrap(), NaiveTime::from_hms_opt(14, 0, 0).unwrap());
        assert_eq!(parse_time_of_day("9:05").unwrap(), NaiveTime::from_hms_opt(9, 5, 0).unwrap());
        for bad in ["", "14", "24:00", "12:60", "ab:cd", "12:00:00", "-1:30", "123:00"] {
            assert!(
                matches!(parse_time_of_day(bad), Err(SchedulingError::InvalidTimeFormat(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_weekly_every_wednesday_in_january() {
        let dates = generate_dates(
            RecurrencePattern::Weekly,
            utc(2024, 1, 1, 0, 0),
            end_of_day(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()),
            &[TimeSlot::weekly(3, "14:00")],
            false,
        )
        .unwrap();

        assert_eq!(
            dates,
            vec![
                utc(2024, 1, 3, 14, 0),
                utc(2024, 1, 10, 14, 0),
                utc(2024, 1, 17, 14, 0),
                utc(2024, 1, 24, 14, 0),
                utc(2024, 1, 31, 14, 0),
            ]
        );
    }

    #[test]
    fn test_monthly_fifteenth_through_june() {
        let dates = generate_dates(
            RecurrencePattern::Monthly,
            utc(2024, 1, 1, 0, 0),
            utc(2024, 6, 30, 0, 0),
            &[TimeSlot::monthly(15, "09:00")],
            false,
        )
        .unwrap();

        let expected: Vec<_> = (1..=6).map(|month| utc(2024, month, 15, 9, 0)).collect();
        assert_eq!(dates, expected);
    }

    #[test]
    fn test_monthly_skips_months_without_the_day() {
        let dates = generate_dates(
            RecurrencePattern::Monthly,
            utc(2024, 1, 1, 0, 0),
            utc(2024, 5, 31, 23, 0),
            &[TimeSlot::monthly(31, "10:00")],
            false,
        )
        .unwrap();

        assert_eq!(
            dates,
            vec![utc(2024, 1, 31, 10, 0), utc(2024, 3, 31, 10, 0), utc(2024, 5, 31, 10, 0)]
        );
    }

    #[test]
    fn test_yearly_leap_day_only_in_leap_years() {
        let dates = generate_dates(
            RecurrencePattern::Yearly,
            utc(2023, 1, 1, 0, 0),
            utc(2029, 1, 1, 0, 0),
            &[TimeSlot::yearly(2, 29, "08:30")],
            false,
        )
        .unwrap();

        assert_eq!(dates, vec![utc(2024, 2, 29, 8, 30), utc(2028, 2, 29, 8, 30)]);
    }

    #[test]
    fn test_daily_business_days_only() {
        // 2024-01-05 is a Friday
        let dates = generate_dates(
            RecurrencePattern::Daily,
            utc(2024, 1, 5, 0, 0),
            utc(2024, 1, 9, 23, 0),
            &[TimeSlot::daily("11:00")],
            true,
        )
        .unwrap();

        assert_eq!(
            dates,
            vec![utc(2024, 1, 5, 11, 0), utc(2024, 1, 8, 11, 0), utc(2024, 1, 9, 11, 0)]
        );
    }

    #[test]
    fn test_slot_before_start_time_on_first_day_is_excluded() {
        let dates = generate_dates(
            RecurrencePattern::Daily,
            utc(2024, 1, 1, 12, 0),
            utc(2024, 1, 3, 12, 0),
            &[TimeSlot::daily("09:00")],
            false,
        )
        .unwrap();

        assert_eq!(dates, vec![utc(2024, 1, 2, 9, 0), utc(2024, 1, 3, 9, 0)]);
    }

    #[test]
    fn test_multiple_slots_are_merged_and_duplicates_kept() {
        let dates = generate_dates(
            RecurrencePattern::Weekly,
            utc(2024, 1, 1, 0, 0),
            utc(2024, 1, 7, 23, 0),
            &[
                TimeSlot::weekly(5, "10:00"),
                TimeSlot::weekly(1, "16:00"),
                TimeSlot::weekly(5, "10:00"),
            ],
            false,
        )
        .unwrap();

        assert_eq!(
            dates,
            vec![utc(2024, 1, 1, 16, 0), utc(2024, 1, 5, 10, 0), utc(2024, 1, 5, 10, 0)]
        );
    }

    #[test]
    fn test_empty_slots_and_inverted_horizon_yield_nothing() {
        let start = utc(2024, 1, 1, 0, 0);
        let end = utc(2024, 12, 31, 0, 0);
        assert!(generate_dates(RecurrencePattern::Daily, start, end, &[], false)
            .unwrap()
            .is_empty());
        assert!(generate_dates(
            RecurrencePattern::Daily,
            end,
            start,
            &[TimeSlot::daily("09:00")],
            false
        )
        .unwrap()
        .is_empty());
    }

    #[test]
    fn test_slot_missing_required_field_contributes_nothing() {
        let start = utc(2024, 1, 1, 0, 0);
        let end = utc(2024, 3, 1, 0, 0);
        let without_day = TimeSlot::daily("09:00");
        for pattern in [
            RecurrencePattern::Weekly,
            RecurrencePattern::Monthly,
            RecurrencePattern::Yearly,
        ] {
            assert!(generate_dates(pattern, start, end, &[without_day.clone()], false)
                .unwrap()
                .is_empty());
        }
        let out_of_range_weekday = TimeSlot::weekly(7, "09:00");
        assert!(generate_dates(RecurrencePattern::Weekly, start, end, &[out_of_range_weekday], false)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_malformed_time_fails() {
        let result = generate_dates(
            RecurrencePattern::Daily,
            utc(2024, 1, 1, 0, 0),
            utc(2024, 1, 2, 0, 0),
            &[TimeSlot::daily("9am")],
            false,
        );
        assert!(matches!(result, Err(SchedulingError::InvalidTimeFormat(_))));
    }

    #[test]
    fn test_end_of_day() {
        let eod = end_of_day(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert!(eod > utc(2024, 1, 31, 23, 59));
        assert!(eod < utc(2024, 2, 1, 0, 0));
    }
}
