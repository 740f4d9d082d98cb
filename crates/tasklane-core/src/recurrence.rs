// Recurrence patterns
//
// Given any valid pattern and an anchor date there is exactly one
// deterministic next occurrence, or none once the end date has passed.
// When the naive next date does not exist in the target month (the 31st in
// a 30-day month, Feb 29 off leap years) it clamps to the last valid day.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub enum RecurrenceKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    /// N-day intervals, treated like daily with the given interval.
    Custom,
}

/// Recurrence pattern for repeating tasks.
///
/// Examples:
/// - every day: kind=daily, interval=1
/// - every Monday: kind=weekly, interval=1, days_of_week=[0]
/// - every 2 weeks on Mon/Wed/Fri: kind=weekly, interval=2, days_of_week=[0,2,4]
/// - 15th of every month: kind=monthly, interval=1, day_of_month=15
/// - every year on March 1st: kind=yearly, interval=1, month_of_year=3, day_of_month=1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct RecurrencePattern {
    pub id: Uuid,
    pub user_id: String,
    pub kind: RecurrenceKind,
    pub interval: u32,
    /// For weekly recurrence: 0=Monday .. 6=Sunday.
    pub days_of_week: Option<Vec<u32>>,
    /// For monthly/yearly recurrence: 1-31.
    pub day_of_month: Option<u32>,
    /// For yearly recurrence: 1-12.
    pub month_of_year: Option<u32>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RecurrencePattern {
    fn new(user_id: impl Into<String>, kind: RecurrenceKind, interval: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            kind,
            interval: interval.max(1),
            days_of_week: None,
            day_of_month: None,
            month_of_year: None,
            end_date: None,
            created_at: Utc::now(),
        }
    }

    pub fn daily(user_id: impl Into<String>, interval: u32) -> Self {
        Self::new(user_id, RecurrenceKind::Daily, interval)
    }

    /// Weekly pattern. An empty day list defaults to Monday.
    pub fn weekly(user_id: impl Into<String>, interval: u32, days_of_week: Vec<u32>) -> Self {
        let mut days: Vec<u32> = days_of_week.into_iter().filter(|d| *d <= 6).collect();
        if days.is_empty() {
            days.push(0);
        }
        days.sort_unstable();
        days.dedup();
        let mut pattern = Self::new(user_id, RecurrenceKind::Weekly, interval);
        pattern.days_of_week = Some(days);
        pattern
    }

    pub fn monthly(user_id: impl Into<String>, interval: u32, day_of_month: u32) -> Self {
        let mut pattern = Self::new(user_id, RecurrenceKind::Monthly, interval);
        pattern.day_of_month = Some(day_of_month.clamp(1, 31));
        pattern
    }

    pub fn yearly(
        user_id: impl Into<String>,
        interval: u32,
        month_of_year: u32,
        day_of_month: u32,
    ) -> Self {
        let mut pattern = Self::new(user_id, RecurrenceKind::Yearly, interval);
        pattern.month_of_year = Some(month_of_year.clamp(1, 12));
        pattern.day_of_month = Some(day_of_month.clamp(1, 31));
        pattern
    }

    pub fn custom(user_id: impl Into<String>, interval: u32) -> Self {
        Self::new(user_id, RecurrenceKind::Custom, interval)
    }

    pub fn with_end_date(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = Some(end_date);
        self
    }

    /// Compute the next occurrence after the given anchor date.
    ///
    /// Returns None once the recurrence has ended: the anchor is on or past
    /// the end date, or the computed next date would exceed it.
    pub fn next_occurrence(&self, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let Some(end) = self.end_date {
            if anchor >= end {
                return None;
            }
        }

        let next = match self.kind {
            RecurrenceKind::Daily | RecurrenceKind::Custom => self.next_daily(anchor),
            RecurrenceKind::Weekly => self.next_weekly(anchor),
            RecurrenceKind::Monthly => self.next_monthly(anchor),
            RecurrenceKind::Yearly => self.next_yearly(anchor),
        }?;

        match self.end_date {
            Some(end) if next > end => None,
            _ => Some(next),
        }
    }

    fn next_daily(&self, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Some(anchor + Duration::days(i64::from(self.interval)))
    }

    fn next_weekly(&self, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = match self.days_of_week.as_deref() {
            None | Some([]) => {
                // No specific days: same weekday, interval weeks later.
                return Some(anchor + Duration::weeks(i64::from(self.interval)));
            }
            Some(days) => days,
        };

        let current = anchor.weekday().num_days_from_monday();

        // A later listed day within the anchor's week comes first.
        if let Some(day) = days.iter().find(|d| **d > current) {
            return Some(anchor + Duration::days(i64::from(day - current)));
        }

        // Otherwise jump to the first listed day of the week `interval`
        // weeks out.
        let days_until_monday = match (7 - current) % 7 {
            0 => 7,
            d => d,
        };
        let week_start =
            anchor + Duration::days(i64::from(days_until_monday + 7 * (self.interval - 1)));
        Some(week_start + Duration::days(i64::from(days[0])))
    }

    fn next_monthly(&self, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let target_day = self.day_of_month.unwrap_or_else(|| anchor.day());

        let months = anchor.month0() + self.interval;
        let year = anchor.year() + (months / 12) as i32;
        let month = months % 12 + 1;

        let day = target_day.min(days_in_month(year, month));
        at_same_time(anchor, year, month, day)
    }

    fn next_yearly(&self, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let year = anchor.year() + self.interval as i32;
        let month = self.month_of_year.unwrap_or_else(|| anchor.month());
        let target_day = self.day_of_month.unwrap_or_else(|| anchor.day());

        let day = target_day.min(days_in_month(year, month));
        at_same_time(anchor, year, month, day)
    }

    /// Human-readable rendering of the pattern.
    pub fn describe(&self) -> String {
        let interval = self.interval;
        match self.kind {
            RecurrenceKind::Daily if interval == 1 => "Every day".to_string(),
            RecurrenceKind::Daily => format!("Every {interval} days"),
            RecurrenceKind::Weekly => match self.days_of_week.as_deref() {
                Some(days) if !days.is_empty() => {
                    let names: Vec<&str> = days.iter().map(|d| day_name(*d)).collect();
                    let names = names.join(", ");
                    if interval == 1 {
                        format!("Every {names}")
                    } else {
                        format!("Every {interval} weeks on {names}")
                    }
                }
                _ if interval == 1 => "Every week".to_string(),
                _ => format!("Every {interval} weeks"),
            },
            RecurrenceKind::Monthly => {
                let day = self.day_of_month.unwrap_or(1);
                let day = format!("{day}{}", ordinal_suffix(day));
                if interval == 1 {
                    format!("Every month on the {day}")
                } else {
                    format!("Every {interval} months on the {day}")
                }
            }
            RecurrenceKind::Yearly => {
                let month = month_name(self.month_of_year.unwrap_or(1));
                let day = self.day_of_month.unwrap_or(1);
                if interval == 1 {
                    format!("Every year on {month} {day}")
                } else {
                    format!("Every {interval} years on {month} {day}")
                }
            }
            RecurrenceKind::Custom if interval == 1 => "Every day (custom)".to_string(),
            RecurrenceKind::Custom => format!("Every {interval} days (custom)"),
        }
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Rebuild a date at year/month/day, preserving the anchor's time of day.
fn at_same_time(anchor: DateTime<Utc>, year: i32, month: u32, day: u32) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = anchor.time();
    date.and_hms_opt(time.hour(), time.minute(), time.second())
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

fn day_name(day: u32) -> &'static str {
    match day {
        0 => "Monday",
        1 => "Tuesday",
        2 => "Wednesday",
        3 => "Thursday",
        4 => "Friday",
        5 => "Saturday",
        _ => "Sunday",
    }
}

fn month_name(month: u32) -> &'static str {
    match month {
        1 => "January",
        2 => "February",
        3 => "March",
        4 => "April",
        5 => "May",
        6 => "June",
        7 => "July",
        8 => "August",
        9 => "September",
        10 => "October",
        11 => "November",
        _ => "December",
    }
}

fn ordinal_suffix(day: u32) -> &'static str {
    match day {
        1 | 21 | 31 => "st",
        2 | 22 => "nd",
        3 | 23 => "rd",
        _ => "th",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_interval() {
        let pattern = RecurrencePattern::daily("u", 3);
        let next = pattern.next_occurrence(date(2026, 3, 1, 9)).unwrap();
        assert_eq!(next, date(2026, 3, 4, 9));
    }

    #[test]
    fn test_custom_behaves_like_daily() {
        let pattern = RecurrencePattern::custom("u", 10);
        let next = pattern.next_occurrence(date(2026, 3, 1, 9)).unwrap();
        assert_eq!(next, date(2026, 3, 11, 9));
    }

    #[test]
    fn test_weekly_monday_to_monday() {
        // 2026-02-02 is a Monday; next weekly-Monday occurrence is Feb 9.
        let pattern = RecurrencePattern::weekly("u", 1, vec![0]);
        let next = pattern.next_occurrence(date(2026, 2, 2, 10)).unwrap();
        assert_eq!(next, date(2026, 2, 9, 10));
    }

    #[test]
    fn test_weekly_next_day_in_same_week() {
        // Monday anchor with Mon/Wed/Fri: Wednesday comes first.
        let pattern = RecurrencePattern::weekly("u", 2, vec![0, 2, 4]);
        let next = pattern.next_occurrence(date(2026, 2, 2, 10)).unwrap();
        assert_eq!(next, date(2026, 2, 4, 10));
    }

    #[test]
    fn test_weekly_skips_interval_weeks() {
        // Friday anchor with Mon/Fri every 2 weeks: next is Monday of the
        // week after next.
        let pattern = RecurrencePattern::weekly("u", 2, vec![0, 4]);
        let next = pattern.next_occurrence(date(2026, 2, 6, 10)).unwrap();
        assert_eq!(next, date(2026, 2, 16, 10));
    }

    #[test]
    fn test_weekly_without_days() {
        let mut pattern = RecurrencePattern::weekly("u", 3, vec![]);
        pattern.days_of_week = None;
        let next = pattern.next_occurrence(date(2026, 2, 2, 10)).unwrap();
        assert_eq!(next, date(2026, 2, 23, 10));
    }

    #[test]
    fn test_monthly_preserves_day_and_time() {
        let pattern = RecurrencePattern::monthly("u", 1, 15);
        let next = pattern.next_occurrence(date(2026, 1, 15, 8)).unwrap();
        assert_eq!(next, date(2026, 2, 15, 8));
    }

    #[test]
    fn test_monthly_clamps_to_short_month() {
        // Jan 31 + 1 month lands on Feb 28 in a non-leap year.
        let pattern = RecurrencePattern::monthly("u", 1, 31);
        let next = pattern.next_occurrence(date(2026, 1, 31, 8)).unwrap();
        assert_eq!(next, date(2026, 2, 28, 8));
    }

    #[test]
    fn test_monthly_clamps_to_leap_february() {
        let pattern = RecurrencePattern::monthly("u", 1, 31);
        let next = pattern.next_occurrence(date(2028, 1, 31, 8)).unwrap();
        assert_eq!(next, date(2028, 2, 29, 8));
    }

    #[test]
    fn test_monthly_year_rollover() {
        let pattern = RecurrencePattern::monthly("u", 3, 10);
        let next = pattern.next_occurrence(date(2026, 11, 10, 8)).unwrap();
        assert_eq!(next, date(2027, 2, 10, 8));
    }

    #[test]
    fn test_yearly_feb_29_in_non_leap_year() {
        let pattern = RecurrencePattern::yearly("u", 1, 2, 29);
        let next = pattern.next_occurrence(date(2028, 2, 29, 8)).unwrap();
        assert_eq!(next, date(2029, 2, 28, 8));
    }

    #[test]
    fn test_ends_when_anchor_past_end_date() {
        let pattern = RecurrencePattern::daily("u", 1).with_end_date(date(2026, 3, 1, 0));
        assert!(pattern.next_occurrence(date(2026, 3, 2, 0)).is_none());
    }

    #[test]
    fn test_ends_when_next_exceeds_end_date() {
        let pattern = RecurrencePattern::daily("u", 7).with_end_date(date(2026, 3, 5, 0));
        assert!(pattern.next_occurrence(date(2026, 3, 1, 0)).is_none());
    }

    #[test]
    fn test_eventually_exhausts_past_end_date() {
        let pattern = RecurrencePattern::daily("u", 1).with_end_date(date(2026, 3, 10, 12));
        let mut anchor = date(2026, 3, 1, 12);
        let mut occurrences = 0;
        while let Some(next) = pattern.next_occurrence(anchor) {
            anchor = next;
            occurrences += 1;
            assert!(occurrences < 100, "recurrence never ended");
        }
        assert_eq!(occurrences, 9);
    }

    #[test]
    fn test_determinism() {
        let pattern = RecurrencePattern::weekly("u", 2, vec![1, 3]);
        let anchor = date(2026, 5, 7, 14);
        assert_eq!(pattern.next_occurrence(anchor), pattern.next_occurrence(anchor));
    }

    #[test]
    fn test_zero_interval_treated_as_one() {
        let pattern = RecurrencePattern::daily("u", 0);
        let next = pattern.next_occurrence(date(2026, 3, 1, 9)).unwrap();
        assert_eq!(next, date(2026, 3, 2, 9));
    }

    #[test]
    fn test_describe() {
        assert_eq!(RecurrencePattern::daily("u", 1).describe(), "Every day");
        assert_eq!(RecurrencePattern::daily("u", 3).describe(), "Every 3 days");
        assert_eq!(
            RecurrencePattern::weekly("u", 1, vec![0, 4]).describe(),
            "Every Monday, Friday"
        );
        assert_eq!(
            RecurrencePattern::weekly("u", 2, vec![2]).describe(),
            "Every 2 weeks on Wednesday"
        );
        assert_eq!(
            RecurrencePattern::monthly("u", 1, 21).describe(),
            "Every month on the 21st"
        );
        assert_eq!(
            RecurrencePattern::yearly("u", 1, 3, 1).describe(),
            "Every year on March 1"
        );
        assert_eq!(
            RecurrencePattern::custom("u", 4).describe(),
            "Every 4 days (custom)"
        );
    }
}
