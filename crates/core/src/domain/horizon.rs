use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Forward evaluation windows, ordered from least to most mature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Horizon {
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1m")]
    OneMonth,
    #[serde(rename = "3m")]
    ThreeMonths,
    #[serde(rename = "6m")]
    SixMonths,
    #[serde(rename = "12m")]
    TwelveMonths,
}

// One trading week (Mon..Fri) spans five calendar days from the anchor.
const ONE_WEEK_DAYS: u64 = 5;

impl Horizon {
    pub const ALL: [Horizon; 5] = [
        Horizon::OneWeek,
        Horizon::OneMonth,
        Horizon::ThreeMonths,
        Horizon::SixMonths,
        Horizon::TwelveMonths,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Horizon::OneWeek => "1w",
            Horizon::OneMonth => "1m",
            Horizon::ThreeMonths => "3m",
            Horizon::SixMonths => "6m",
            Horizon::TwelveMonths => "12m",
        }
    }

    /// Calendar target date. Month horizons clamp to the last day of a shorter month.
    pub fn target_date(self, recommendation_date: NaiveDate) -> Option<NaiveDate> {
        match self {
            Horizon::OneWeek => recommendation_date.checked_add_days(Days::new(ONE_WEEK_DAYS)),
            Horizon::OneMonth => recommendation_date.checked_add_months(Months::new(1)),
            Horizon::ThreeMonths => recommendation_date.checked_add_months(Months::new(3)),
            Horizon::SixMonths => recommendation_date.checked_add_months(Months::new(6)),
            Horizon::TwelveMonths => recommendation_date.checked_add_months(Months::new(12)),
        }
    }

    pub fn is_due(self, recommendation_date: NaiveDate, as_of: NaiveDate) -> bool {
        self.target_date(recommendation_date)
            .is_some_and(|target| target <= as_of)
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Horizons that have elapsed at `as_of` and are not yet scored.
pub fn due_horizons(
    recommendation_date: NaiveDate,
    as_of: NaiveDate,
    already_scored: impl Fn(Horizon) -> bool,
) -> Vec<Horizon> {
    Horizon::ALL
        .into_iter()
        .filter(|h| h.is_due(recommendation_date, as_of))
        .filter(|h| !already_scored(*h))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn only_one_week_is_due_after_five_days() {
        let due = due_horizons(d(2024, 1, 1), d(2024, 1, 6), |_| false);
        assert_eq!(due, vec![Horizon::OneWeek]);
    }

    #[test]
    fn nothing_is_due_before_the_first_target() {
        assert!(due_horizons(d(2024, 1, 1), d(2024, 1, 5), |_| false).is_empty());
    }

    #[test]
    fn month_horizons_clamp_to_month_end() {
        assert_eq!(Horizon::OneMonth.target_date(d(2024, 1, 31)), Some(d(2024, 2, 29)));
        assert_eq!(Horizon::OneMonth.target_date(d(2023, 1, 31)), Some(d(2023, 2, 28)));
        assert_eq!(Horizon::SixMonths.target_date(d(2024, 8, 31)), Some(d(2025, 2, 28)));
        assert_eq!(Horizon::TwelveMonths.target_date(d(2024, 2, 29)), Some(d(2025, 2, 28)));
    }

    #[test]
    fn target_date_is_inclusive() {
        assert!(Horizon::ThreeMonths.is_due(d(2024, 1, 15), d(2024, 4, 15)));
        assert!(!Horizon::ThreeMonths.is_due(d(2024, 1, 15), d(2024, 4, 14)));
    }

    #[test]
    fn scored_horizons_are_excluded() {
        let due = due_horizons(d(2024, 1, 1), d(2024, 7, 1), |h| h == Horizon::OneWeek);
        assert_eq!(
            due,
            vec![Horizon::OneMonth, Horizon::ThreeMonths, Horizon::SixMonths]
        );
    }
}
