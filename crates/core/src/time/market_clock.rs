use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};

// US cash close is 21:00 UTC in summer and 22:00 UTC in winter, after Xetra. Before the cutoff
// the latest complete session is yesterday's.
const DEFAULT_CLOSE_CUTOFF_HOUR_UTC: u32 = 22;

pub fn close_cutoff_hour_utc() -> u32 {
    std::env::var("MARKET_CLOSE_CUTOFF_HOUR_UTC")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|h| *h < 24)
        .unwrap_or(DEFAULT_CLOSE_CUTOFF_HOUR_UTC)
}

/// Evaluation date for a recompute run. An explicit `--as-of-date` always wins.
pub fn resolve_as_of_date(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
    cutoff_hour_utc: u32,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return Ok(NaiveDate::parse_from_str(s, "%Y-%m-%d")?);
    }

    let mut date = now_utc.date_naive();
    if now_utc.hour() < cutoff_hour_utc {
        date = date - Duration::days(1);
    }
    Ok(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn explicit_date_wins() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 23, 0, 0).unwrap();
        let d = resolve_as_of_date(Some("2024-01-06"), now, 22).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2024, 1, 6).unwrap());
    }

    #[test]
    fn rejects_malformed_date() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 23, 0, 0).unwrap();
        assert!(resolve_as_of_date(Some("06.01.2024"), now, 22).is_err());
    }

    #[test]
    fn uses_previous_day_before_cutoff() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 15, 0, 0).unwrap();
        let d = resolve_as_of_date(None, now, 22).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 1, 4).unwrap());
    }

    #[test]
    fn uses_same_day_after_cutoff() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 22, 30, 0).unwrap();
        let d = resolve_as_of_date(None, now, 22).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
    }
}
