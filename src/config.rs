use std::path::PathBuf;

use chrono::{Days, Utc};

use crate::engine::interval::parse_day;
use crate::engine::EngineError;
use crate::limits::MAX_RETRY_ATTEMPTS;
use crate::model::{DateRange, Day};

const DEFAULT_REPORT_DAYS: u64 = 90;

/// Settings for the `staycal` binary, read from `STAYCAL_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub organization_id: String,
    /// JSON snapshot of reservations and blocks.
    pub bookings: Option<PathBuf>,
    /// JSON array of loose rule records to upsert before reporting.
    pub rules_import: Option<PathBuf>,
    pub window: DateRange,
    pub compact_threshold: u64,
    pub retry_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, EngineError> {
        let today = Utc::now().date_naive();
        Self::from_lookup(|key| std::env::var(key).ok(), today)
    }

    /// Build from any variable lookup. Unparseable numbers fall back to
    /// defaults; unparseable dates are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, today: Day) -> Result<Self, EngineError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let organization_id =
            get("STAYCAL_ORG").ok_or_else(|| EngineError::InvalidRecord("STAYCAL_ORG is required".into()))?;

        let from = match get("STAYCAL_FROM") {
            Some(s) => parse_day(&s)?,
            None => today,
        };
        let to = match get("STAYCAL_TO") {
            Some(s) => parse_day(&s)?,
            None => from
                .checked_add_days(Days::new(DEFAULT_REPORT_DAYS))
                .ok_or_else(|| EngineError::InvalidRecord("STAYCAL_FROM is too late".into()))?,
        };

        Ok(Self {
            data_dir: get("STAYCAL_DATA_DIR").map_or_else(|| PathBuf::from("./data"), PathBuf::from),
            organization_id,
            bookings: get("STAYCAL_BOOKINGS").map(PathBuf::from),
            rules_import: get("STAYCAL_RULES_IMPORT").map(PathBuf::from),
            window: DateRange::new(from, to)?,
            compact_threshold: get("STAYCAL_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            retry_attempts: get("STAYCAL_RETRY_ATTEMPTS")
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(3)
                .clamp(1, MAX_RETRY_ATTEMPTS),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn d(s: &str) -> Day {
        s.parse().unwrap()
    }

    fn load(vars: &[(&str, &str)]) -> Result<Config, EngineError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| map.get(k).cloned(), d("2026-03-01"))
    }

    #[test]
    fn defaults() {
        let cfg = load(&[("STAYCAL_ORG", "acme")]).unwrap();
        assert_eq!(cfg.organization_id, "acme");
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.window, DateRange::new(d("2026-03-01"), d("2026-05-30")).unwrap());
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.retry_attempts, 3);
        assert!(cfg.bookings.is_none());
        assert!(cfg.rules_import.is_none());
    }

    #[test]
    fn overrides() {
        let cfg = load(&[
            ("STAYCAL_ORG", "acme"),
            ("STAYCAL_DATA_DIR", "/var/lib/staycal"),
            ("STAYCAL_BOOKINGS", "bookings.json"),
            ("STAYCAL_FROM", "2026-06-01"),
            ("STAYCAL_TO", "2026-06-15T00:00:00Z"),
            ("STAYCAL_COMPACT_THRESHOLD", "50"),
            ("STAYCAL_RETRY_ATTEMPTS", "40"),
        ])
        .unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/staycal"));
        assert_eq!(cfg.bookings, Some(PathBuf::from("bookings.json")));
        assert_eq!(cfg.window, DateRange::new(d("2026-06-01"), d("2026-06-15")).unwrap());
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.retry_attempts, MAX_RETRY_ATTEMPTS);
    }

    #[test]
    fn bad_numbers_fall_back() {
        let cfg = load(&[
            ("STAYCAL_ORG", "acme"),
            ("STAYCAL_COMPACT_THRESHOLD", "lots"),
            ("STAYCAL_RETRY_ATTEMPTS", "-2"),
        ])
        .unwrap();
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.retry_attempts, 3);
    }

    #[test]
    fn errors() {
        assert!(load(&[]).is_err());
        assert!(load(&[("STAYCAL_ORG", "  ")]).is_err());
        assert!(load(&[("STAYCAL_ORG", "acme"), ("STAYCAL_FROM", "June 1st")]).is_err());
        assert!(matches!(
            load(&[("STAYCAL_ORG", "acme"), ("STAYCAL_FROM", "2026-06-10"), ("STAYCAL_TO", "2026-06-01")]),
            Err(EngineError::InvalidRange { .. })
        ));
    }
}
