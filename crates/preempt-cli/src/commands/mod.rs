pub mod config;
pub mod context;
pub mod task;
pub mod timeline;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use preempt_core::{ActiveDays, Config, PlanStore, Planner};

pub type CmdResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Planner loaded from the data directory, with the store it came from.
pub struct Session {
    pub config: Config,
    pub store: PlanStore,
    pub planner: Planner,
}

impl Session {
    pub fn open() -> CmdResult<Self> {
        let config = Config::load()?;
        let store = PlanStore::open()?;
        let planner = Planner::load(&store, &config)?;
        Ok(Self {
            config,
            store,
            planner,
        })
    }

    /// Persist the planner and log what changed.
    pub fn save(self) -> CmdResult {
        for event in self.planner.drain_events() {
            tracing::debug!(?event, "planner event");
        }
        self.planner.save(&self.store)?;
        Ok(())
    }

    /// Resolve a task id, unique id prefix, or case-insensitive name.
    pub fn task_id(&self, reference: &str) -> CmdResult<String> {
        let (graph, _) = self.planner.snapshot();
        if graph.contains(reference) {
            return Ok(reference.to_string());
        }
        let matches: Vec<&str> = graph
            .iter()
            .filter(|t| t.id.starts_with(reference) || t.name.eq_ignore_ascii_case(reference))
            .map(|t| t.id.as_str())
            .collect();
        match matches.as_slice() {
            [id] => Ok(id.to_string()),
            [] => Err(format!("no task matches '{reference}'").into()),
            _ => Err(format!("'{reference}' matches {} tasks", matches.len()).into()),
        }
    }
}

pub fn parse_time(value: &str) -> CmdResult<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|e| format!("invalid time '{value}' (expected HH:MM): {e}").into())
}

pub fn parse_date(value: &str) -> CmdResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{value}' (expected YYYY-MM-DD): {e}").into())
}

/// RFC 3339, or `YYYY-MM-DD HH:MM` read as UTC.
pub fn parse_instant(value: &str) -> CmdResult<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M")
        .map(|dt| dt.and_utc())
        .map_err(|e| format!("invalid date-time '{value}': {e}").into())
}

/// `weekdays`, `daily`, or a comma-separated list of weekday names or dates.
pub fn parse_days(value: &str) -> CmdResult<ActiveDays> {
    match value.trim().to_ascii_lowercase().as_str() {
        "weekdays" => return Ok(ActiveDays::weekdays()),
        "daily" | "every-day" => return Ok(ActiveDays::every_day()),
        _ => {}
    }

    let parts: Vec<&str> = value.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    if let Ok(days) = parts.iter().map(|p| p.parse::<Weekday>()).collect::<Result<Vec<_>, _>>() {
        return Ok(ActiveDays::Weekdays(days));
    }
    let dates = parts
        .iter()
        .map(|p| parse_date(p))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| format!("invalid days '{value}' (weekday names or dates, not both)"))?;
    Ok(ActiveDays::Dates(dates))
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_day_lists() {
        assert_eq!(parse_days("weekdays").unwrap(), ActiveDays::weekdays());
        assert_eq!(
            parse_days("mon, wed").unwrap(),
            ActiveDays::Weekdays(vec![Weekday::Mon, Weekday::Wed])
        );
        assert_eq!(
            parse_days("2024-03-08").unwrap(),
            ActiveDays::Dates(vec![NaiveDate::from_ymd_opt(2024, 3, 8).unwrap()])
        );
        assert!(parse_days("mon,2024-03-08").is_err());
    }

    #[test]
    fn parses_instants() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 8)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap()
            .and_utc();
        assert_eq!(parse_instant("2024-03-08 14:00").unwrap(), expected);
        assert_eq!(parse_instant("2024-03-08T14:00:00Z").unwrap(), expected);
        assert!(parse_time("25:00").is_err());
    }
}
