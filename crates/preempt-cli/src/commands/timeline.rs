//! Build and print the schedule.

use std::collections::BTreeMap;

use chrono::Utc;
use clap::Args;
use preempt_core::{EntryKind, Horizon, ScheduleEntry, TaskOutcome};

use super::{parse_date, CmdResult, Session};

#[derive(Args)]
pub struct TimelineArgs {
    /// First day (YYYY-MM-DD, default from now)
    #[arg(long)]
    from: Option<String>,
    /// Number of days (default from config)
    #[arg(long)]
    days: Option<u32>,
    /// Print the schedule as JSON
    #[arg(long)]
    json: bool,
}

pub fn run(args: TimelineArgs) -> CmdResult {
    let session = Session::open()?;
    let days = args.days.unwrap_or(session.config.horizon.days).max(1);
    let horizon = match args.from.as_deref() {
        Some(value) => Horizon::from_date(parse_date(value)?, days),
        None => Horizon::new(Utc::now(), days),
    };
    let from = horizon.start.date_naive();

    let schedule = session.planner.get_schedule(horizon);

    if args.json {
        println!("{}", schedule.to_json()?);
    } else {
        let names: BTreeMap<&str, &str> = schedule
            .windows
            .iter()
            .map(|w| (w.context_id.as_str(), w.context_name.as_str()))
            .collect();

        // A horizon starting mid-day reaches into one more calendar date.
        for offset in 0..=days {
            let date = from + chrono::Duration::days(offset as i64);
            let entries: Vec<&ScheduleEntry> = schedule
                .entries_on(date)
                .filter(|e| e.kind != EntryKind::Idle)
                .collect();
            if entries.is_empty() {
                continue;
            }
            println!("{}", date.format("%a %Y-%m-%d"));
            for entry in entries {
                let context = names.get(entry.context_id.as_str()).copied().unwrap_or(entry.context_id.as_str());
                let label = match entry.kind {
                    EntryKind::Focus => entry.task_name.clone().unwrap_or_default(),
                    EntryKind::ShortBreak => "short break".to_string(),
                    EntryKind::LongBreak => "long break".to_string(),
                    EntryKind::Idle => String::new(),
                };
                let risk = if entry.at_risk { "  !" } else { "" };
                println!(
                    "  {}-{}  {:<10} {}{}",
                    entry.start_time.format("%H:%M"),
                    entry.end_time.format("%H:%M"),
                    context,
                    label,
                    risk
                );
            }
        }

        for report in schedule.tasks.values() {
            if let Some(error) = report.error() {
                println!("blocked: {error}");
                continue;
            }
            match &report.outcome {
                TaskOutcome::Partial { remaining_minutes, .. } => {
                    println!("unfinished: {} ({remaining_minutes}m left)", report.task_name);
                }
                TaskOutcome::Unplaced => println!("unplaced: {}", report.task_name),
                _ => {}
            }
        }
        for warning in &schedule.warnings {
            println!("warning: {warning}");
        }
    }

    session.save()
}
