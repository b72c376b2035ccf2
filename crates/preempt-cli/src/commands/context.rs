//! Context management commands for CLI.

use chrono::Duration;
use clap::Subcommand;
use preempt_core::{BoundaryPredictor, Context, ContextException, ContextPatch};

use super::{parse_date, parse_days, parse_time, today, CmdResult, Session};

#[derive(Subcommand)]
pub enum ContextAction {
    /// Add a recurring context
    Add {
        /// Context name
        name: String,
        /// "weekdays", "daily", or a list like "mon,wed" or "2024-03-08"
        #[arg(long, default_value = "weekdays")]
        days: String,
        /// Nominal start (HH:MM)
        #[arg(long)]
        start: String,
        /// Nominal end (HH:MM)
        #[arg(long)]
        end: String,
        /// Minutes kept free at each edge
        #[arg(long, default_value_t = 0)]
        buffer: u32,
        /// Context suspended while this one is active (repeatable)
        #[arg(long)]
        suspends: Vec<String>,
        /// Allow windows overlapping other contexts
        #[arg(long)]
        allow_overlap: bool,
    },
    /// Edit a context, optionally from a date forward
    Edit {
        /// Context id or name
        reference: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        days: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        buffer: Option<u32>,
        /// Replace the suspended contexts (repeatable)
        #[arg(long)]
        suspends: Option<Vec<String>>,
        #[arg(long)]
        allow_overlap: Option<bool>,
        /// First date the edit applies to (YYYY-MM-DD); all dates when omitted
        #[arg(long)]
        from: Option<String>,
    },
    /// Show a context and its predicted windows
    Show {
        reference: String,
        /// First date to predict (YYYY-MM-DD, default today)
        #[arg(long)]
        from: Option<String>,
        /// Days to predict
        #[arg(long, default_value_t = 7)]
        days: u32,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// List contexts
    List,
    /// Record when a context actually started and ended
    Observe {
        reference: String,
        /// Date (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
    /// Add a one-off window on a date
    Except {
        reference: String,
        #[arg(long)]
        date: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, default_value_t = 0)]
        buffer: u32,
        #[arg(long)]
        label: Option<String>,
    },
}

pub fn run(action: ContextAction) -> CmdResult {
    let session = Session::open()?;

    match action {
        ContextAction::Add {
            name,
            days,
            start,
            end,
            buffer,
            suspends,
            allow_overlap,
        } => {
            let suspends = suspends
                .iter()
                .map(|reference| resolve_context(&session, reference))
                .collect::<CmdResult<Vec<_>>>()?;
            let mut context = Context::new(name, parse_days(&days)?, parse_time(&start)?, parse_time(&end)?, buffer)
                .suspending(suspends);
            if allow_overlap {
                context = context.allowing_overlap();
            }
            let context = session.planner.add_context(context)?;
            println!("Context created: {} ({})", context.id, context.name);
        }
        ContextAction::Edit {
            reference,
            name,
            days,
            start,
            end,
            buffer,
            suspends,
            allow_overlap,
            from,
        } => {
            let patch = ContextPatch {
                name,
                days: days.as_deref().map(parse_days).transpose()?,
                nominal_start: start.as_deref().map(parse_time).transpose()?,
                nominal_end: end.as_deref().map(parse_time).transpose()?,
                buffer_minutes: buffer,
                suspends: suspends
                    .map(|refs| {
                        refs.iter()
                            .map(|r| resolve_context(&session, r))
                            .collect::<CmdResult<Vec<_>>>()
                    })
                    .transpose()?,
                allow_overlap,
            };
            let from = from.as_deref().map(parse_date).transpose()?;
            let context = session.planner.edit_context(&reference, &patch, from)?;
            match from {
                Some(date) => println!("Context updated from {date}: {}", context.name),
                None => println!("Context updated: {}", context.name),
            }
        }
        ContextAction::Show {
            reference,
            from,
            days,
            json,
        } => {
            let context = session
                .planner
                .context(&reference)
                .ok_or_else(|| format!("unknown context '{reference}'"))?;
            let from = from.as_deref().map(parse_date).transpose()?.unwrap_or_else(today);
            let predictor = BoundaryPredictor::with_config(session.config.predictor());
            let mut windows = Vec::new();
            for offset in 0..days {
                let date = from + Duration::days(offset as i64);
                match predictor.predict(&context, date) {
                    Ok(Some(window)) => windows.push(window),
                    Ok(None) => {}
                    Err(e) => eprintln!("{date}: {e}"),
                }
            }

            if json {
                let value = serde_json::json!({ "context": context, "windows": windows });
                println!("{}", serde_json::to_string_pretty(&value)?);
                return Ok(());
            }

            let revision = context.revision_on(from);
            println!("{} ({})", context.name, context.id);
            println!("  days:    {}", revision.days.describe());
            if let (Some(start), Some(end)) = (revision.nominal_start, revision.nominal_end) {
                println!("  nominal: {} - {}", start.format("%H:%M"), end.format("%H:%M"));
            }
            println!("  buffer:  {}m", revision.buffer_minutes);
            if !context.suspends.is_empty() {
                println!("  suspends: {}", context.suspends.join(", "));
            }
            println!("  samples: {}", context.log.len());
            for window in windows {
                let flag = if window.low_confidence() { "  (low confidence)" } else { "" };
                println!(
                    "  {}  start {} [{}-{}]  end {} [{}-{}]{}",
                    window.date,
                    window.start.expected.format("%H:%M"),
                    window.start.earliest.format("%H:%M"),
                    window.start.latest.format("%H:%M"),
                    window.end.expected.format("%H:%M"),
                    window.end.earliest.format("%H:%M"),
                    window.end.latest.format("%H:%M"),
                    flag
                );
            }
            return Ok(());
        }
        ContextAction::List => {
            let (_, contexts) = session.planner.snapshot();
            if contexts.is_empty() {
                println!("No contexts");
            }
            for context in contexts.iter() {
                let revision = context.revision_on(today());
                let times = match (revision.nominal_start, revision.nominal_end) {
                    (Some(start), Some(end)) => format!("{}-{}", start.format("%H:%M"), end.format("%H:%M")),
                    _ => "no times".to_string(),
                };
                println!("{}  {:<12} {}  {}", &context.id[..context.id.len().min(8)], context.name, times, revision.days.describe());
            }
            return Ok(());
        }
        ContextAction::Observe {
            reference,
            date,
            start,
            end,
        } => {
            let date = date.as_deref().map(parse_date).transpose()?.unwrap_or_else(today);
            let observation = session.planner.record_boundary_observation(
                &reference,
                date,
                parse_time(&start)?,
                parse_time(&end)?,
            )?;
            println!(
                "Recorded {date}: start {:+}m, end {:+}m",
                observation.start_delta_secs / 60,
                observation.end_delta_secs / 60
            );
        }
        ContextAction::Except {
            reference,
            date,
            start,
            end,
            buffer,
            label,
        } => {
            let exception = ContextException {
                date: parse_date(&date)?,
                start: parse_time(&start)?,
                end: parse_time(&end)?,
                buffer_minutes: buffer,
                label,
            };
            let context = session.planner.add_context_exception(&reference, exception)?;
            println!("Exception added to {} on {date}", context.name);
        }
    }

    session.save()
}

fn resolve_context(session: &Session, reference: &str) -> CmdResult<String> {
    session
        .planner
        .context(reference)
        .map(|c| c.id)
        .ok_or_else(|| format!("unknown context '{reference}'").into())
}
