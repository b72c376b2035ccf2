//! Task management commands for CLI.

use clap::Subcommand;
use preempt_core::task::{CompletionDetails, FollowUpSpec};
use preempt_core::{TaskDraft, TaskStatus};

use super::{parse_instant, CmdResult, Session};

#[derive(Subcommand)]
pub enum TaskAction {
    /// Add a task to a context
    Add {
        /// Task name
        name: String,
        /// Context id or name
        #[arg(long, short)]
        context: String,
        /// Estimated duration in minutes
        #[arg(long, short)]
        minutes: u32,
        /// Deadline ("YYYY-MM-DD HH:MM" UTC, or RFC 3339)
        #[arg(long)]
        deadline: Option<String>,
        /// Priority 0-10
        #[arg(long)]
        priority: Option<u8>,
        /// Prerequisite task (repeatable)
        #[arg(long = "after")]
        after: Vec<String>,
        /// Task description
        #[arg(long)]
        description: Option<String>,
        /// Follow-up rule to run on completion (e.g. "appointment")
        #[arg(long)]
        follow_up: Option<String>,
        /// Follow-up rule parameters as JSON
        #[arg(long, default_value = "{}")]
        follow_up_params: String,
    },
    /// List tasks
    List {
        /// Only tasks with this status
        #[arg(long)]
        status: Option<String>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a task completed
    Complete {
        /// Task id, id prefix or name
        id: String,
        /// Booked time for follow-up rules ("YYYY-MM-DD HH:MM" UTC)
        #[arg(long)]
        booked_at: Option<String>,
    },
    /// Make a task depend on another
    Depend {
        /// Dependent task
        id: String,
        /// Prerequisite task
        on: String,
    },
    /// Record minutes worked on a task
    Work {
        id: String,
        minutes: u32,
    },
    /// Mark a task as in progress
    Start {
        id: String,
    },
    /// Remove a task nothing depends on
    Remove {
        id: String,
    },
}

pub fn run(action: TaskAction) -> CmdResult {
    let session = Session::open()?;

    match action {
        TaskAction::Add {
            name,
            context,
            minutes,
            deadline,
            priority,
            after,
            description,
            follow_up,
            follow_up_params,
        } => {
            let mut draft = TaskDraft::new(name, context, minutes);
            draft.deadline = deadline.as_deref().map(parse_instant).transpose()?;
            draft.priority = priority;
            draft.description = description.unwrap_or_default();
            draft.prerequisites = after
                .iter()
                .map(|reference| session.task_id(reference))
                .collect::<CmdResult<Vec<_>>>()?;
            if let Some(rule) = follow_up {
                draft.follow_up = Some(FollowUpSpec {
                    rule,
                    params: serde_json::from_str(&follow_up_params)?,
                });
            }

            let task = session.planner.add_task(draft)?;
            println!("Task created: {}", task.id);
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TaskAction::List { status, json } => {
            let (graph, _) = session.planner.snapshot();
            let tasks: Vec<_> = graph
                .iter()
                .filter(|t| status.as_deref().map_or(true, |s| t.status.to_string() == s))
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                println!("No tasks");
            } else {
                for task in tasks {
                    let deadline = task
                        .deadline
                        .map(|d| format!("  due {}", d.format("%Y-%m-%d %H:%M")))
                        .unwrap_or_default();
                    println!(
                        "{}  {:<11} {:>4}m  {}{}",
                        &task.id[..task.id.len().min(8)],
                        task.status.to_string(),
                        task.remaining().num_minutes(),
                        task.name,
                        deadline
                    );
                }
            }
            return Ok(());
        }
        TaskAction::Complete { id, booked_at } => {
            let id = session.task_id(&id)?;
            let mut details = CompletionDetails::now();
            if let Some(booked) = booked_at {
                details = details.booked_for(parse_instant(&booked)?);
            }
            let completion = session.planner.mark_completed(&id, details)?;
            println!("Task completed: {id}");
            for ready in &completion.newly_ready {
                println!("  ready: {ready}");
            }
            for created in &completion.created {
                println!("  created: {} ({})", created.id, created.name);
            }
        }
        TaskAction::Depend { id, on } => {
            let id = session.task_id(&id)?;
            let on = session.task_id(&on)?;
            session.planner.add_prerequisite(&id, &on)?;
            println!("{id} now depends on {on}");
        }
        TaskAction::Work { id, minutes } => {
            let id = session.task_id(&id)?;
            session.planner.record_work(&id, minutes)?;
            println!("Recorded {minutes} minutes on {id}");
        }
        TaskAction::Start { id } => {
            let id = session.task_id(&id)?;
            session.planner.set_status(&id, TaskStatus::InProgress)?;
            println!("Task started: {id}");
        }
        TaskAction::Remove { id } => {
            let id = session.task_id(&id)?;
            let removed = session.planner.remove_task(&id)?;
            println!("Task removed: {} ({})", removed.id, removed.name);
        }
    }

    session.save()
}
