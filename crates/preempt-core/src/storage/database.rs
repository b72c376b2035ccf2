//! SQLite persistence for contexts, observations and the task graph.
//!
//! Contexts and tasks are stored as JSON bodies next to a few indexed columns.
//! Observations and prerequisite edges get their own tables so history and
//! graph structure survive independently of the JSON layout.

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::{params, Connection};

use super::{data_dir, migrations};
use crate::context::{BoundaryLog, BoundaryObservation, Context, ContextRegistry};
use crate::error::StorageError;
use crate::task::{Task, TaskGraph};

const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// SQLite store for the planner's state.
pub struct PlanStore {
    conn: Connection,
}

impl PlanStore {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `<data dir>/preempt.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StorageError> {
        Self::open_at(&data_dir()?.join("preempt.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(|source| StorageError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::migrate(&conn).map_err(|e| StorageError::MigrationFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Replace the stored state with `graph` and `contexts` in one transaction.
    pub fn save(&self, graph: &TaskGraph, contexts: &ContextRegistry) -> Result<(), StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(
            "DELETE FROM task_edges;
             DELETE FROM tasks;
             DELETE FROM boundary_observations;
             DELETE FROM contexts;",
        )?;

        for context in contexts.iter() {
            let mut definition = context.clone();
            definition.log = BoundaryLog::default();
            let body = encode("contexts", &definition)?;
            tx.execute(
                "INSERT INTO contexts (id, name, definition, log_version, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    context.id,
                    context.name,
                    body,
                    context.log.version as i64,
                    context.created_at.to_rfc3339()
                ],
            )?;
            for (seq, obs) in context.log.observations.iter().enumerate() {
                tx.execute(
                    "INSERT INTO boundary_observations
                     (context_id, seq, date, actual_start, actual_end, start_delta_secs, end_delta_secs)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        context.id,
                        seq as i64,
                        obs.date.to_string(),
                        obs.actual_start.format(TIME_FORMAT).to_string(),
                        obs.actual_end.format(TIME_FORMAT).to_string(),
                        obs.start_delta_secs,
                        obs.end_delta_secs
                    ],
                )?;
            }
        }

        for task in graph.iter() {
            let body = encode("tasks", task)?;
            tx.execute(
                "INSERT INTO tasks (id, name, status, context_id, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    task.id,
                    task.name,
                    task.status.to_string(),
                    task.context_id,
                    body,
                    task.updated_at.to_rfc3339()
                ],
            )?;
            for prerequisite in &task.prerequisites {
                tx.execute(
                    "INSERT INTO task_edges (prerequisite, dependent) VALUES (?1, ?2)",
                    params![prerequisite, task.id],
                )?;
            }
        }

        tx.commit()?;
        tracing::debug!(tasks = graph.len(), contexts = contexts.len(), "state saved");
        Ok(())
    }

    /// Load the stored graph and registry.
    pub fn load(&self) -> Result<(TaskGraph, ContextRegistry), StorageError> {
        let contexts = self.load_contexts()?;
        let graph = self.load_graph()?;
        Ok((graph, contexts))
    }

    fn load_contexts(&self) -> Result<ContextRegistry, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, definition, log_version FROM contexts ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut contexts = Vec::with_capacity(rows.len());
        for (id, definition, log_version) in rows {
            let mut context: Context = decode("contexts", &definition)?;
            if context.revisions.is_empty() {
                return Err(StorageError::Corrupt {
                    table: "contexts".into(),
                    message: format!("context '{id}' has no revisions"),
                });
            }
            context.log = BoundaryLog {
                version: log_version.max(0) as u64,
                observations: self.load_observations(&id)?,
            };
            contexts.push(context);
        }
        Ok(ContextRegistry::from_contexts(contexts))
    }

    fn load_observations(&self, context_id: &str) -> Result<Vec<BoundaryObservation>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT date, actual_start, actual_end, start_delta_secs, end_delta_secs
             FROM boundary_observations WHERE context_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([context_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(date, start, end, start_delta_secs, end_delta_secs)| {
                Ok(BoundaryObservation {
                    date: parse_date(&date)?,
                    actual_start: parse_time(&start)?,
                    actual_end: parse_time(&end)?,
                    start_delta_secs,
                    end_delta_secs,
                })
            })
            .collect()
    }

    fn load_graph(&self) -> Result<TaskGraph, StorageError> {
        let mut stmt = self.conn.prepare("SELECT body FROM tasks ORDER BY id")?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut tasks: Vec<Task> = bodies
            .iter()
            .map(|body| decode("tasks", body))
            .collect::<Result<_, _>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT prerequisite, dependent FROM task_edges ORDER BY dependent, prerequisite")?;
        let edges = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        for task in &mut tasks {
            task.prerequisites.clear();
        }
        for (prerequisite, dependent) in edges {
            let Some(task) = tasks.iter_mut().find(|t| t.id == dependent) else {
                return Err(StorageError::Corrupt {
                    table: "task_edges".into(),
                    message: format!("edge to unknown task '{dependent}'"),
                });
            };
            task.prerequisites.insert(prerequisite);
        }

        Ok(tasks.into_iter().collect())
    }

    /// Number of stored tasks by status, for diagnostics.
    pub fn status_counts(&self) -> Result<Vec<(String, i64)>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status ORDER BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Last update time across tasks.
    pub fn last_updated(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT MAX(updated_at) FROM tasks", [], |row| row.get(0))?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| corrupt("tasks", e))
        })
        .transpose()
    }
}

fn encode<T: serde::Serialize>(table: &str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::QueryFailed(format!("{table}: {e}")))
}

fn decode<T: serde::de::DeserializeOwned>(table: &str, body: &str) -> Result<T, StorageError> {
    serde_json::from_str(body).map_err(|e| corrupt(table, e))
}

fn corrupt(table: &str, err: impl std::fmt::Display) -> StorageError {
    StorageError::Corrupt {
        table: table.to_string(),
        message: err.to_string(),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, StorageError> {
    raw.parse().map_err(|e| corrupt("boundary_observations", e))
}

fn parse_time(raw: &str) -> Result<NaiveTime, StorageError> {
    NaiveTime::parse_from_str(raw, TIME_FORMAT).map_err(|e| corrupt("boundary_observations", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ActiveDays, ContextException};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn state() -> (TaskGraph, ContextRegistry) {
        let mut contexts = ContextRegistry::new();
        contexts
            .add(
                Context::new("Work", ActiveDays::weekdays(), t(9, 0), t(17, 0), 10)
                    .with_id("work")
                    .with_exception(ContextException {
                        date: NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
                        start: t(10, 0),
                        end: t(14, 0),
                        buffer_minutes: 0,
                        label: Some("half day".into()),
                    }),
            )
            .unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        contexts.record_observation("work", day, t(9, 12), t(16, 55)).unwrap();
        contexts.record_observation("work", day + chrono::Duration::days(7), t(9, 3), t(17, 20)).unwrap();

        let mut graph = TaskGraph::new();
        graph.insert(Task::new("Draft", "work", 60).with_id("draft")).unwrap();
        graph.insert(Task::new("Review", "work", 30).with_id("review").with_priority(7)).unwrap();
        graph.add_prerequisite("review", "draft").unwrap();
        (graph, contexts)
    }

    #[test]
    fn round_trips_everything() {
        let store = PlanStore::open_memory().unwrap();
        let (graph, contexts) = state();
        store.save(&graph, &contexts).unwrap();

        let (loaded_graph, loaded_contexts) = store.load().unwrap();
        assert_eq!(loaded_graph, graph);
        assert_eq!(loaded_contexts, contexts);
        let work = loaded_contexts.get("work").unwrap();
        assert_eq!(work.log.len(), 2);
        assert_eq!(work.log.observations[0].start_delta_secs, 12 * 60);
        assert!(loaded_graph.get("draft").unwrap().dependents.contains("review"));
    }

    #[test]
    fn save_replaces_previous_state() {
        let store = PlanStore::open_memory().unwrap();
        let (mut graph, contexts) = state();
        store.save(&graph, &contexts).unwrap();
        graph.remove("review").unwrap();
        store.save(&graph, &contexts).unwrap();
        let (loaded, _) = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get("draft").unwrap().dependents.is_empty());
    }

    #[test]
    fn context_without_revisions_is_corrupt() {
        let store = PlanStore::open_memory().unwrap();
        let (graph, contexts) = state();
        store.save(&graph, &contexts).unwrap();
        store
            .conn
            .execute(
                "UPDATE contexts SET definition = json_set(definition, '$.revisions', json('[]'))",
                [],
            )
            .unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { ref table, .. } if table == "contexts"));
    }

    #[test]
    fn persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preempt.db");
        let (graph, contexts) = state();
        PlanStore::open_at(&path).unwrap().save(&graph, &contexts).unwrap();

        let reopened = PlanStore::open_at(&path).unwrap();
        let (loaded_graph, _) = reopened.load().unwrap();
        assert_eq!(loaded_graph, graph);
        assert_eq!(
            reopened.status_counts().unwrap(),
            vec![("pending".to_string(), 1), ("ready".to_string(), 1)]
        );
    }
}
