//! Core error types for preempt-core.
//!
//! Structural problems (unknown references, cycles, overlapping windows) are
//! rejected at the mutating call through [`PlanError`]. Feasibility problems
//! never surface here: they are recorded as schedule state instead.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for preempt-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Planning model errors
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the task graph, context registry and predictor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A context reference did not resolve.
    #[error("Unknown context: {0}")]
    InvalidContext(String),

    /// A task reference did not resolve.
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// The edge would close a cycle. `path` runs from the prerequisite back to the task.
    #[error("Dependency cycle: {task} cannot depend on {prerequisite} ({})", path.join(" -> "))]
    DependencyCycle {
        task: String,
        prerequisite: String,
        path: Vec<String>,
    },

    /// Two context windows collide without an override.
    #[error("Context '{context}' overlaps '{existing}' on {day}")]
    OverlappingContext {
        context: String,
        existing: String,
        day: String,
    },

    /// The context cannot produce a usable window.
    #[error("Context '{context}' is unschedulable: {reason}")]
    UnschedulableContext { context: String, reason: String },

    /// Even the full capacity before the deadline is too small.
    #[error("Task '{task}' needs {required_minutes} min but only {available_minutes} min fit before its deadline")]
    InfeasibleDeadline {
        task: String,
        required_minutes: i64,
        available_minutes: i64,
    },

    /// A task or context with the same name already exists.
    #[error("'{0}' already exists")]
    DuplicateName(String),

    /// A field failed validation.
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Stored row could not be decoded
    #[error("Corrupt record in '{table}': {message}")]
    Corrupt { table: String, message: String },

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// Data directory could not be determined or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown dotted key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _msg) => {
                if inner.code == rusqlite::ErrorCode::DatabaseLocked {
                    StorageError::Locked
                } else {
                    StorageError::QueryFailed(err.to_string())
                }
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Storage(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
