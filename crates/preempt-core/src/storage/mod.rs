mod config;
pub mod database;
pub mod migrations;

pub use config::{Config, HorizonConfig, PomodoroConfig, PredictionConfig, PrioritySettings};
pub use database::PlanStore;

use std::path::PathBuf;

use crate::error::StorageError;

/// Returns the data directory, creating it when missing.
///
/// `PREEMPT_DATA_DIR` wins when set. Otherwise `~/.config/preempt/`, or
/// `~/.config/preempt-dev/` with `PREEMPT_ENV=dev`.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, StorageError> {
    let dir = match std::env::var_os("PREEMPT_DATA_DIR") {
        Some(explicit) if !explicit.is_empty() => PathBuf::from(explicit),
        _ => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("PREEMPT_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("preempt-dev")
            } else {
                base_dir.join("preempt")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| StorageError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
