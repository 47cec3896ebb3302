//! Command implementations for the CLI.

mod config;
mod history;
mod scan;
mod workout;

pub use config::cmd_config;
pub use history::{HistoryArgs, cmd_history};
pub use scan::cmd_scan;
pub use workout::{WorkoutArgs, cmd_workout};
