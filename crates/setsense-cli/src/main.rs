//! `setsense`: count strength-training reps from a BLE sensor.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | List peripherals advertising nearby |
//! | `workout` | Connect to the sensor and count a workout |
//! | `history` | Show stored workouts or per-user totals |
//! | `config` | Manage `config.toml` |

mod cli;
mod commands;
mod config;
mod format;
mod history;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::{HistoryArgs, WorkoutArgs};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();

    match cli.command {
        Commands::Scan {
            timeout,
            format,
            all,
        } => commands::cmd_scan(timeout, format, all, cli.quiet, &config).await,
        Commands::Workout {
            sensor,
            sets,
            reps,
            machine,
            user,
            manual,
        } => {
            let database = config.resolve_database(cli.database);
            let args = WorkoutArgs {
                sensor,
                sets,
                reps,
                machine,
                user: config.resolve_user(user),
                manual,
                database: &database,
                quiet: cli.quiet,
            };
            commands::cmd_workout(args, &config).await
        }
        Commands::History {
            user,
            machine,
            limit,
            format,
            stats,
        } => {
            let database = config.resolve_database(cli.database);
            commands::cmd_history(HistoryArgs {
                database: &database,
                user: config.resolve_user(user),
                machine,
                limit,
                format,
                stats,
                quiet: cli.quiet,
            })
        }
        Commands::Config { action } => commands::cmd_config(action),
    }
}
