//! History command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use setsense_store::{Store, WorkoutQuery};

use crate::cli::OutputFormat;
use crate::format::{format_history_json, format_history_text, format_stats};

/// Arguments for the history command.
pub struct HistoryArgs<'a> {
    pub database: &'a Path,
    pub user: String,
    pub machine: Option<String>,
    pub limit: u32,
    pub format: OutputFormat,
    pub stats: bool,
    pub quiet: bool,
}

pub fn cmd_history(args: HistoryArgs<'_>) -> Result<()> {
    let HistoryArgs {
        database,
        user,
        machine,
        limit,
        format,
        stats,
        quiet,
    } = args;

    let store = Store::open(database)
        .with_context(|| format!("Failed to open database: {}", database.display()))?;

    let json = matches!(format, OutputFormat::Json);
    if stats {
        let stats = store
            .user_stats(&user)
            .context("Failed to compute workout totals")?;
        print!("{}", format_stats(&stats, json)?);
        return Ok(());
    }

    let mut query = WorkoutQuery::new().user(&user);
    if let Some(machine) = &machine {
        query = query.machine(machine);
    }
    if limit > 0 {
        query = query.limit(limit);
    }
    let records = store
        .query_workouts(&query)
        .context("Failed to query workouts")?;

    if !quiet && !json {
        eprintln!("Workouts for {}", user);
    }
    let content = if json {
        format_history_json(&records)?
    } else {
        format_history_text(&records)
    };
    print!("{}", content);
    Ok(())
}
