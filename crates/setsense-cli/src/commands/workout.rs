//! Workout command implementation.
//!
//! Connects to the sensor, hands the connection to a session and counts
//! until every set is done. Commands are read from stdin, one per line:
//! `+` counts a rep, `c` ends the rest period, `r` reconnects a lost sensor
//! and `q` ends the session without saving.

use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use setsense_core::{
    BtleTransport, DiscoveryService, HandoffStore, SessionCommand, SessionController,
    SessionOutcome, SharedTransport,
};
use setsense_types::SessionParams;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cli::SensorArgs;
use crate::config::Config;
use crate::format::{format_duration, format_event};
use crate::history::SqliteHistory;

/// Arguments for the workout command.
pub struct WorkoutArgs<'a> {
    pub sensor: SensorArgs,
    pub sets: String,
    pub reps: String,
    pub machine: String,
    pub user: String,
    pub manual: bool,
    pub database: &'a Path,
    pub quiet: bool,
}

/// Map one input line to a session command.
pub fn parse_command(line: &str) -> Option<SessionCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "+" | "p" | "rep" => Some(SessionCommand::ManualRep),
        "c" | "continue" => Some(SessionCommand::Continue),
        "r" | "retry" => Some(SessionCommand::Retry),
        "q" | "quit" | "end" => Some(SessionCommand::EndEarly),
        _ => None,
    }
}

pub async fn cmd_workout(args: WorkoutArgs<'_>, config: &Config) -> Result<()> {
    let WorkoutArgs {
        sensor,
        sets,
        reps,
        machine,
        user,
        manual,
        database,
        quiet,
    } = args;

    let params = SessionParams::from_raw(&sets, &reps, machine);
    let history = SqliteHistory::open(database)
        .with_context(|| format!("Failed to open database: {}", database.display()))?;
    let decoder = config.decoder_options()?;
    let discovery_options = config.discovery_options(sensor.timeout);

    let handoffs = HandoffStore::new();
    if !manual {
        let target = config.resolve_target(&sensor);
        if !quiet {
            eprintln!("Connecting to {}...", target);
        }
        let transport: SharedTransport = Arc::new(
            BtleTransport::new()
                .await
                .context("Failed to open Bluetooth adapter")?,
        );
        let discovery = DiscoveryService::new(transport, discovery_options.clone());
        match discovery.connect(&target).await {
            Ok(connected) => {
                let label = if params.machine_name.is_empty() {
                    target.name.clone()
                } else {
                    params.machine_name.clone()
                };
                handoffs.publish(discovery.hand_off(connected, label, target));
            }
            Err(e) => {
                warn!("Connect failed: {}", e);
                eprintln!("{}", e.user_message());
                discovery.teardown().await;
            }
        }
    }

    let mut controller = SessionController::new(params.clone(), user, Arc::new(history))
        .decoder_options(decoder)
        .discovery_options(discovery_options);
    let mut events = controller.subscribe();

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = format_event(&event) {
                        println!("{}", line);
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!("Skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if !quiet {
        eprintln!(
            "{}: {} sets of {} reps. Commands: + rep, c continue, r reconnect, q quit",
            if params.machine_name.is_empty() {
                "Workout"
            } else {
                params.machine_name.as_str()
            },
            params.target_sets,
            params.target_reps
        );
    }
    controller.enter(&handoffs).await;

    let (commands, rx) = mpsc::channel(16);
    spawn_stdin_reader(commands.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = commands.send(SessionCommand::EndEarly).await;
        }
    });

    let outcome = controller.run(rx).await.context("Session failed")?;
    let _ = printer.await;

    match outcome {
        SessionOutcome::Completed(record) => {
            println!(
                "Workout complete: {} reps in {}",
                record.total_reps(),
                format_duration(record.duration_seconds)
            );
        }
        SessionOutcome::EndedEarly(state) => {
            println!(
                "Session ended after {} reps. Nothing was saved.",
                state.total_reps()
            );
        }
    }
    Ok(())
}

/// Read commands on a plain thread so a pending read never holds up runtime
/// shutdown. After end of input the sensor keeps counting; Ctrl-C still ends
/// the session.
fn spawn_stdin_reader(commands: mpsc::Sender<SessionCommand>) {
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Some(command) => {
                    if commands.blocking_send(command).is_err() {
                        break;
                    }
                }
                None => eprintln!("Unknown command '{}'. Use +, c, r or q.", line.trim()),
            }
        }
    });
}
