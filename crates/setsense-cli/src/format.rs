//! Output formatting for scan results, workout history and live sessions.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use serde::Serialize;
use setsense_core::{Advertisement, RepSource, SessionEvent, SessionStatus};
use setsense_store::UserStats;
use setsense_types::WorkoutRecord;
use time::format_description::well_known::Rfc3339;

fn as_json<T: Serialize>(value: &T) -> Result<String> {
    let mut json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    json.push('\n');
    Ok(json)
}

/// Format scan results as JSON.
pub fn format_scan_json(devices: &[Advertisement]) -> Result<String> {
    #[derive(Serialize)]
    struct ScanResult<'a> {
        count: usize,
        devices: &'a [Advertisement],
    }

    as_json(&ScanResult {
        count: devices.len(),
        devices,
    })
}

/// Format scan results as a table. The configured sensor, if seen, is
/// marked with `*`.
#[must_use]
pub fn format_scan_text(devices: &[Advertisement], configured: Option<&str>) -> String {
    if devices.is_empty() {
        return "No devices found.\n".to_string();
    }

    let mut output = format!("Found {} device(s)\n\n", devices.len());
    let _ = writeln!(output, "  {:<24} {:<38} {:>6}", "Name", "Address", "RSSI");
    for device in devices {
        let marker = match configured {
            Some(name) if device.name.as_deref() == Some(name) => '*',
            _ => ' ',
        };
        let rssi = device
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "-".to_string());
        let address = device.address.as_deref().unwrap_or(&device.id);
        let _ = writeln!(
            output,
            "{} {:<24} {:<38} {:>6}",
            marker,
            device.display_name(),
            address,
            rssi
        );
    }
    output
}

/// Format stored workouts as JSON.
pub fn format_history_json(records: &[WorkoutRecord]) -> Result<String> {
    as_json(&records)
}

/// Format stored workouts, one per line.
#[must_use]
pub fn format_history_text(records: &[WorkoutRecord]) -> String {
    if records.is_empty() {
        return "No workouts found.\n".to_string();
    }

    let mut output = format!("Workouts ({}):\n\n", records.len());
    for record in records {
        let completed = record
            .completed_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| record.completed_at.to_string());
        let sets = record
            .set_reps_completed
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join("/");
        let _ = writeln!(
            output,
            "{}  {:<20} {}x{}  reps {:<12} rest {:>4}s  time {}",
            completed,
            record.machine_name,
            record.sets,
            record.reps,
            sets,
            record.total_rest_seconds(),
            format_duration(record.duration_seconds),
        );
    }
    output
}

/// Format per-user totals.
pub fn format_stats(stats: &UserStats, json: bool) -> Result<String> {
    if json {
        return as_json(stats);
    }
    let mut output = format!("User: {}\n", stats.user_id);
    let _ = writeln!(output, "Workouts:   {}", stats.workouts);
    let _ = writeln!(output, "Total reps: {}", stats.total_reps);
    let _ = writeln!(
        output,
        "Total time: {}",
        format_duration(stats.total_duration_seconds)
    );
    if let Some(average) = stats.average_reps() {
        let _ = writeln!(output, "Avg reps:   {:.1}", average);
    }
    if let Some(last) = &stats.last_workout_at {
        let _ = writeln!(output, "Last:       {}", last);
    }
    Ok(output)
}

/// `h:mm:ss` or `m:ss`.
#[must_use]
pub fn format_duration(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// One status line for a session event. Events not worth showing return `None`.
#[must_use]
pub fn format_event(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::StatusChanged { to, .. } => Some(match to {
            SessionStatus::AwaitingSensor => {
                "No sensor connected. Press + and Enter to count by hand.".to_string()
            }
            SessionStatus::Resting => "Set done. Press c and Enter to continue.".to_string(),
            SessionStatus::Disconnected => {
                "Sensor disconnected. Press r and Enter to reconnect.".to_string()
            }
            other => format!("Session {}.", other),
        }),
        SessionEvent::RepsUpdated {
            set_index,
            reps,
            target_reps,
            source,
        } => {
            let via = match source {
                RepSource::Sensor => "",
                RepSource::Manual => " (manual)",
            };
            Some(format!(
                "Set {}: {}/{} reps{}",
                set_index + 1,
                reps,
                target_reps,
                via
            ))
        }
        SessionEvent::RestTick { elapsed_secs, .. } if elapsed_secs % 15 == 0 => {
            Some(format!("Resting {}", format_duration(*elapsed_secs)))
        }
        SessionEvent::ConnectFailed { message, .. } => Some(message.clone()),
        SessionEvent::WorkoutSaved { record } => Some(format!("Saved workout {}", record)),
        SessionEvent::PersistFailed { error } => {
            Some(format!("Workout could not be saved: {}", error))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use uuid::Uuid;

    fn advertisement(name: Option<&str>, rssi: Option<i16>) -> Advertisement {
        Advertisement {
            id: "hci0/dev_AA".to_string(),
            address: Some("AA:BB:CC:DD:EE:FF".to_string()),
            name: name.map(str::to_string),
            local_name: None,
            rssi,
        }
    }

    fn workout() -> WorkoutRecord {
        WorkoutRecord {
            id: Uuid::nil(),
            user_id: "alex".into(),
            machine_name: "Chest Press".into(),
            sets: 3,
            reps: 10,
            completed_at: datetime!(2026-03-01 18:30:00 UTC),
            set_reps_completed: vec![10, 10, 10],
            set_rest_times: vec![60, 75, 0],
            duration_seconds: 754,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(75), "1:15");
        assert_eq!(format_duration(3_725), "1:02:05");
    }

    #[test]
    fn test_scan_text_marks_configured_sensor() {
        let devices = vec![
            advertisement(Some("RepSensor"), Some(-60)),
            advertisement(Some("Other"), None),
        ];
        let text = format_scan_text(&devices, Some("RepSensor"));
        assert!(text.starts_with("Found 2 device(s)"));
        let lines: Vec<_> = text.lines().collect();
        assert!(lines[3].starts_with("* RepSensor"));
        assert!(lines[3].contains("-60 dBm"));
        assert!(lines[4].starts_with("  Other"));
    }

    #[test]
    fn test_scan_empty() {
        assert_eq!(format_scan_text(&[], None), "No devices found.\n");
    }

    #[test]
    fn test_scan_json() {
        let json = format_scan_json(&[advertisement(Some("RepSensor"), Some(-42))]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["count"], 1);
        assert_eq!(value["devices"][0]["name"], "RepSensor");
        assert_eq!(value["devices"][0]["rssi"], -42);
    }

    #[test]
    fn test_history_text() {
        let text = format_history_text(&[workout()]);
        assert!(text.contains("2026-03-01T18:30:00Z"));
        assert!(text.contains("Chest Press"));
        assert!(text.contains("3x10"));
        assert!(text.contains("10/10/10"));
        assert!(text.contains("rest  135s"));
        assert!(text.contains("time 12:34"));
        assert_eq!(format_history_text(&[]), "No workouts found.\n");
    }

    #[test]
    fn test_history_json_parses_back() {
        let json = format_history_json(&[workout()]).unwrap();
        let parsed: Vec<WorkoutRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, vec![workout()]);
    }

    #[test]
    fn test_event_lines() {
        let reps = SessionEvent::RepsUpdated {
            set_index: 1,
            reps: 4,
            target_reps: 10,
            source: RepSource::Manual,
        };
        assert_eq!(format_event(&reps).as_deref(), Some("Set 2: 4/10 reps (manual)"));

        let resting = SessionEvent::StatusChanged {
            from: SessionStatus::Streaming,
            to: SessionStatus::Resting,
        };
        assert!(format_event(&resting).unwrap().contains("continue"));

        let tick = SessionEvent::RestTick {
            set_index: 0,
            elapsed_secs: 7,
        };
        assert_eq!(format_event(&tick), None);
        let tick = SessionEvent::RestTick {
            set_index: 0,
            elapsed_secs: 30,
        };
        assert_eq!(format_event(&tick).as_deref(), Some("Resting 0:30"));
    }
}
