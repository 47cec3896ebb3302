//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Reusable sensor selection arguments
#[derive(Debug, Clone, Default, Args)]
pub struct SensorArgs {
    /// Advertised sensor name, or use SETSENSE_SENSOR env var
    #[arg(short, long, env = "SETSENSE_SENSOR")]
    pub sensor: Option<String>,

    /// Sensor hardware address, preferred over the name when both are known
    #[arg(short, long, env = "SETSENSE_SENSOR_ADDRESS")]
    pub address: Option<String>,

    /// Scan window in seconds (overrides config)
    #[arg(short = 'T', long)]
    pub timeout: Option<u64>,
}

#[derive(Parser)]
#[command(name = "setsense")]
#[command(author, version, about = "Rep counting for strength-training machines", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Workout database path (overrides config)
    #[arg(long, global = true, env = "SETSENSE_DATABASE")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List peripherals advertising nearby
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Include peripherals without a name
        #[arg(long)]
        all: bool,
    },

    /// Connect to a sensor and count a workout
    Workout {
        #[command(flatten)]
        sensor: SensorArgs,

        /// Number of sets (1-20, non-numeric falls back to 3)
        #[arg(long, default_value = "3")]
        sets: String,

        /// Reps per set (1-50, non-numeric falls back to 10)
        #[arg(long, default_value = "10")]
        reps: String,

        /// Machine name stored with the workout
        #[arg(short, long, default_value = "")]
        machine: String,

        /// User id (overrides config)
        #[arg(short, long)]
        user: Option<String>,

        /// Skip the sensor and count by hand only
        #[arg(long)]
        manual: bool,
    },

    /// Show stored workouts
    History {
        /// User id (overrides config)
        #[arg(short, long)]
        user: Option<String>,

        /// Only workouts on this machine
        #[arg(short, long)]
        machine: Option<String>,

        /// Maximum number of workouts (0 for all)
        #[arg(short = 'n', long, default_value = "0")]
        limit: u32,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Show totals instead of individual workouts
        #[arg(long)]
        stats: bool,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the configuration file path
    Path,
    /// Print the effective configuration
    Show,
    /// Set the default user id
    SetUser {
        /// User id stored with every workout
        user: String,
    },
    /// Set the default sensor
    SetSensor {
        /// Advertised sensor name
        name: String,

        /// Sensor hardware address
        #[arg(short, long)]
        address: Option<String>,
    },
}
