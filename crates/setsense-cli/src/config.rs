//! Configuration file management.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use setsense_core::{DecoderOptions, DiscoveryOptions};
use setsense_types::SensorTarget;
use setsense_types::uuids::{DEFAULT_SENSOR_NAME, REP_COUNTER, REP_SERVICE, REP_STATUS};
use uuid::Uuid;

use crate::cli::SensorArgs;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// User id stored with every workout
    #[serde(default)]
    pub user_id: Option<String>,

    /// Default advertised sensor name
    #[serde(default)]
    pub sensor_name: Option<String>,

    /// Default sensor hardware address
    #[serde(default)]
    pub sensor_address: Option<String>,

    /// Workout database path override
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// GATT layout of the sensor
    #[serde(default)]
    pub gatt: GattConfig,

    /// Scan, poll and adapter timing
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Service and characteristic UUIDs, for sensors flashed with other values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GattConfig {
    #[serde(default = "default_service")]
    pub service: Uuid,

    #[serde(default = "default_primary")]
    pub primary: Uuid,

    /// Status characteristic, read for liveness only.
    #[serde(default = "default_secondary")]
    pub secondary: Option<Uuid>,
}

fn default_service() -> Uuid {
    REP_SERVICE
}

fn default_primary() -> Uuid {
    REP_COUNTER
}

fn default_secondary() -> Option<Uuid> {
    Some(REP_STATUS)
}

impl Default for GattConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            primary: default_primary(),
            secondary: default_secondary(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_scan_window")]
    pub scan_window_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_power_on_wait")]
    pub power_on_wait_secs: u64,

    #[serde(default = "default_permission_probe")]
    pub permission_probe_secs: u64,

    #[serde(default = "default_state_settle")]
    pub state_settle_secs: u64,
}

fn default_scan_window() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    750
}

fn default_power_on_wait() -> u64 {
    5
}

fn default_permission_probe() -> u64 {
    2
}

fn default_state_settle() -> u64 {
    4
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            scan_window_secs: default_scan_window(),
            poll_interval_ms: default_poll_interval(),
            power_on_wait_secs: default_power_on_wait(),
            permission_probe_secs: default_permission_probe(),
            state_settle_secs: default_state_settle(),
        }
    }
}

/// User id used when none is configured.
pub const DEFAULT_USER: &str = "local";

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("setsense")
            .join("config.toml")
    }

    /// Load config from file, or return default if not found
    pub fn load() -> Self {
        let path = Self::path();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match Self::parse(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("Warning: Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    eprintln!("Warning: Failed to read config: {}", e);
                }
            }
        }
        Self::default()
    }

    /// Parse TOML content.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid config file")
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// User id from the flag, then config, then [`DEFAULT_USER`].
    pub fn resolve_user(&self, user: Option<String>) -> String {
        user.or_else(|| self.user_id.clone())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_USER.to_string())
    }

    /// Database path from the flag, then config, then the platform default.
    pub fn resolve_database(&self, database: Option<PathBuf>) -> PathBuf {
        database
            .or_else(|| self.database.clone())
            .unwrap_or_else(setsense_store::default_db_path)
    }

    /// Sensor target from the flags, falling back to config and then the
    /// default sensor name.
    pub fn resolve_target(&self, args: &SensorArgs) -> SensorTarget {
        let name = args
            .sensor
            .clone()
            .or_else(|| self.sensor_name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_SENSOR_NAME.to_string());
        let target = SensorTarget::new(name);
        match args.address.clone().or_else(|| self.sensor_address.clone()) {
            Some(address) if !address.is_empty() => target.with_address(address),
            _ => target,
        }
    }

    /// Discovery options from the `[gatt]` and `[timing]` tables.
    pub fn discovery_options(&self, scan_window: Option<u64>) -> DiscoveryOptions {
        let timing = &self.timing;
        DiscoveryOptions::new()
            .service(self.gatt.service)
            .scan_window(Duration::from_secs(
                scan_window.unwrap_or(timing.scan_window_secs),
            ))
            .power_on_wait(Duration::from_secs(timing.power_on_wait_secs))
            .permission_probe(Duration::from_secs(timing.permission_probe_secs))
            .state_settle(Duration::from_secs(timing.state_settle_secs))
    }

    /// Decoder options from the `[gatt]` and `[timing]` tables.
    pub fn decoder_options(&self) -> Result<DecoderOptions> {
        let options = DecoderOptions::builder()
            .service(self.gatt.service)
            .primary(self.gatt.primary)
            .secondary(self.gatt.secondary)
            .poll_interval(Duration::from_millis(self.timing.poll_interval_ms))
            .build();
        options.validate().context("Invalid [gatt] or [timing] settings")?;
        Ok(options)
    }
}
