//! Scan command implementation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use setsense_core::{Advertisement, BtleTransport, DiscoveryService, SharedTransport};

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{format_scan_json, format_scan_text};

pub async fn cmd_scan(
    timeout: u64,
    format: OutputFormat,
    include_unnamed: bool,
    quiet: bool,
    config: &Config,
) -> Result<()> {
    if !quiet && matches!(format, OutputFormat::Text) {
        eprintln!("Scanning for {}s...", timeout);
    }

    let transport: SharedTransport = Arc::new(
        BtleTransport::new()
            .await
            .context("Failed to open Bluetooth adapter")?,
    );
    let discovery = DiscoveryService::new(transport, config.discovery_options(None));
    let result = discovery.survey(Duration::from_secs(timeout)).await;
    discovery.teardown().await;

    let devices: Vec<Advertisement> = result
        .context("Failed to scan for devices")?
        .into_iter()
        .filter(|a| include_unnamed || a.name.is_some() || a.local_name.is_some())
        .collect();

    let content = match format {
        OutputFormat::Json => format_scan_json(&devices)?,
        OutputFormat::Text => format_scan_text(&devices, config.sensor_name.as_deref()),
    };
    print!("{}", content);
    Ok(())
}
