//! Utility functions for setsense-core.

use std::time::{SystemTime, UNIX_EPOCH};

use btleplug::platform::PeripheralId;

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms they wrap the
/// BlueZ object path or MAC address.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Hardware address to report for an advertisement.
///
/// macOS reports `00:00:00:00:00:00` for every peripheral; that is treated as
/// no address so matching falls back to the peripheral id.
pub fn usable_address(address: &str) -> Option<String> {
    if address == "00:00:00:00:00:00" {
        None
    } else {
        Some(address.to_string())
    }
}

/// Current Unix time in milliseconds, used to stamp stream samples.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
