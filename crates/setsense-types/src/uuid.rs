//! Bluetooth UUIDs for setsense rep sensors.
//!
//! The sensor firmware exposes a single custom service with a notifying
//! counter characteristic and an optional status characteristic used only
//! for liveness diagnostics.

use uuid::{Uuid, uuid};

/// Custom rep-counter service.
pub const REP_SERVICE: Uuid = uuid!("4fafc201-1fb5-459e-8fcc-c5c9c331914b");

/// Rep counter characteristic (read + notify). Payloads are ASCII such as
/// `REPS:12` on current firmware, or a raw little-endian counter on early units.
pub const REP_COUNTER: Uuid = uuid!("beb5483e-36e1-4688-b7f5-ea07361b26a8");

/// Status characteristic (notify). Carries heartbeat text; never counted.
pub const REP_STATUS: Uuid = uuid!("1c95d5e3-d8f7-413a-bf3d-7a2e5d7be87e");

/// Default advertised name of the sensor.
pub const DEFAULT_SENSOR_NAME: &str = "RepSensor";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuids_are_distinct() {
        assert_ne!(REP_SERVICE, REP_COUNTER);
        assert_ne!(REP_COUNTER, REP_STATUS);
        assert_ne!(REP_SERVICE, REP_STATUS);
    }
}
