//! Platform-agnostic types for setsense rep-counting sensors.
//!
//! This crate holds the plain data shared by the BLE core, the local store
//! and the CLI: sensor targets, session parameters, stream samples, finished
//! workout records, GATT identifiers and the payload parsing rule.
//!
//! # Example
//!
//! ```
//! use setsense_types::{parse_rep_count, SessionParams};
//!
//! let params = SessionParams::from_raw("4", "abc", "Chest Press");
//! assert_eq!(params.target_sets, 4);
//! assert_eq!(params.target_reps, 10);
//!
//! assert_eq!(parse_rep_count("REPS: 7").unwrap(), 7);
//! ```

pub mod error;
pub mod parse;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use parse::{decode_payload, parse_rep_count};
pub use types::{
    Channel, RepStreamSample, SampleSource, SensorTarget, SessionParams, WorkoutRecord,
};
pub use uuid as uuids;
