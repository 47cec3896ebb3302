//! Error types for setsense-core.
//!
//! # Recovery policy
//!
//! | Error | Where it is handled | Strategy |
//! |-------|---------------------|----------|
//! | [`ConnectError::AdapterUnavailable`] | screen | show message, offer retry |
//! | [`ConnectError::NotFound`] | screen | show message, offer retry |
//! | [`ConnectError::UnexpectedDevice`] | screen | shown as "not found", offer retry |
//! | [`StreamError`] | session controller | move to `Disconnected`, offer retry |
//! | payload parse failures | decoder | logged at debug, never raised |
//! | [`Error::Storage`] | persistence boundary | retried with backoff |
//!
//! Discovery is never retried automatically; every retry is a user action.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while talking to a rep sensor or persisting a workout.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Operation attempted while not connected to the peripheral.
    #[error("Not connected to peripheral")]
    NotConnected,

    /// The transport no longer knows the peripheral that was advertised.
    #[error("Unknown peripheral: {0}")]
    UnknownPeripheral(String),

    /// Required characteristic not found on the peripheral.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// `finalize` was called for a session that has not completed.
    #[error("Session is not complete")]
    SessionIncomplete,

    /// The workout history collaborator failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Discovery or connection failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The characteristic stream failed.
    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a storage error from any displayable collaborator error.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Failures of a single discovery-and-connect attempt.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectError {
    /// The radio is off, unsupported, not authorized, or never became ready.
    #[error("Bluetooth adapter unavailable: {reason}")]
    AdapterUnavailable {
        /// Why the adapter cannot be used (`"unsupported"`, `"unauthorized"`, `"timeout"`, ...).
        reason: String,
    },

    /// The scan window elapsed without a matching advertisement.
    #[error("Sensor '{target}' not found within {window:?}")]
    NotFound {
        /// Display form of the target.
        target: String,
        /// The scan window that elapsed.
        window: Duration,
    },

    /// A peripheral matched by name but lacks the rep service.
    #[error("Peripheral '{name}' does not expose service {missing_service}")]
    UnexpectedDevice {
        /// Advertised name of the peripheral.
        name: String,
        /// The service that was expected.
        missing_service: Uuid,
    },

    /// Another attempt is already running on this service instance.
    #[error("A connection attempt is already in progress")]
    InProgress,

    /// The attempt was cancelled before it resolved.
    #[error("Connection attempt cancelled")]
    Cancelled,

    /// The transport failed while connecting or discovering services.
    #[error("Connection failed: {0}")]
    Link(#[source] Box<Error>),
}

impl ConnectError {
    /// Build an adapter-unavailable error.
    pub fn adapter_unavailable(reason: impl Into<String>) -> Self {
        Self::AdapterUnavailable {
            reason: reason.into(),
        }
    }

    /// Message suitable for showing to the user.
    ///
    /// An unexpected device is reported the same way as a missing one.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AdapterUnavailable { .. } => {
                "Bluetooth is unavailable. Turn it on and allow access, then try again."
            }
            Self::NotFound { .. } | Self::UnexpectedDevice { .. } => {
                "Sensor not found. Make sure it is awake and nearby, then try again."
            }
            Self::InProgress => "Already connecting to the sensor.",
            Self::Cancelled => "Connection cancelled.",
            Self::Link(_) => "Could not connect to the sensor. Try again.",
        }
    }

    /// Whether offering the user a retry makes sense.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InProgress | Self::Cancelled)
    }
}

impl From<Error> for ConnectError {
    fn from(err: Error) -> Self {
        match err {
            Error::Connect(inner) => inner,
            Error::Cancelled => Self::Cancelled,
            other => Self::Link(Box::new(other)),
        }
    }
}

/// Terminal failures of an attached characteristic stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum StreamError {
    /// The peripheral disconnected or the notification stream closed.
    #[error("Sensor disconnected")]
    Disconnected,

    /// Reads or notifications on the characteristic kept failing.
    #[error("Characteristic failure: {detail}")]
    Characteristic {
        /// Description of the last failure.
        detail: String,
    },
}

/// Result type alias using setsense-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
