use std::io;

use thiserror::Error;

/// Errors returned by session operations and streams.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Bluetooth is not supported on this platform")]
    Unsupported,
    #[error("the Bluetooth adapter must be on to {operation}")]
    AdapterDisabled { operation: &'static str },
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("the peer refused the connection: {reason}")]
    Refused { reason: String },
    #[error("Bluetooth socket I/O failed")]
    IoFailure(#[from] io::Error),
    #[error("the operation was cancelled")]
    Cancelled,
    #[error("permission to start discovery has not been granted")]
    PermissionDenied,
    #[error("the Bluetooth session has been shut down")]
    SessionClosed,
    #[error("no tokio runtime is available to drive the session")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
    #[error("the negotiation worker stopped unexpectedly")]
    Worker(#[source] tokio::task::JoinError),
    #[cfg(feature = "bluez")]
    #[error("BlueZ operation failed")]
    BlueZ(#[from] bluer::Error),
}

impl SessionError {
    /// Classifies an I/O error raised while establishing a socket.
    #[cfg_attr(not(feature = "bluez"), allow(dead_code))]
    pub(crate) fn from_connect_io(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => Self::Refused {
                reason: error.to_string(),
            },
            io::ErrorKind::TimedOut => Self::Timeout {
                operation: "connect",
            },
            _ => Self::IoFailure(error),
        }
    }

    pub(crate) fn connection_closed() -> Self {
        Self::IoFailure(io::Error::new(
            io::ErrorKind::NotConnected,
            "the connection has been closed",
        ))
    }
}

/// Errors returned when parsing a Bluetooth device address.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum AddressParseError {
    #[error("address `{value}` must contain six colon-separated octets")]
    InvalidLength { value: String },
    #[error("address `{value}` contains a non-hexadecimal octet")]
    InvalidOctet { value: String },
}

/// Errors returned when parsing fake radio fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("scan records must contain three pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
    #[error(transparent)]
    InvalidAddress(#[from] AddressParseError),
    #[error("unknown bond state `{value}`")]
    InvalidBondState { value: String },
    #[error("fixture entry `{entry}` must have the form `address=value`")]
    MissingAssignment { entry: String },
    #[error("invalid service UUID in fixture")]
    InvalidUuid(#[from] uuid::Error),
    #[error("unknown peer behaviour `{value}`")]
    InvalidPeerBehaviour { value: String },
}

/// Errors returned while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file `{path}`")]
    Read { path: String, source: io::Error },
    #[error("configuration file `{path}` is not valid")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("the BlueZ backend is not compiled in; rebuild with `--features bluez` or pass `--fake`")]
    BackendUnavailable,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
