//! Error types for Plexus
//!
//! Errors are grouped by the policy they drive: invalid input is rejected
//! synchronously, transport errors steer the retry engine, storage errors
//! are recovered locally and protocol errors mean "do nothing, try later".

use thiserror::Error;

/// Result type alias for Plexus operations
pub type Result<T> = std::result::Result<T, PlexusError>;

/// Main error type for Plexus operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlexusError {
    /// Caller supplied something the client refuses to queue or use
    #[error("Invalid input: {0}")]
    Input(#[from] InputError),

    /// Serialization error
    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// Delivery error reported by the platform transport
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Durable storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Unusable response from the server
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Nothing queued and nothing persisted
    #[error("No data to flush")]
    NoData,
}

impl PlexusError {
    /// The transport error behind this error, if any
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }

    /// True if the server rejected our credentials or account
    pub fn is_auth(&self) -> bool {
        self.transport().map_or(false, TransportError::is_auth)
    }

    /// True if the server asked us to slow down
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Transport(TransportError::RateLimited))
    }
}

/// Invalid arguments, rejected before anything is queued
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    /// Metric or tag name is empty or contains non-printable characters
    #[error("Invalid name: must be non-empty printable ASCII")]
    InvalidName,

    /// Metric name too long
    #[error("Name too long: {len} bytes, maximum is {max}")]
    NameTooLong { len: usize, max: usize },

    /// String value or tag value too long
    #[error("String too long: {len} bytes, maximum is {max}")]
    StringTooLong { len: usize, max: usize },

    /// Fixed-capacity container is full
    #[error("Buffer full: capacity {capacity}")]
    QueueFull { capacity: usize },

    /// Too many tags on a single metric
    #[error("Too many tags: {count}, maximum is {max}")]
    TooManyTags { count: usize, max: usize },

    /// Identifier is empty, too long or not URL-safe
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Other invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors during serialization
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// Serialized document does not fit the output buffer
    #[error("Buffer overflow: document exceeds {capacity} bytes")]
    BufferOverflow { capacity: usize },

    /// Serializer failure other than overflow
    #[error("Serialization failed: {0}")]
    Serialize(String),
}

/// Outcome classes of an HTTP exchange
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No connection, timeout, or an unexpected status
    #[error("Network error")]
    Network,

    /// Authentication failed (401)
    #[error("Authentication failed")]
    Auth,

    /// Billing limit exceeded (402)
    #[error("Billing limit exceeded")]
    Billing,

    /// Forbidden, key is missing a scope (403)
    #[error("Forbidden")]
    Forbidden,

    /// Rate limited (429)
    #[error("Rate limited")]
    RateLimited,

    /// Server error (5xx)
    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    /// The platform does not provide this primitive
    #[error("Operation not supported by platform")]
    Unsupported,
}

impl TransportError {
    /// Map an HTTP status code to a transport outcome
    pub fn from_status(status: u16) -> std::result::Result<(), TransportError> {
        match status {
            200..=299 => Ok(()),
            401 => Err(Self::Auth),
            402 => Err(Self::Billing),
            403 => Err(Self::Forbidden),
            429 => Err(Self::RateLimited),
            500..=u16::MAX => Err(Self::Server { status }),
            _ => Err(Self::Network),
        }
    }

    /// Whether another attempt could succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Server { .. })
    }

    /// Credential or account problems
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth | Self::Billing | Self::Forbidden)
    }
}

/// Errors from the platform's durable storage
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The platform has no durable storage
    #[error("Storage not supported by platform")]
    Unsupported,

    /// Write failed
    #[error("Storage write failed for key {key:?}")]
    WriteFailed { key: String },

    /// Read failed
    #[error("Storage read failed for key {key:?}")]
    ReadFailed { key: String },
}

/// Unusable server responses
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Response is not the expected document shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Server-issued identifier failed validation
    #[error("Unsafe identifier rejected: {0:?}")]
    UnsafeIdentifier(String),
}
