use crate::chord::types::PeerId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CdhtError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Ring error: {0}")]
    Ring(#[from] RingError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CdhtError {
    /// A broken protocol invariant; the peer cannot keep running
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, CdhtError::Ring(RingError::InvariantViolation(_)))
    }
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(PeerId),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum RingError {
    #[error("Ring actor is gone")]
    ActorGone,

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MessageError {
    #[error("Empty message")]
    Empty,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Expected {expected} fields for {kind}, got {got}")]
    FieldCount {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Field `{field}` is not a valid number: {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Field `{field}` must be 0 or 1, got {value}")]
    InvalidFlag { field: &'static str, value: String },

    #[error("Message is not valid ASCII text")]
    NotText,

    #[error("Datagram shorter than the {0} byte segment header")]
    Truncated(usize),

    #[error("Segment header does not fit in {capacity} bytes: {header}")]
    HeaderOverflow { header: String, capacity: usize },

    #[error("Segment declares {declared} payload bytes but carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Transfer I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Segment encoding failed: {0}")]
    Encode(#[from] MessageError),

    #[error("No segment received for {0:?}, giving up")]
    Stalled(std::time::Duration),

    #[error("File {0} is not available")]
    FileUnavailable(u32),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to initialise logging: {0}")]
    Logging(String),
}
