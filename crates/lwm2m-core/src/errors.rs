//! Error types for the connection and security-context layer
//!
//! Every externally visible failure of this layer is representable here.
//! Resolution misses and absent peer ids are deliberately *not* errors; they
//! are modelled as `Option::None` at the call sites. None of these errors may
//! terminate the event loop.

use crate::types::{ContextId, Endpoint, InstanceId, SessionHandle, TransportKind};

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Transport-level failures: sends, handshakes, session validity.
///
/// Never retried by this layer; retry policy belongs to the protocol engine.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("send failed over {kind} to {remote}: {reason}")]
    SendFailed {
        kind: TransportKind,
        remote: Endpoint,
        reason: String,
    },
    #[error("handshake with {remote} timed out after {duration_ms}ms")]
    HandshakeTimeout { remote: Endpoint, duration_ms: u64 },
    #[error("handshake with {remote} failed: {reason}")]
    HandshakeFailed { remote: Endpoint, reason: String },
    #[error("session {session} is not valid")]
    SessionNotFound { session: SessionHandle },
    #[error("transport is unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Connection registry failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("connection to {remote} over {kind} already exists")]
    Duplicate {
        remote: Endpoint,
        kind: TransportKind,
    },
    #[error("connection list full (capacity {capacity})")]
    Exhausted { capacity: usize },
}

/// Malformed compressed security header.
///
/// Callers treat these identically to a resolution miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("header truncated: need {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("reserved flag bits set: {flags:#04x}")]
    ReservedFlags { flags: u8 },
    #[error("reserved partial-sequence-number length {len}")]
    ReservedPivLength { len: u8 },
    #[error("{count} trailing bytes after header fields")]
    TrailingBytes { count: usize },
}

/// Credential lifecycle failures.
///
/// Registration failures never roll back the configuration store; the store
/// is the source of truth and the transport mirror self-heals on refresh.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("transport rejected credential: {reason}")]
    Transport { reason: String },
    #[error("security instance {instance} holds no credential")]
    MissingCredential { instance: InstanceId },
}

/// Security store and context pool failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("instance pool full (capacity {capacity})")]
    PoolExhausted { capacity: usize },
    #[error("instance {instance} already exists")]
    DuplicateInstance { instance: InstanceId },
    #[error("instance {instance} not found")]
    InstanceNotFound { instance: InstanceId },
    #[error("derived context {context} not found")]
    ContextNotFound { context: ContextId },
    #[error("short server id 0 is reserved")]
    ReservedShortId,
    #[error("key material too long: {actual} bytes (max {max})")]
    KeyTooLong { max: usize, actual: usize },
}

/// Peer request validation and queueing failures.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("event queue full (capacity {capacity})")]
    QueueFull { capacity: usize },
    #[error("dispatcher is no longer running")]
    Closed,
    #[error("host URI too long: {actual} bytes (max {max})")]
    UriTooLong { max: usize, actual: usize },
    #[error("invalid resource path: {reason}")]
    InvalidPath { reason: String },
    #[error("unknown peer instance {instance}")]
    UnknownInstance { instance: InstanceId },
}

/// Compressed-header codec failure (external codec reported an error).
#[derive(Debug, thiserror::Error)]
#[error("codec error: {message}")]
pub struct CodecError {
    pub message: String,
}

impl CodecError {
    pub fn new<T: Into<String>>(message: T) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Unified error type for the connection layer.
#[derive(Debug, thiserror::Error)]
pub enum Lwm2mError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("malformed header: {0}")]
    Header(#[from] HeaderError),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("request error: {0}")]
    Request(#[from] RequestError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl Lwm2mError {
    /// Create a configuration error with a reason
    pub fn configuration<T: Into<String>>(reason: T) -> Self {
        Lwm2mError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a send-failed transport error
    pub fn send_failed<T: Into<String>>(kind: TransportKind, remote: Endpoint, reason: T) -> Self {
        Lwm2mError::Transport(TransportError::SendFailed {
            kind,
            remote,
            reason: reason.into(),
        })
    }

    /// Create a stale-session transport error
    pub fn session_not_found(session: SessionHandle) -> Self {
        Lwm2mError::Transport(TransportError::SessionNotFound { session })
    }
}

// ----------------------------------------------------------------------------
// Type Alias
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, Lwm2mError>;
