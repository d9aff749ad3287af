//! Device-Management Connection Layer: Core
//!
//! This crate provides the foundational types for a CoAP-based
//! device-management client's connection layer: security instances and
//! derived contexts, compressed-header peer-id extraction, configuration,
//! and the traits behind which the protocol engine and transports sit.
//! It holds no sockets and no tasks; the runtime crate drives it.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod engine;
pub mod errors;
pub mod header;
pub mod security;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{ClientConfig, QueueConfig, RegistryConfig, RequestConfig, SecurityConfig, StepConfig};
pub use engine::{
    AuthCallback, CredentialRegistry, DatagramTransport, DecodeOutcome, FsmState, HeaderCodec,
    ProtocolEngine, ReadCallback, ResourcePath, ResponseStatus, SecureTransport, StepOutcome,
};
pub use errors::{
    CodecError, CredentialError, HeaderError, Lwm2mError, RegistryError, RequestError, Result,
    StoreError, TransportError,
};
pub use header::{extract_kid, CompressedHeader};
pub use security::{
    AeadAlgorithm, ContextParams, ContextPool, DerivedContext, HkdfAlgorithm, InstanceKind,
    PskCredential, Role, RoleContext, SecurityInstance, SecurityInstanceArgs, SecurityMode,
    SecurityStore,
};
pub use types::{
    ContextId, CredentialTag, Endpoint, InstanceId, RecipientId, SecureSessionId, SessionHandle,
    SystemTimeSource, TimeSource, Timestamp, TransportKind,
};
