//! Device-Management Connection Layer: Runtime
//!
//! This crate contains the orchestration half of the connection layer:
//! - `Dispatcher`: the event loop owning all connection state
//! - `ConnectionRegistry`: generation-checked records behind opaque handles
//! - Security-instance resolution for inbound datagrams
//! - The credential mirror into the encrypted transport
//!
//! `lwm2m-core` provides the types and traits this crate drives.

pub mod credentials;
pub mod dispatcher;
pub mod registry;
pub mod requests;
pub mod resolver;
pub mod uri;

pub use credentials::{tag_for_endpoint, CredentialManager, RefreshSummary};
pub use dispatcher::{Dispatcher, DispatcherStats, RuntimeEvent, RuntimeHandle, SecurityCommand};
pub use registry::{ConnHandle, ConnList, Connection, ConnectionKind, ConnectionRegistry};
pub use requests::PeerRequest;
pub use resolver::{resolve_by_endpoint_name, resolve_by_kid, resolve_by_location};
pub use uri::{parse_uri, ParsedUri};

// Re-export core types for convenience
pub use lwm2m_core::{
    ClientConfig, Endpoint, InstanceId, InstanceKind, Lwm2mError, Result, SecurityInstanceArgs,
    SecurityMode, SessionHandle, TransportKind,
};
