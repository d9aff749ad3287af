//! Protocol-engine boundary
//!
//! The connection layer does not interpret device-management payloads. It
//! drives an external protocol engine through the [`ProtocolEngine`] trait
//! and reaches the network through the transport traits below. Production
//! wires real implementations in; tests substitute recording fakes.

use core::fmt;
use core::str::FromStr;
use core::time::Duration;

use crate::errors::{CodecError, CredentialError, TransportError};
use crate::security::{DerivedContext, PskCredential};
use crate::types::{CredentialTag, Endpoint, SecureSessionId, SessionHandle, Timestamp};

// ----------------------------------------------------------------------------
// Engine State
// ----------------------------------------------------------------------------

/// Registration state machine of the protocol engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsmState {
    Initial,
    BootstrapRequired,
    Bootstrapping,
    RegisterRequired,
    Registering,
    Ready,
}

impl FsmState {
    /// Whether registration has settled; a settled engine is stepped at the
    /// configured minimum interval so refresh traffic cannot stall.
    pub const fn is_settled(&self) -> bool {
        matches!(self, FsmState::Ready)
    }
}

impl fmt::Display for FsmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FsmState::Initial => "initial",
            FsmState::BootstrapRequired => "bootstrap-required",
            FsmState::Bootstrapping => "bootstrapping",
            FsmState::RegisterRequired => "register-required",
            FsmState::Registering => "registering",
            FsmState::Ready => "ready",
        };
        write!(f, "{name}")
    }
}

/// Result of one engine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub state: FsmState,
    /// The engine's requested wait before the next step. The dispatcher
    /// clamps this into its configured bounds.
    pub next_interval: Duration,
}

// ----------------------------------------------------------------------------
// Response Status
// ----------------------------------------------------------------------------

/// Response code delivered to request callbacks, `class.detail` encoded as
/// `class << 5 | detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseStatus(u8);

impl ResponseStatus {
    pub const CONTENT: Self = Self::new(2, 5);
    pub const CHANGED: Self = Self::new(2, 4);
    pub const BAD_REQUEST: Self = Self::new(4, 0);
    pub const UNAUTHORIZED: Self = Self::new(4, 1);
    pub const FORBIDDEN: Self = Self::new(4, 3);
    pub const NOT_FOUND: Self = Self::new(4, 4);
    pub const INTERNAL_ERROR: Self = Self::new(5, 0);
    pub const GATEWAY_TIMEOUT: Self = Self::new(5, 4);

    pub const fn new(class: u8, detail: u8) -> Self {
        Self(class << 5 | detail & 0x1f)
    }

    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u8 {
        self.0
    }

    pub const fn class(&self) -> u8 {
        self.0 >> 5
    }

    pub const fn detail(&self) -> u8 {
        self.0 & 0x1f
    }

    pub const fn is_success(&self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

// ----------------------------------------------------------------------------
// Resource Paths
// ----------------------------------------------------------------------------

/// Path into a peer's object tree: object, optional instance, optional
/// resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    pub object_id: u16,
    pub instance_id: Option<u16>,
    pub resource_id: Option<u16>,
}

impl ResourcePath {
    pub const fn object(object_id: u16) -> Self {
        Self {
            object_id,
            instance_id: None,
            resource_id: None,
        }
    }

    pub const fn instance(object_id: u16, instance_id: u16) -> Self {
        Self {
            object_id,
            instance_id: Some(instance_id),
            resource_id: None,
        }
    }

    pub const fn resource(object_id: u16, instance_id: u16, resource_id: u16) -> Self {
        Self {
            object_id,
            instance_id: Some(instance_id),
            resource_id: Some(resource_id),
        }
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.object_id)?;
        if let Some(instance) = self.instance_id {
            write!(f, "/{instance}")?;
        }
        if let Some(resource) = self.resource_id {
            write!(f, "/{resource}")?;
        }
        Ok(())
    }
}

impl FromStr for ResourcePath {
    type Err = crate::errors::RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| crate::errors::RequestError::InvalidPath {
            reason: reason.into(),
        };

        let rest = s.strip_prefix('/').ok_or_else(|| invalid("missing leading slash"))?;
        let mut ids = rest.split('/').map(|seg| {
            seg.parse::<u16>()
                .map_err(|_| invalid("segment is not a 16-bit id"))
        });

        let object_id = ids.next().ok_or_else(|| invalid("empty path"))??;
        let instance_id = ids.next().transpose()?;
        let resource_id = ids.next().transpose()?;
        if ids.next().is_some() {
            return Err(invalid("more than three segments"));
        }
        if resource_id.is_some() && instance_id.is_none() {
            return Err(invalid("resource without instance"));
        }
        Ok(Self {
            object_id,
            instance_id,
            resource_id,
        })
    }
}

// ----------------------------------------------------------------------------
// Callbacks
// ----------------------------------------------------------------------------

/// Callback invoked with a response (or notification) payload.
pub type ReadCallback = Box<dyn FnMut(ResponseStatus, &[u8]) + Send>;

/// Callback invoked with an authorization outcome.
pub type AuthCallback = Box<dyn FnMut(ResponseStatus) + Send>;

// ----------------------------------------------------------------------------
// Protocol Engine
// ----------------------------------------------------------------------------

/// The device-management protocol engine behind the connection layer.
///
/// The engine owns message formats, registration logic and retransmission.
/// Sessions are [`SessionHandle`]s minted by the dispatcher; the engine treats
/// them as opaque.
pub trait ProtocolEngine: Send {
    /// Deliver one inbound plaintext datagram.
    fn handle_inbound(&mut self, session: SessionHandle, payload: &[u8]);

    /// Run periodic work and report state plus the requested next wakeup.
    fn step(&mut self, now: Timestamp) -> StepOutcome;

    /// Recover the sender's endpoint name from a registration-shaped payload,
    /// if it carries one.
    fn extract_endpoint_name(&self, payload: &[u8]) -> Option<String>;

    /// Issue a read of `path` on the peer behind `session`.
    fn peer_read(
        &mut self,
        session: SessionHandle,
        path: &ResourcePath,
        on_response: ReadCallback,
    ) -> Result<(), CodecError>;

    /// Start observing `path` on the peer behind `session`.
    fn peer_observe(
        &mut self,
        session: SessionHandle,
        path: &ResourcePath,
        on_notify: ReadCallback,
    ) -> Result<(), CodecError>;

    /// Ask the server behind `session` to authorize access to a peer.
    fn peer_authorize(
        &mut self,
        session: SessionHandle,
        host_uri: &str,
        on_response: AuthCallback,
    ) -> Result<(), CodecError>;
}

// ----------------------------------------------------------------------------
// Header Codec
// ----------------------------------------------------------------------------

/// Outcome of decoding a compressed-header datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Decryption succeeded; deliver this plaintext.
    Plaintext(Vec<u8>),
    /// The datagram does not carry a compressed security header.
    NotThisMode,
}

/// Encrypts and decrypts compressed-header datagrams against a derived
/// context. Implementations pick the role orientation and maintain replay
/// state internally.
pub trait HeaderCodec: Send {
    fn encode(
        &mut self,
        plaintext: &[u8],
        context: &mut DerivedContext,
    ) -> Result<Vec<u8>, CodecError>;

    fn decode(
        &mut self,
        datagram: &[u8],
        context: &mut DerivedContext,
    ) -> Result<DecodeOutcome, CodecError>;
}

// ----------------------------------------------------------------------------
// Transports
// ----------------------------------------------------------------------------

/// Plain datagram transport.
pub trait DatagramTransport: Send {
    fn send(&mut self, remote: Endpoint, payload: &[u8]) -> Result<(), TransportError>;
}

/// Encrypted datagram transport with explicit sessions.
///
/// `connect` performs the handshake, waiting at most `timeout`; a hung
/// handshake surfaces as [`TransportError::HandshakeTimeout`].
pub trait SecureTransport: Send {
    fn connect(
        &mut self,
        remote: Endpoint,
        tag: CredentialTag,
        timeout: Duration,
    ) -> Result<SecureSessionId, TransportError>;

    fn send(&mut self, session: SecureSessionId, payload: &[u8]) -> Result<(), TransportError>;

    fn close(&mut self, session: SecureSessionId);
}

/// The encrypted transport's credential registry.
pub trait CredentialRegistry: Send {
    fn add(&mut self, tag: CredentialTag, credential: &PskCredential)
        -> Result<(), CredentialError>;

    fn remove(&mut self, tag: CredentialTag);

    /// Tags currently registered, in no particular order.
    fn tags(&self) -> Vec<CredentialTag>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_path_parses_full_form() {
        let path: ResourcePath = "/3303/0/5700".parse().unwrap();
        assert_eq!(path, ResourcePath::resource(3303, 0, 5700));
        assert_eq!(path.to_string(), "/3303/0/5700");
    }

    #[test]
    fn resource_path_parses_shorter_forms() {
        assert_eq!("/3".parse::<ResourcePath>().unwrap(), ResourcePath::object(3));
        assert_eq!(
            "/3/0".parse::<ResourcePath>().unwrap(),
            ResourcePath::instance(3, 0)
        );
    }

    #[test]
    fn resource_path_rejects_malformed_input() {
        assert!("3/0/1".parse::<ResourcePath>().is_err());
        assert!("/".parse::<ResourcePath>().is_err());
        assert!("/a/b".parse::<ResourcePath>().is_err());
        assert!("/1/2/3/4".parse::<ResourcePath>().is_err());
        assert!("/70000".parse::<ResourcePath>().is_err());
    }

    #[test]
    fn response_status_encodes_class_and_detail() {
        assert_eq!(ResponseStatus::CONTENT.raw(), 0x45);
        assert_eq!(ResponseStatus::CONTENT.to_string(), "2.05");
        assert!(ResponseStatus::CONTENT.is_success());
        assert!(!ResponseStatus::UNAUTHORIZED.is_success());
        assert_eq!(ResponseStatus::UNAUTHORIZED.to_string(), "4.01");
    }

    #[test]
    fn only_ready_is_settled() {
        assert!(FsmState::Ready.is_settled());
        assert!(!FsmState::Registering.is_settled());
    }
}
