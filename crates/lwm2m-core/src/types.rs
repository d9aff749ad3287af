//! Core types for the device-management connection layer
//!
//! This module defines the fundamental identifiers used throughout the layer,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

// ----------------------------------------------------------------------------
// Instance and Context Identifiers
// ----------------------------------------------------------------------------

/// Identifier of a security-configuration instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(u16);

impl InstanceId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a derived security context in the context pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextId(u16);

impl ContextId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Credential Tag
// ----------------------------------------------------------------------------

/// Tag under which a credential is registered with the encrypted transport.
///
/// The tag space is process-wide and monotonically increasing; it is only
/// reset at restart. Tag 0 is reserved as the empty tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CredentialTag(u16);

impl CredentialTag {
    /// Reserved empty tag, never registered with a transport.
    pub const EMPTY: Self = Self(0);

    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    pub const fn value(&self) -> u16 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CredentialTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Session Handles
// ----------------------------------------------------------------------------

/// Opaque per-connection handle handed to the protocol engine.
///
/// Produced by the dispatcher when a connection record is created; the engine
/// passes it back verbatim on `send`. Validity ends at `close_session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

impl SessionHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Identifier of an established encrypted-transport session, owned by the
/// transport layer and only borrowed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecureSessionId(u64);

impl SecureSessionId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

// ----------------------------------------------------------------------------
// Recipient Identifier
// ----------------------------------------------------------------------------

/// Compact peer identifier carried in the compressed security header (kid).
///
/// Variable length, short in practice; stored inline up to 8 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RecipientId(SmallVec<[u8; 8]>);

impl RecipientId {
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(SmallVec::from_slice(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl FromStr for RecipientId {
    type Err = crate::Lwm2mError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(clean)
            .map_err(|_| crate::Lwm2mError::configuration("invalid hex in recipient id"))?;
        Ok(Self::from_slice(&bytes))
    }
}

// ----------------------------------------------------------------------------
// Transport Kind and Endpoint
// ----------------------------------------------------------------------------

/// The datagram mode a connection uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Plain datagram
    Udp,
    /// Encrypted datagram
    Dtls,
    /// Compressed-security-header datagram
    Oscore,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Udp => write!(f, "udp"),
            TransportKind::Dtls => write!(f, "dtls"),
            TransportKind::Oscore => write!(f, "oscore"),
        }
    }
}

/// Remote datagram endpoint.
///
/// Connection identity is address + port; the interface zone is informative
/// only and excluded from equality and hashing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Endpoint {
    pub addr: IpAddr,
    pub port: u16,
    pub zone: Option<u32>,
}

impl Endpoint {
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self {
            addr,
            port,
            zone: None,
        }
    }

    pub fn with_zone(mut self, zone: u32) -> Self {
        self.zone = Some(zone);
        self
    }

    /// Address-only comparison, used when a configured URI carries no port.
    pub fn same_addr(&self, other: &Endpoint) -> bool {
        self.addr == other.addr
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr && self.port == other.port
    }
}

impl Eq for Endpoint {}

impl core::hash::Hash for Endpoint {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            IpAddr::V4(a) => write!(f, "{}:{}", a, self.port),
            IpAddr::V6(a) => write!(f, "[{}]:{}", a, self.port),
        }
    }
}

// ----------------------------------------------------------------------------
// Time
// ----------------------------------------------------------------------------

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn elapsed_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

/// Source of timestamps, injectable for deterministic tests.
pub trait TimeSource {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Timestamp::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn endpoint_identity_ignores_zone() {
        let addr = IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1));
        let a = Endpoint::new(addr, 5683).with_zone(6);
        let b = Endpoint::new(addr, 5683);
        assert_eq!(a, b);

        let c = Endpoint::new(addr, 5684);
        assert_ne!(a, c);
        assert!(a.same_addr(&c));
    }

    #[test]
    fn recipient_id_hex_round_trip() {
        let id = RecipientId::from_slice(&[0x01, 0xab]);
        assert_eq!(id.to_string(), "01ab");
        assert_eq!("01ab".parse::<RecipientId>().unwrap(), id);
        assert_eq!("0x01ab".parse::<RecipientId>().unwrap(), id);
    }

    #[test]
    fn credential_tag_empty_is_reserved() {
        assert!(CredentialTag::EMPTY.is_empty());
        assert!(!CredentialTag::new(1).is_empty());
    }
}
