//! Security instances and the runtime-mutable configuration store
//!
//! A security instance binds a peer's location (URI, endpoint name) to a
//! security mode and credential reference. Instances live in the
//! [`SecurityStore`], which holds two logical tables: instances describing
//! configured servers and instances describing other peers. The connection
//! layer reads the store through typed accessors and reacts to its mutation;
//! it never caches instance data across events.

use std::collections::HashMap;

use crate::errors::StoreError;
use crate::types::{ContextId, CredentialTag, InstanceId};

// ----------------------------------------------------------------------------
// Security Mode
// ----------------------------------------------------------------------------

/// Security mode of an instance.
///
/// Raw-public-key and certificate modes are accepted in configuration but
/// have no transport registration path yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityMode {
    PreSharedKey,
    RawPublicKey,
    Certificate,
    NoSec,
}

impl SecurityMode {
    /// Numeric resource value as stored in the object tree.
    pub const fn as_u8(&self) -> u8 {
        match self {
            SecurityMode::PreSharedKey => 0,
            SecurityMode::RawPublicKey => 1,
            SecurityMode::Certificate => 2,
            SecurityMode::NoSec => 3,
        }
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SecurityMode::PreSharedKey),
            1 => Some(SecurityMode::RawPublicKey),
            2 => Some(SecurityMode::Certificate),
            3 => Some(SecurityMode::NoSec),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Credentials and Instances
// ----------------------------------------------------------------------------

/// Pre-shared credential: identity plus secret key.
#[derive(Clone, PartialEq, Eq)]
pub struct PskCredential {
    pub identity: String,
    pub key: Vec<u8>,
}

impl PskCredential {
    pub fn new<I: Into<String>, K: Into<Vec<u8>>>(identity: I, key: K) -> Self {
        Self {
            identity: identity.into(),
            key: key.into(),
        }
    }
}

impl core::fmt::Debug for PskCredential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // secret key stays out of logs
        f.debug_struct("PskCredential")
            .field("identity", &self.identity)
            .field("key_len", &self.key.len())
            .finish()
    }
}

/// Which table an instance belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceKind {
    /// Configured device-management server
    Server,
    /// Another peer device
    Client,
}

/// Arguments for creating a security instance.
#[derive(Debug, Clone)]
pub struct SecurityInstanceArgs {
    pub short_id: u16,
    pub uri: String,
    pub endpoint_name: Option<String>,
    pub bootstrap: bool,
    pub mode: SecurityMode,
    pub credential: Option<PskCredential>,
    pub oscore_context: Option<ContextId>,
}

/// A security-configuration instance.
#[derive(Debug, Clone)]
pub struct SecurityInstance {
    pub instance_id: InstanceId,
    pub kind: InstanceKind,
    pub short_id: u16,
    pub uri: String,
    pub endpoint_name: Option<String>,
    pub bootstrap: bool,
    pub mode: SecurityMode,
    pub credential: Option<PskCredential>,
    pub oscore_context: Option<ContextId>,
    /// Tag under which this instance's credential is currently registered
    /// with the encrypted transport, if any. Managed by the credential
    /// lifecycle manager, never written elsewhere.
    pub cred_tag: Option<CredentialTag>,
}

impl SecurityInstance {
    /// Whether this instance's mode calls for a transport credential.
    pub fn needs_credential(&self) -> bool {
        matches!(
            self.mode,
            SecurityMode::PreSharedKey | SecurityMode::RawPublicKey
        )
    }
}

// ----------------------------------------------------------------------------
// Security Store
// ----------------------------------------------------------------------------

/// The runtime-mutable store of security instances.
///
/// Instance ids are unique across both tables; `kind` records which table an
/// instance belongs to. The pool has a fixed capacity and short server id 0
/// is reserved as the not-in-use marker.
#[derive(Debug)]
pub struct SecurityStore {
    instances: HashMap<InstanceId, SecurityInstance>,
    capacity: usize,
    max_key_len: usize,
}

impl SecurityStore {
    pub fn new(capacity: usize, max_key_len: usize) -> Self {
        Self {
            instances: HashMap::new(),
            capacity,
            max_key_len,
        }
    }

    /// Create an instance. Fails on duplicate id, exhausted pool, reserved
    /// short id, or oversized key material.
    pub fn create(
        &mut self,
        kind: InstanceKind,
        instance_id: InstanceId,
        args: SecurityInstanceArgs,
    ) -> Result<(), StoreError> {
        if args.short_id == 0 {
            return Err(StoreError::ReservedShortId);
        }
        if self.instances.contains_key(&instance_id) {
            return Err(StoreError::DuplicateInstance {
                instance: instance_id,
            });
        }
        if self.instances.len() >= self.capacity {
            return Err(StoreError::PoolExhausted {
                capacity: self.capacity,
            });
        }
        if let Some(cred) = &args.credential {
            self.check_key_len(cred)?;
        }

        self.instances.insert(
            instance_id,
            SecurityInstance {
                instance_id,
                kind,
                short_id: args.short_id,
                uri: args.uri,
                endpoint_name: args.endpoint_name,
                bootstrap: args.bootstrap,
                mode: args.mode,
                credential: args.credential,
                oscore_context: args.oscore_context,
                cred_tag: None,
            },
        );
        Ok(())
    }

    /// Replace the credential fields of an instance. The store write succeeds
    /// independently of any transport registration that follows it.
    pub fn update_credential(
        &mut self,
        instance_id: InstanceId,
        credential: PskCredential,
    ) -> Result<(), StoreError> {
        self.check_key_len(&credential)?;
        let instance =
            self.instances
                .get_mut(&instance_id)
                .ok_or(StoreError::InstanceNotFound {
                    instance: instance_id,
                })?;
        instance.credential = Some(credential);
        Ok(())
    }

    /// Remove an instance, returning it so the caller can release its
    /// transport registration.
    pub fn delete(&mut self, instance_id: InstanceId) -> Option<SecurityInstance> {
        self.instances.remove(&instance_id)
    }

    pub fn get(&self, instance_id: InstanceId) -> Option<&SecurityInstance> {
        self.instances.get(&instance_id)
    }

    pub fn get_mut(&mut self, instance_id: InstanceId) -> Option<&mut SecurityInstance> {
        self.instances.get_mut(&instance_id)
    }

    /// All instances, both tables.
    pub fn iter(&self) -> impl Iterator<Item = &SecurityInstance> {
        self.instances.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SecurityInstance> {
        self.instances.values_mut()
    }

    /// Instances of one table.
    pub fn iter_kind(&self, kind: InstanceKind) -> impl Iterator<Item = &SecurityInstance> {
        self.instances.values().filter(move |i| i.kind == kind)
    }

    pub fn find_by_short_id(&self, kind: InstanceKind, short_id: u16) -> Option<&SecurityInstance> {
        self.iter_kind(kind).find(|i| i.short_id == short_id)
    }

    /// Peer instances are the only ones that declare endpoint names.
    pub fn find_by_endpoint_name(&self, name: &str) -> Option<&SecurityInstance> {
        self.iter_kind(InstanceKind::Client)
            .find(|i| i.endpoint_name.as_deref() == Some(name))
    }

    pub fn find_by_oscore_context(&self, context: ContextId) -> Option<&SecurityInstance> {
        self.instances
            .values()
            .find(|i| i.oscore_context == Some(context))
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn check_key_len(&self, cred: &PskCredential) -> Result<(), StoreError> {
        let longest = cred.key.len().max(cred.identity.len());
        if longest > self.max_key_len {
            return Err(StoreError::KeyTooLong {
                max: self.max_key_len,
                actual: longest,
            });
        }
        Ok(())
    }
}
