//! Derived security contexts for the compressed-header transport
//!
//! A context is derived from pre-shared master material (secret, salt,
//! optional id-context) plus a pair of short ids. Derivation expands the
//! master secret through HKDF-SHA256 into per-direction AEAD keys and a
//! common IV; both role orientations are derived up front so either side of
//! an exchange can be served from the same pool entry.
//!
//! Contexts live in a fixed-size [`ContextPool`] indexed by [`ContextId`].

use hkdf::Hkdf;
use sha2::Sha256;

use crate::errors::{Lwm2mError, StoreError};
use crate::types::{ContextId, RecipientId};

// ----------------------------------------------------------------------------
// Algorithms
// ----------------------------------------------------------------------------

/// AEAD algorithm of a derived context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AeadAlgorithm {
    /// AES-CCM with 16-byte keys, 8-byte tags, 13-byte nonces
    AesCcm16_64_128,
}

impl AeadAlgorithm {
    /// COSE algorithm identifier, used in the derivation info structure.
    pub const fn cose_value(&self) -> i8 {
        match self {
            AeadAlgorithm::AesCcm16_64_128 => 10,
        }
    }

    pub const fn key_len(&self) -> usize {
        match self {
            AeadAlgorithm::AesCcm16_64_128 => 16,
        }
    }

    pub const fn nonce_len(&self) -> usize {
        match self {
            AeadAlgorithm::AesCcm16_64_128 => 13,
        }
    }
}

impl Default for AeadAlgorithm {
    fn default() -> Self {
        AeadAlgorithm::AesCcm16_64_128
    }
}

/// Key-derivation function of a derived context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HkdfAlgorithm {
    #[default]
    Sha256,
}

// ----------------------------------------------------------------------------
// Context Parameters
// ----------------------------------------------------------------------------

/// Pre-shared inputs from which a context is derived.
#[derive(Clone, PartialEq, Eq)]
pub struct ContextParams {
    pub master_secret: Vec<u8>,
    pub master_salt: Vec<u8>,
    pub id_context: Option<Vec<u8>>,
    /// Our id when we initiated the exchange
    pub sender_id: RecipientId,
    /// The peer's id, as carried in its compressed headers
    pub recipient_id: RecipientId,
    pub aead: AeadAlgorithm,
    pub hkdf: HkdfAlgorithm,
}

impl core::fmt::Debug for ContextParams {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // master material stays out of logs
        f.debug_struct("ContextParams")
            .field("sender_id", &self.sender_id)
            .field("recipient_id", &self.recipient_id)
            .field("aead", &self.aead)
            .field("hkdf", &self.hkdf)
            .finish()
    }
}

/// Which side of the exchange a role context serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends under `sender_id`, receives under `recipient_id`
    Initiator,
    /// The id pair swapped
    Responder,
}

// ----------------------------------------------------------------------------
// Derived Material
// ----------------------------------------------------------------------------

/// Keys and state for one role orientation.
#[derive(Clone, PartialEq, Eq)]
pub struct RoleContext {
    pub sender_key: Vec<u8>,
    pub recipient_key: Vec<u8>,
    pub common_iv: Vec<u8>,
    /// Next outbound partial sequence number
    pub sequence: u64,
}

impl RoleContext {
    /// Take the next outbound sequence number.
    pub fn next_sequence(&mut self) -> u64 {
        let seq = self.sequence;
        self.sequence += 1;
        seq
    }
}

impl core::fmt::Debug for RoleContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RoleContext")
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// A fully derived context pool entry.
#[derive(Debug, Clone)]
pub struct DerivedContext {
    pub id: ContextId,
    pub sender_id: RecipientId,
    pub recipient_id: RecipientId,
    pub id_context: Option<Vec<u8>>,
    pub aead: AeadAlgorithm,
    pub initiator: RoleContext,
    pub responder: RoleContext,
}

impl DerivedContext {
    pub fn role(&self, role: Role) -> &RoleContext {
        match role {
            Role::Initiator => &self.initiator,
            Role::Responder => &self.responder,
        }
    }

    pub fn role_mut(&mut self, role: Role) -> &mut RoleContext {
        match role {
            Role::Initiator => &mut self.initiator,
            Role::Responder => &mut self.responder,
        }
    }
}

// ----------------------------------------------------------------------------
// Derivation
// ----------------------------------------------------------------------------

/// Minimal canonical CBOR writer for the derivation info structure:
/// `[id: bstr, id_context: bstr / nil, alg: int, type: tstr, length: uint]`.
fn push_uint(out: &mut Vec<u8>, major: u8, value: u64) {
    let major = major << 5;
    if value < 24 {
        out.push(major | value as u8);
    } else if value <= u8::MAX as u64 {
        out.push(major | 24);
        out.push(value as u8);
    } else {
        out.push(major | 25);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    }
}

fn derivation_info(
    id: &[u8],
    id_context: Option<&[u8]>,
    alg: i8,
    label: &str,
    length: usize,
) -> Vec<u8> {
    let mut info = Vec::with_capacity(16 + id.len() + id_context.map_or(0, |c| c.len()));
    info.push(0x85); // array(5)
    push_uint(&mut info, 2, id.len() as u64);
    info.extend_from_slice(id);
    match id_context {
        Some(ctx) => {
            push_uint(&mut info, 2, ctx.len() as u64);
            info.extend_from_slice(ctx);
        }
        None => info.push(0xf6), // nil
    }
    if alg >= 0 {
        push_uint(&mut info, 0, alg as u64);
    } else {
        push_uint(&mut info, 1, (-1 - alg as i64) as u64);
    }
    push_uint(&mut info, 3, label.len() as u64);
    info.extend_from_slice(label.as_bytes());
    push_uint(&mut info, 0, length as u64);
    info
}

fn expand(
    kdf: &Hkdf<Sha256>,
    id: &[u8],
    id_context: Option<&[u8]>,
    alg: i8,
    label: &str,
    length: usize,
) -> crate::Result<Vec<u8>> {
    let info = derivation_info(id, id_context, alg, label, length);
    let mut okm = vec![0u8; length];
    kdf.expand(&info, &mut okm)
        .map_err(|_| Lwm2mError::configuration("derived key length out of range"))?;
    Ok(okm)
}

fn derive(params: &ContextParams) -> crate::Result<(RoleContext, RoleContext)> {
    let HkdfAlgorithm::Sha256 = params.hkdf;
    let kdf = Hkdf::<Sha256>::new(Some(&params.master_salt), &params.master_secret);

    let alg = params.aead.cose_value();
    let key_len = params.aead.key_len();
    let ctx = params.id_context.as_deref();

    let sender_key = expand(&kdf, params.sender_id.as_bytes(), ctx, alg, "Key", key_len)?;
    let recipient_key = expand(&kdf, params.recipient_id.as_bytes(), ctx, alg, "Key", key_len)?;
    let common_iv = expand(&kdf, &[], ctx, alg, "IV", params.aead.nonce_len())?;

    let initiator = RoleContext {
        sender_key: sender_key.clone(),
        recipient_key: recipient_key.clone(),
        common_iv: common_iv.clone(),
        sequence: 0,
    };
    // the responder orientation is the same material with directions swapped
    let responder = RoleContext {
        sender_key: recipient_key,
        recipient_key: sender_key,
        common_iv,
        sequence: 0,
    };
    Ok((initiator, responder))
}

// ----------------------------------------------------------------------------
// Context Pool
// ----------------------------------------------------------------------------

/// Fixed-size pool of derived contexts.
#[derive(Debug)]
pub struct ContextPool {
    slots: Box<[Option<DerivedContext>]>,
}

impl ContextPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
        }
    }

    /// Derive a context and place it in the first free slot.
    pub fn create(&mut self, params: &ContextParams) -> crate::Result<ContextId> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(StoreError::PoolExhausted {
                capacity: self.slots.len(),
            })?;
        let id = ContextId::new(slot as u16);
        self.slots[slot] = Some(self.build(id, params)?);
        Ok(id)
    }

    /// Re-derive an existing context in place, resetting both sequences.
    pub fn update(&mut self, id: ContextId, params: &ContextParams) -> crate::Result<()> {
        let slot = self
            .slot_of(id)
            .ok_or(StoreError::ContextNotFound { context: id })?;
        let rebuilt = self.build(id, params)?;
        self.slots[slot] = Some(rebuilt);
        Ok(())
    }

    pub fn remove(&mut self, id: ContextId) -> Option<DerivedContext> {
        let slot = self.slot_of(id)?;
        self.slots[slot].take()
    }

    pub fn get(&self, id: ContextId) -> Option<&DerivedContext> {
        self.slots.get(id.value() as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: ContextId) -> Option<&mut DerivedContext> {
        self.slots.get_mut(id.value() as usize)?.as_mut()
    }

    /// Find the context whose peer id matches an extracted header kid.
    pub fn find_by_recipient_id(&self, kid: &[u8]) -> Option<&DerivedContext> {
        self.slots
            .iter()
            .flatten()
            .find(|c| c.recipient_id.as_bytes() == kid)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot_of(&self, id: ContextId) -> Option<usize> {
        let slot = id.value() as usize;
        match self.slots.get(slot) {
            Some(Some(_)) => Some(slot),
            _ => None,
        }
    }

    fn build(&self, id: ContextId, params: &ContextParams) -> crate::Result<DerivedContext> {
        let (initiator, responder) = derive(params)?;
        Ok(DerivedContext {
            id,
            sender_id: params.sender_id.clone(),
            recipient_id: params.recipient_id.clone(),
            id_context: params.id_context.clone(),
            aead: params.aead,
            initiator,
            responder,
        })
    }
}
