//! Compressed security header: peer-id extraction and encoding
//!
//! The compressed-header transport carries a bit-packed option value instead
//! of a full handshake per message:
//!
//! ```text
//! 0 1 2 3 4 5 6 7          <- flag byte
//! reserved |h|k| n |       h = kid-context present, k = kid present,
//! [ n partial-IV bytes ]   n = partial sequence number length (0..=5)
//! [ 1 length byte + kid-context bytes ]   only if h
//! [ kid bytes, to end of value ]          only if k
//! ```
//!
//! [`extract_kid`] recovers the peer identifier without running the full
//! decode; it is a pure, allocation-free slice computation.

use crate::errors::HeaderError;

/// kid-present flag (bit 3)
const FLAG_KID: u8 = 0x08;
/// kid-context-present flag (bit 4)
const FLAG_KID_CONTEXT: u8 = 0x10;
/// partial-IV length mask (bits 0-2)
const PIV_LEN_MASK: u8 = 0x07;
/// bits 5-7 must be clear
const RESERVED_MASK: u8 = 0xE0;
/// partial-IV lengths 6 and 7 are reserved
const PIV_LEN_MAX: u8 = 5;

// ----------------------------------------------------------------------------
// Extraction
// ----------------------------------------------------------------------------

/// Extract the peer identifier (kid) field from a compressed-header option
/// value.
///
/// Returns `Ok(None)` when the kid-present bit is clear (including the empty
/// option value, which is a valid header with no fields). Truncated or
/// reserved encodings are malformed; callers treat that the same as a
/// resolution miss.
pub fn extract_kid(value: &[u8]) -> Result<Option<&[u8]>, HeaderError> {
    if value.is_empty() {
        return Ok(None);
    }

    let flags = value[0];
    if flags & RESERVED_MASK != 0 {
        return Err(HeaderError::ReservedFlags { flags });
    }

    let piv_len = flags & PIV_LEN_MASK;
    if piv_len > PIV_LEN_MAX {
        return Err(HeaderError::ReservedPivLength { len: piv_len });
    }

    let mut cursor = 1 + piv_len as usize;
    if value.len() < cursor {
        return Err(HeaderError::Truncated {
            expected: cursor,
            actual: value.len(),
        });
    }

    if flags & FLAG_KID_CONTEXT != 0 {
        let ctx_len = *value.get(cursor).ok_or(HeaderError::Truncated {
            expected: cursor + 1,
            actual: value.len(),
        })? as usize;
        cursor += 1 + ctx_len;
        if value.len() < cursor {
            return Err(HeaderError::Truncated {
                expected: cursor,
                actual: value.len(),
            });
        }
    }

    if flags & FLAG_KID != 0 {
        Ok(Some(&value[cursor..]))
    } else if value.len() > cursor {
        Err(HeaderError::TrailingBytes {
            count: value.len() - cursor,
        })
    } else {
        Ok(None)
    }
}

// ----------------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------------

/// A compressed-header option value, field by field.
///
/// Used by outbound plumbing and by tests to produce wire-exact headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressedHeader {
    /// Partial sequence number, at most 5 bytes
    pub partial_iv: Vec<u8>,
    /// Optional id-context, at most 255 bytes
    pub kid_context: Option<Vec<u8>>,
    /// Optional peer identifier
    pub kid: Option<Vec<u8>>,
}

impl CompressedHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partial_iv(mut self, piv: &[u8]) -> Self {
        self.partial_iv = piv.to_vec();
        self
    }

    pub fn with_kid_context(mut self, ctx: &[u8]) -> Self {
        self.kid_context = Some(ctx.to_vec());
        self
    }

    pub fn with_kid(mut self, kid: &[u8]) -> Self {
        self.kid = Some(kid.to_vec());
        self
    }

    /// Encode into the option-value byte layout.
    ///
    /// Fails when the partial-IV exceeds the 5-byte field or the kid-context
    /// exceeds its one-byte length prefix.
    pub fn encode(&self) -> Result<Vec<u8>, HeaderError> {
        if self.partial_iv.len() > PIV_LEN_MAX as usize {
            return Err(HeaderError::ReservedPivLength {
                len: self.partial_iv.len() as u8,
            });
        }
        if let Some(ctx) = &self.kid_context {
            if ctx.len() > u8::MAX as usize {
                return Err(HeaderError::Truncated {
                    expected: u8::MAX as usize,
                    actual: ctx.len(),
                });
            }
        }

        let mut flags = self.partial_iv.len() as u8;
        if self.kid_context.is_some() {
            flags |= FLAG_KID_CONTEXT;
        }
        if self.kid.is_some() {
            flags |= FLAG_KID;
        }

        if flags == 0 {
            // all fields absent compresses to the empty value
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(
            1 + self.partial_iv.len()
                + self.kid_context.as_ref().map_or(0, |c| 1 + c.len())
                + self.kid.as_ref().map_or(0, |k| k.len()),
        );
        out.push(flags);
        out.extend_from_slice(&self.partial_iv);
        if let Some(ctx) = &self.kid_context {
            out.push(ctx.len() as u8);
            out.extend_from_slice(ctx);
        }
        if let Some(kid) = &self.kid {
            out.extend_from_slice(kid);
        }
        Ok(out)
    }
}
