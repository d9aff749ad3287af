//! Resolution of inbound datagrams to security instances
//!
//! An unknown sender is admitted only if some security instance vouches for
//! it. Three strategies exist, tried by the dispatcher in order: the sender's
//! network location, an endpoint name recovered from the payload, and the
//! peer id carried in a compressed security header. Every strategy is a pure
//! read; a miss is `None`, never an error.

use lwm2m_core::{
    extract_kid, ContextId, ContextPool, Endpoint, InstanceId, InstanceKind, SecurityInstance,
    SecurityStore,
};
use tracing::trace;

use crate::uri::parse_uri;

/// Resolve by the sender's address and port.
///
/// Server instances win over peer instances. Within one table an instance
/// whose URI carries an explicit matching port wins over one whose URI is
/// portless and matches by address alone; the portless instance is taken to
/// operate on whatever port the sender used. Instances configured for the
/// same location tie-break on the lowest instance id, keeping resolution
/// deterministic for any store snapshot.
pub fn resolve_by_location(store: &SecurityStore, remote: Endpoint) -> Option<InstanceId> {
    for kind in [InstanceKind::Server, InstanceKind::Client] {
        let mut exact: Option<&SecurityInstance> = None;
        let mut addr_only: Option<&SecurityInstance> = None;
        for instance in store.iter_kind(kind) {
            let Ok(parsed) = parse_uri(&instance.uri) else {
                trace!(instance = %instance.instance_id, uri = %instance.uri, "skipping unparseable instance URI");
                continue;
            };
            if parsed.addr != remote.addr {
                continue;
            }
            let slot = match parsed.port {
                Some(port) if port == remote.port => &mut exact,
                Some(_) => continue,
                None => &mut addr_only,
            };
            match slot {
                Some(best) if best.instance_id <= instance.instance_id => {}
                _ => *slot = Some(instance),
            }
        }
        if let Some(instance) = exact.or(addr_only) {
            return Some(instance.instance_id);
        }
    }
    None
}

/// Resolve by an endpoint name recovered from the payload. Only peer
/// instances declare endpoint names.
pub fn resolve_by_endpoint_name(store: &SecurityStore, name: &str) -> Option<InstanceId> {
    store.find_by_endpoint_name(name).map(|i| i.instance_id)
}

/// Resolve by the peer id (kid) of a compressed security header.
///
/// A malformed header or an absent kid is a miss, identical to an unknown
/// kid.
pub fn resolve_by_kid(
    store: &SecurityStore,
    contexts: &ContextPool,
    payload_header: &[u8],
) -> Option<(InstanceId, ContextId)> {
    let kid = match extract_kid(payload_header) {
        Ok(Some(kid)) => kid,
        Ok(None) => return None,
        Err(err) => {
            trace!(%err, "malformed compressed header");
            return None;
        }
    };
    let context = contexts.find_by_recipient_id(kid)?;
    let instance = store.find_by_oscore_context(context.id)?;
    Some((instance.instance_id, context.id))
}
