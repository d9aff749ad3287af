//! Application-facing peer requests
//!
//! A request names a target by security instance and carries an owned
//! callback; the dispatcher materializes a connection on demand and hands
//! the request to the protocol engine. Validation happens before queueing so
//! the submitting task gets the error, not the event loop.

use lwm2m_core::{AuthCallback, InstanceId, ReadCallback, RequestConfig, RequestError, ResourcePath};

/// One request against another peer (or, for authorization, against the
/// server that vouches for it).
pub enum PeerRequest {
    /// Read a resource on a peer.
    Read {
        instance: InstanceId,
        path: ResourcePath,
        on_response: ReadCallback,
    },
    /// Observe a resource on a peer; the callback fires per notification.
    Observe {
        instance: InstanceId,
        path: ResourcePath,
        on_notify: ReadCallback,
    },
    /// Ask a server to authorize access to the peer behind `host_uri`.
    Authorize {
        server: InstanceId,
        host_uri: String,
        on_response: AuthCallback,
    },
}

impl PeerRequest {
    /// The instance the dispatcher must hold a connection to.
    pub fn target(&self) -> InstanceId {
        match self {
            PeerRequest::Read { instance, .. } | PeerRequest::Observe { instance, .. } => *instance,
            PeerRequest::Authorize { server, .. } => *server,
        }
    }

    /// Validate argument sizes before queueing.
    pub fn validate(&self, config: &RequestConfig) -> Result<(), RequestError> {
        if let PeerRequest::Authorize { host_uri, .. } = self {
            if host_uri.len() > config.max_uri_len {
                return Err(RequestError::UriTooLong {
                    max: config.max_uri_len,
                    actual: host_uri.len(),
                });
            }
        }
        Ok(())
    }
}

impl core::fmt::Debug for PeerRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PeerRequest::Read { instance, path, .. } => f
                .debug_struct("Read")
                .field("instance", instance)
                .field("path", &path.to_string())
                .finish_non_exhaustive(),
            PeerRequest::Observe { instance, path, .. } => f
                .debug_struct("Observe")
                .field("instance", instance)
                .field("path", &path.to_string())
                .finish_non_exhaustive(),
            PeerRequest::Authorize { server, host_uri, .. } => f
                .debug_struct("Authorize")
                .field("server", server)
                .field("host_uri", host_uri)
                .finish_non_exhaustive(),
        }
    }
}
