//! Transport event dispatcher
//!
//! The dispatcher is the single owner of all connection state. Transports,
//! configuration writers and request submitters feed one event queue; the
//! dispatcher task drains it, drives the protocol engine's periodic step on
//! a deadline, and is the only code that touches the registry, the security
//! store, the context pool and the credential mirror. No locks, no shared
//! state.
//!
//! Event-handling errors are discriminated by severity: configuration errors
//! stop the task, everything else is logged and the loop continues. A
//! datagram from a sender no security instance vouches for is dropped
//! silently; that is admission control, not a fault.

use core::time::Duration;

use lwm2m_core::{
    ClientConfig, ContextId, ContextParams, ContextPool, CredentialRegistry, DatagramTransport,
    DecodeOutcome, Endpoint, HeaderCodec, InstanceId, InstanceKind, Lwm2mError, ProtocolEngine,
    PskCredential, RequestError, SecureSessionId, SecureTransport, SecurityInstanceArgs,
    SecurityMode, SecurityStore, SessionHandle, TimeSource, TransportKind,
};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::credentials::CredentialManager;
use crate::registry::{ConnHandle, ConnList, Connection, ConnectionKind, ConnectionRegistry};
use crate::requests::PeerRequest;
use crate::resolver;
use crate::uri::parse_uri;

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Configuration mutations applied on the dispatcher task.
#[derive(Debug)]
pub enum SecurityCommand {
    Create {
        kind: InstanceKind,
        instance: InstanceId,
        args: SecurityInstanceArgs,
    },
    UpdateCredential {
        instance: InstanceId,
        credential: PskCredential,
    },
    Delete {
        instance: InstanceId,
    },
    /// Reconcile the transport credential registry against the store.
    RefreshAll,
}

/// Everything the dispatcher reacts to.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// One datagram from a transport task.
    Datagram {
        transport: TransportKind,
        remote: Endpoint,
        /// Present when the datagram arrived over an established encrypted
        /// session
        secure_session: Option<SecureSessionId>,
        /// Compressed-security-header option bytes, surfaced by the receive
        /// plumbing when the datagram carries them. Option extraction lives
        /// with the external codec; this layer only reads the peer id.
        security_header: Option<Vec<u8>>,
        payload: Vec<u8>,
    },
    Request(PeerRequest),
    Security(SecurityCommand),
    /// Force an engine step outside the periodic schedule.
    Step,
    Shutdown,
}

// ----------------------------------------------------------------------------
// Handle and Stats
// ----------------------------------------------------------------------------

/// Clonable submission side of the event queue.
#[derive(Clone)]
pub struct RuntimeHandle {
    sender: mpsc::Sender<RuntimeEvent>,
    capacity: usize,
    max_uri_len: usize,
}

impl RuntimeHandle {
    /// Queue an event without blocking.
    pub fn submit(&self, event: RuntimeEvent) -> Result<(), RequestError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RequestError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => RequestError::Closed,
        })
    }

    /// Validate and queue a peer request.
    pub fn submit_request(&self, request: PeerRequest) -> Result<(), RequestError> {
        request.validate(&lwm2m_core::RequestConfig {
            max_uri_len: self.max_uri_len,
        })?;
        self.submit(RuntimeEvent::Request(request))
    }

    pub fn shutdown(&self) -> Result<(), RequestError> {
        self.submit(RuntimeEvent::Shutdown)
    }
}

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub datagrams_delivered: u64,
    pub datagrams_dropped: u64,
    pub steps: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

/// The connection-layer event loop and its owned state.
pub struct Dispatcher {
    config: ClientConfig,
    registry: ConnectionRegistry,
    store: SecurityStore,
    contexts: ContextPool,
    credentials: CredentialManager,
    engine: Box<dyn ProtocolEngine>,
    codec: Box<dyn HeaderCodec>,
    udp: Box<dyn DatagramTransport>,
    dtls: Box<dyn SecureTransport>,
    time: Box<dyn TimeSource + Send>,
    receiver: mpsc::Receiver<RuntimeEvent>,
    stats: DispatcherStats,
    running: bool,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ClientConfig,
        engine: Box<dyn ProtocolEngine>,
        codec: Box<dyn HeaderCodec>,
        udp: Box<dyn DatagramTransport>,
        dtls: Box<dyn SecureTransport>,
        credential_registry: Box<dyn CredentialRegistry>,
        time: Box<dyn TimeSource + Send>,
    ) -> lwm2m_core::Result<(Self, RuntimeHandle)> {
        config.validate().map_err(Lwm2mError::configuration)?;

        let (sender, receiver) = mpsc::channel(config.queue.event_buffer);
        let handle = RuntimeHandle {
            sender,
            capacity: config.queue.event_buffer,
            max_uri_len: config.requests.max_uri_len,
        };
        let dispatcher = Self {
            registry: ConnectionRegistry::new(
                config.registry.server_capacity,
                config.registry.peer_capacity,
            ),
            store: SecurityStore::new(config.security.max_instances, config.security.max_key_len),
            contexts: ContextPool::new(config.security.max_contexts),
            credentials: CredentialManager::new(
                credential_registry,
                config.security.credential_tag_base,
            ),
            engine,
            codec,
            udp,
            dtls,
            time,
            receiver,
            stats: DispatcherStats::default(),
            running: true,
            config,
        };
        Ok((dispatcher, handle))
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats
    }

    pub fn store(&self) -> &SecurityStore {
        &self.store
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn contexts(&self) -> &ContextPool {
        &self.contexts
    }

    /// Derive a context into the pool. Called before start while wiring
    /// configuration, or between events by the embedding.
    pub fn create_context(&mut self, params: &ContextParams) -> lwm2m_core::Result<ContextId> {
        self.contexts.create(params)
    }

    pub fn update_context(
        &mut self,
        id: ContextId,
        params: &ContextParams,
    ) -> lwm2m_core::Result<()> {
        self.contexts.update(id, params)
    }

    /// Answer the encrypted transport's credential-selection callback for an
    /// inbound handshake from `remote`.
    pub fn credential_for(&self, remote: Endpoint) -> lwm2m_core::CredentialTag {
        crate::credentials::tag_for_endpoint(&self.store, remote)
    }

    // ------------------------------------------------------------------------
    // Event Loop
    // ------------------------------------------------------------------------

    /// Run until shutdown. The engine step runs on its own deadline; event
    /// bursts do not postpone it.
    pub async fn run(mut self) -> lwm2m_core::Result<()> {
        info!("dispatcher starting");
        let mut next_step = Instant::now() + self.config.step.min_interval;

        while self.running {
            tokio::select! {
                event = self.receiver.recv() => {
                    match event {
                        None | Some(RuntimeEvent::Shutdown) => {
                            self.running = false;
                        }
                        Some(event) => {
                            if let Err(err) = self.handle_event(event) {
                                match err {
                                    Lwm2mError::Configuration { .. } => {
                                        error!(%err, "unrecoverable error, dispatcher stopping");
                                        return Err(err);
                                    }
                                    err => warn!(%err, "event failed, continuing"),
                                }
                            }
                        }
                    }
                }
                _ = sleep_until(next_step) => {
                    let interval = self.step();
                    next_step = Instant::now() + interval;
                }
            }
        }

        info!("dispatcher stopped");
        Ok(())
    }

    /// Run the engine's periodic work and compute the wait until the next
    /// step. The engine's requested interval is clamped into the configured
    /// bounds; once registration has settled the wait is pinned to the
    /// minimum so refresh traffic cannot stall.
    pub fn step(&mut self) -> Duration {
        let outcome = self.engine.step(self.time.now());
        self.stats.steps += 1;
        debug!(state = %outcome.state, "engine stepped");

        let bounds = &self.config.step;
        if outcome.state.is_settled() {
            bounds.min_interval
        } else {
            outcome
                .next_interval
                .clamp(bounds.min_interval, bounds.max_interval)
        }
    }

    /// Apply one event. Public so tests can drive the dispatcher
    /// deterministically without the task loop.
    pub fn handle_event(&mut self, event: RuntimeEvent) -> lwm2m_core::Result<()> {
        match event {
            RuntimeEvent::Datagram {
                transport,
                remote,
                secure_session,
                security_header,
                payload,
            } => {
                self.handle_datagram(transport, remote, secure_session, security_header.as_deref(), &payload);
                Ok(())
            }
            RuntimeEvent::Request(request) => self.handle_request(request),
            RuntimeEvent::Security(command) => self.handle_security(command),
            RuntimeEvent::Step => {
                self.step();
                Ok(())
            }
            RuntimeEvent::Shutdown => {
                self.running = false;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Inbound Datagrams
    // ------------------------------------------------------------------------

    fn handle_datagram(
        &mut self,
        transport: TransportKind,
        remote: Endpoint,
        secure_session: Option<SecureSessionId>,
        security_header: Option<&[u8]>,
        payload: &[u8],
    ) {
        // known sender?
        let existing = match secure_session {
            Some(session) => self.registry.find_by_secure_session(session),
            None => self.registry.find_by_endpoint_transport(remote, transport),
        };
        if let Some(handle) = existing {
            self.deliver(handle, payload);
            return;
        }

        // admission: some security instance must vouch for the sender
        let resolved = self.resolve(remote, security_header, payload);
        let Some((instance_id, oscore_context)) = resolved else {
            debug!(%remote, %transport, "datagram from unknown sender dropped");
            self.stats.datagrams_dropped += 1;
            return;
        };

        let Some(instance) = self.store.get(instance_id) else {
            self.stats.datagrams_dropped += 1;
            return;
        };
        let list = match instance.kind {
            InstanceKind::Server => ConnList::Server,
            InstanceKind::Client => ConnList::Peer,
        };
        let kind = match (secure_session, oscore_context.or(instance.oscore_context)) {
            (Some(session), _) => ConnectionKind::Dtls { session },
            (None, Some(context)) => ConnectionKind::Oscore { context },
            (None, None) => ConnectionKind::Udp,
        };

        let conn = Connection {
            remote,
            kind,
            security_instance: instance_id,
            last_send: self.time.now(),
        };
        match self.registry.insert(list, conn) {
            Ok(handle) => {
                info!(%remote, instance = %instance_id, kind = %kind.transport(), "connection admitted");
                self.stats.connections_opened += 1;
                self.deliver(handle, payload);
            }
            Err(err) => {
                warn!(%remote, %err, "could not admit connection");
                self.stats.datagrams_dropped += 1;
            }
        }
    }

    fn resolve(
        &mut self,
        remote: Endpoint,
        security_header: Option<&[u8]>,
        payload: &[u8],
    ) -> Option<(InstanceId, Option<ContextId>)> {
        if let Some(instance) = resolver::resolve_by_location(&self.store, remote) {
            return Some((instance, None));
        }
        if let Some(name) = self.engine.extract_endpoint_name(payload) {
            if let Some(instance) = resolver::resolve_by_endpoint_name(&self.store, &name) {
                return Some((instance, None));
            }
        }
        resolver::resolve_by_kid(&self.store, &self.contexts, security_header?)
            .map(|(instance, context)| (instance, Some(context)))
    }

    fn deliver(&mut self, handle: ConnHandle, payload: &[u8]) {
        let Some(kind) = self.registry.get(handle).map(|c| c.kind) else {
            self.stats.datagrams_dropped += 1;
            return;
        };

        let plaintext = match kind {
            ConnectionKind::Oscore { context } => {
                let Some(ctx) = self.contexts.get_mut(context) else {
                    self.stats.datagrams_dropped += 1;
                    return;
                };
                match self.codec.decode(payload, ctx) {
                    Ok(DecodeOutcome::Plaintext(plaintext)) => Some(plaintext),
                    Ok(DecodeOutcome::NotThisMode) => {
                        debug!(context = %context, "datagram without security header dropped");
                        None
                    }
                    Err(err) => {
                        debug!(context = %context, %err, "undecryptable datagram dropped");
                        None
                    }
                }
            }
            _ => {
                self.engine.handle_inbound(handle.session(), payload);
                self.stats.datagrams_delivered += 1;
                return;
            }
        };

        match plaintext {
            Some(plaintext) => {
                self.engine.handle_inbound(handle.session(), &plaintext);
                self.stats.datagrams_delivered += 1;
            }
            None => self.stats.datagrams_dropped += 1,
        }
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Send one payload over the connection behind `session`. Stale handles
    /// are an error, not a panic.
    pub fn send(&mut self, session: SessionHandle, payload: &[u8]) -> lwm2m_core::Result<()> {
        let handle = ConnHandle::from_session(session);
        let Some(conn) = self.registry.get(handle) else {
            return Err(Lwm2mError::session_not_found(session));
        };
        let (remote, kind) = (conn.remote, conn.kind);

        match kind {
            ConnectionKind::Udp => self.udp.send(remote, payload)?,
            ConnectionKind::Dtls { session: secure } => self.dtls.send(secure, payload)?,
            ConnectionKind::Oscore { context } => {
                let ctx = self
                    .contexts
                    .get_mut(context)
                    .ok_or(Lwm2mError::Transport(
                        lwm2m_core::TransportError::SessionNotFound { session },
                    ))?;
                let protected = self.codec.encode(payload, ctx)?;
                self.udp.send(remote, &protected)?;
            }
        }

        if let Some(conn) = self.registry.get_mut(handle) {
            conn.last_send = self.time.now();
        }
        Ok(())
    }

    /// Close the connection behind `session`. A stale handle is a no-op.
    pub fn close_session(&mut self, session: SessionHandle) -> bool {
        let handle = ConnHandle::from_session(session);
        let Some(conn) = self.registry.close(handle) else {
            return false;
        };
        if let ConnectionKind::Dtls { session } = conn.kind {
            self.dtls.close(session);
        }
        info!(remote = %conn.remote, "connection closed");
        self.stats.connections_closed += 1;
        true
    }

    /// Connect to a configured server instance.
    pub fn connect_server(&mut self, instance_id: InstanceId) -> lwm2m_core::Result<SessionHandle> {
        self.connect_checked(instance_id, InstanceKind::Server)
    }

    /// Connect to a configured peer instance.
    pub fn connect_peer(&mut self, instance_id: InstanceId) -> lwm2m_core::Result<SessionHandle> {
        self.connect_checked(instance_id, InstanceKind::Client)
    }

    fn connect_checked(
        &mut self,
        instance_id: InstanceId,
        expected: InstanceKind,
    ) -> lwm2m_core::Result<SessionHandle> {
        let known = self
            .store
            .get(instance_id)
            .is_some_and(|instance| instance.kind == expected);
        if known {
            self.connect(instance_id)
        } else {
            Err(RequestError::UnknownInstance {
                instance: instance_id,
            }
            .into())
        }
    }

    /// Open a connection to the instance's configured location, performing
    /// the handshake when its mode calls for one.
    pub fn connect(&mut self, instance_id: InstanceId) -> lwm2m_core::Result<SessionHandle> {
        if let Some(handle) = self.registry.find_by_instance(instance_id) {
            return Ok(handle.session());
        }

        let instance = self
            .store
            .get(instance_id)
            .ok_or(RequestError::UnknownInstance {
                instance: instance_id,
            })?;
        let parsed = parse_uri(&instance.uri)?;
        let default_port = if instance.bootstrap {
            self.config.security.bootstrap_port
        } else {
            self.config.security.default_port
        };
        let remote = parsed.endpoint(default_port);
        let list = match instance.kind {
            InstanceKind::Server => ConnList::Server,
            InstanceKind::Client => ConnList::Peer,
        };
        let oscore_context = instance.oscore_context;
        let mode = instance.mode;
        let tag = self.credentials.select_tag(instance);

        // a handshake mode rides the encrypted scheme, everything else the plain one
        let wants_handshake = oscore_context.is_none() && mode != SecurityMode::NoSec;
        if parsed.secure != wants_handshake {
            return Err(Lwm2mError::configuration(format!(
                "scheme of {:?} does not match the security mode of instance {instance_id}",
                instance.uri
            )));
        }

        let kind = match (oscore_context, mode) {
            (Some(context), _) => ConnectionKind::Oscore { context },
            (None, SecurityMode::NoSec) => ConnectionKind::Udp,
            (None, _) => {
                let session =
                    self.dtls
                        .connect(remote, tag, self.config.security.handshake_timeout)?;
                ConnectionKind::Dtls { session }
            }
        };

        let conn = Connection {
            remote,
            kind,
            security_instance: instance_id,
            last_send: self.time.now(),
        };
        let handle = self.registry.insert(list, conn)?;
        info!(%remote, instance = %instance_id, kind = %kind.transport(), "connection opened");
        self.stats.connections_opened += 1;
        Ok(handle.session())
    }

    // ------------------------------------------------------------------------
    // Requests and Configuration
    // ------------------------------------------------------------------------

    fn handle_request(&mut self, request: PeerRequest) -> lwm2m_core::Result<()> {
        let session = self.connect(request.target())?;
        match request {
            PeerRequest::Read {
                path, on_response, ..
            } => self.engine.peer_read(session, &path, on_response)?,
            PeerRequest::Observe {
                path, on_notify, ..
            } => self.engine.peer_observe(session, &path, on_notify)?,
            PeerRequest::Authorize {
                host_uri,
                on_response,
                ..
            } => self.engine.peer_authorize(session, &host_uri, on_response)?,
        }
        Ok(())
    }

    fn handle_security(&mut self, command: SecurityCommand) -> lwm2m_core::Result<()> {
        match command {
            SecurityCommand::Create {
                kind,
                instance,
                args,
            } => {
                self.store.create(kind, instance, args)?;
                if let Some(created) = self.store.get_mut(instance) {
                    if created.needs_credential() {
                        self.credentials.instance_changed(created)?;
                    }
                }
                Ok(())
            }
            SecurityCommand::UpdateCredential {
                instance,
                credential,
            } => {
                self.store.update_credential(instance, credential)?;
                if let Some(updated) = self.store.get_mut(instance) {
                    self.credentials.instance_changed(updated)?;
                }
                Ok(())
            }
            SecurityCommand::Delete { instance } => {
                let Some(removed) = self.store.delete(instance) else {
                    return Err(lwm2m_core::StoreError::InstanceNotFound { instance }.into());
                };
                self.credentials.instance_removed(&removed);
                if let Some(handle) = self.registry.find_by_instance(instance) {
                    self.close_session(handle.session());
                }
                // free the context unless another instance still shares it
                if let Some(context) = removed.oscore_context {
                    if self.store.find_by_oscore_context(context).is_none() {
                        self.contexts.remove(context);
                    }
                }
                Ok(())
            }
            SecurityCommand::RefreshAll => {
                let summary = self.credentials.refresh_all(&mut self.store);
                info!(?summary, "credential mirror refreshed");
                Ok(())
            }
        }
    }
}
