//! Dispatcher scenario tests with mock collaborators
//!
//! The engine, codec, transports and credential registry are recording
//! fakes; every scenario drives `handle_event` deterministically, except the
//! final test which exercises the real task loop and its step deadline.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lwm2m_core::{
    AeadAlgorithm, AuthCallback, ClientConfig, CodecError, ContextParams, CredentialError,
    CredentialRegistry, CredentialTag, DatagramTransport, DecodeOutcome, DerivedContext, Endpoint,
    FsmState, HeaderCodec, HkdfAlgorithm, InstanceId, InstanceKind, ProtocolEngine, PskCredential,
    ReadCallback, RecipientId, RequestError, ResourcePath, SecureSessionId, SecureTransport,
    SecurityInstanceArgs, SecurityMode, SessionHandle, StepOutcome, TimeSource, Timestamp,
    TransportError, TransportKind,
};
use lwm2m_runtime::{
    ConnList, Dispatcher, PeerRequest, RuntimeEvent, RuntimeHandle, SecurityCommand,
};

// ----------------------------------------------------------------------------
// Mock Collaborators
// ----------------------------------------------------------------------------

#[derive(Default)]
struct EngineCalls {
    inbound: Vec<(SessionHandle, Vec<u8>)>,
    reads: Vec<(SessionHandle, String)>,
    observes: Vec<(SessionHandle, String)>,
    authorizes: Vec<(SessionHandle, String)>,
    steps: u64,
}

#[derive(Clone)]
struct MockEngine {
    calls: Arc<Mutex<EngineCalls>>,
    state: Arc<Mutex<FsmState>>,
    requested_interval: Duration,
}

impl MockEngine {
    fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(EngineCalls::default())),
            state: Arc::new(Mutex::new(FsmState::Registering)),
            requested_interval: Duration::from_secs(30),
        }
    }
}

impl ProtocolEngine for MockEngine {
    fn handle_inbound(&mut self, session: SessionHandle, payload: &[u8]) {
        self.calls.lock().unwrap().inbound.push((session, payload.to_vec()));
    }

    fn step(&mut self, _now: Timestamp) -> StepOutcome {
        self.calls.lock().unwrap().steps += 1;
        StepOutcome {
            state: *self.state.lock().unwrap(),
            next_interval: self.requested_interval,
        }
    }

    fn extract_endpoint_name(&self, payload: &[u8]) -> Option<String> {
        core::str::from_utf8(payload)
            .ok()?
            .strip_prefix("ep=")
            .map(str::to_string)
    }

    fn peer_read(
        &mut self,
        session: SessionHandle,
        path: &ResourcePath,
        mut on_response: ReadCallback,
    ) -> Result<(), CodecError> {
        self.calls.lock().unwrap().reads.push((session, path.to_string()));
        on_response(lwm2m_core::ResponseStatus::CONTENT, b"22.5");
        Ok(())
    }

    fn peer_observe(
        &mut self,
        session: SessionHandle,
        path: &ResourcePath,
        mut on_notify: ReadCallback,
    ) -> Result<(), CodecError> {
        self.calls.lock().unwrap().observes.push((session, path.to_string()));
        on_notify(lwm2m_core::ResponseStatus::CONTENT, b"first");
        Ok(())
    }

    fn peer_authorize(
        &mut self,
        session: SessionHandle,
        host_uri: &str,
        mut on_response: AuthCallback,
    ) -> Result<(), CodecError> {
        self.calls
            .lock()
            .unwrap()
            .authorizes
            .push((session, host_uri.to_string()));
        on_response(lwm2m_core::ResponseStatus::CHANGED);
        Ok(())
    }
}

/// Wraps and unwraps by prefixing `enc:`; anything unprefixed is not this
/// mode.
struct MockCodec;

impl HeaderCodec for MockCodec {
    fn encode(
        &mut self,
        plaintext: &[u8],
        _context: &mut DerivedContext,
    ) -> Result<Vec<u8>, CodecError> {
        let mut out = b"enc:".to_vec();
        out.extend_from_slice(plaintext);
        Ok(out)
    }

    fn decode(
        &mut self,
        datagram: &[u8],
        _context: &mut DerivedContext,
    ) -> Result<DecodeOutcome, CodecError> {
        match datagram.strip_prefix(b"enc:") {
            Some(rest) => Ok(DecodeOutcome::Plaintext(rest.to_vec())),
            None => Ok(DecodeOutcome::NotThisMode),
        }
    }
}

#[derive(Clone, Default)]
struct RecordingUdp {
    sends: Arc<Mutex<Vec<(Endpoint, Vec<u8>)>>>,
}

impl DatagramTransport for RecordingUdp {
    fn send(&mut self, remote: Endpoint, payload: &[u8]) -> Result<(), TransportError> {
        self.sends.lock().unwrap().push((remote, payload.to_vec()));
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingDtls {
    connects: Arc<Mutex<Vec<(Endpoint, CredentialTag, Duration)>>>,
    sends: Arc<Mutex<Vec<(SecureSessionId, Vec<u8>)>>>,
    closed: Arc<Mutex<Vec<SecureSessionId>>>,
    fail_handshake: Arc<Mutex<bool>>,
}

impl SecureTransport for RecordingDtls {
    fn connect(
        &mut self,
        remote: Endpoint,
        tag: CredentialTag,
        timeout: Duration,
    ) -> Result<SecureSessionId, TransportError> {
        if *self.fail_handshake.lock().unwrap() {
            return Err(TransportError::HandshakeTimeout {
                remote,
                duration_ms: timeout.as_millis() as u64,
            });
        }
        let mut connects = self.connects.lock().unwrap();
        connects.push((remote, tag, timeout));
        Ok(SecureSessionId::from_raw(connects.len() as u64))
    }

    fn send(&mut self, session: SecureSessionId, payload: &[u8]) -> Result<(), TransportError> {
        self.sends.lock().unwrap().push((session, payload.to_vec()));
        Ok(())
    }

    fn close(&mut self, session: SecureSessionId) {
        self.closed.lock().unwrap().push(session);
    }
}

#[derive(Clone, Default)]
struct MemoryCredentials {
    entries: Arc<Mutex<HashMap<CredentialTag, PskCredential>>>,
}

impl CredentialRegistry for MemoryCredentials {
    fn add(&mut self, tag: CredentialTag, credential: &PskCredential) -> Result<(), CredentialError> {
        self.entries.lock().unwrap().insert(tag, credential.clone());
        Ok(())
    }

    fn remove(&mut self, tag: CredentialTag) {
        self.entries.lock().unwrap().remove(&tag);
    }

    fn tags(&self) -> Vec<CredentialTag> {
        self.entries.lock().unwrap().keys().copied().collect()
    }
}

struct FixedTime;

impl TimeSource for FixedTime {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(1_000_000)
    }
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

struct Harness {
    dispatcher: Dispatcher,
    handle: RuntimeHandle,
    engine: MockEngine,
    udp: RecordingUdp,
    dtls: RecordingDtls,
    credentials: MemoryCredentials,
}

fn harness() -> Harness {
    let engine = MockEngine::new();
    let udp = RecordingUdp::default();
    let dtls = RecordingDtls::default();
    let credentials = MemoryCredentials::default();
    let (dispatcher, handle) = Dispatcher::new(
        ClientConfig::testing(),
        Box::new(engine.clone()),
        Box::new(MockCodec),
        Box::new(udp.clone()),
        Box::new(dtls.clone()),
        Box::new(credentials.clone()),
        Box::new(FixedTime),
    )
    .unwrap();
    Harness {
        dispatcher,
        handle,
        engine,
        udp,
        dtls,
        credentials,
    }
}

fn endpoint(addr: &str, port: u16) -> Endpoint {
    Endpoint::new(addr.parse::<IpAddr>().unwrap(), port)
}

fn datagram(remote: Endpoint, payload: &[u8]) -> RuntimeEvent {
    RuntimeEvent::Datagram {
        transport: TransportKind::Udp,
        remote,
        secure_session: None,
        security_header: None,
        payload: payload.to_vec(),
    }
}

fn nosec_args(short_id: u16, uri: &str) -> SecurityInstanceArgs {
    SecurityInstanceArgs {
        short_id,
        uri: uri.into(),
        endpoint_name: None,
        bootstrap: false,
        mode: SecurityMode::NoSec,
        credential: None,
        oscore_context: None,
    }
}

fn create(kind: InstanceKind, instance: u16, args: SecurityInstanceArgs) -> RuntimeEvent {
    RuntimeEvent::Security(SecurityCommand::Create {
        kind,
        instance: InstanceId::new(instance),
        args,
    })
}

// ----------------------------------------------------------------------------
// Admission
// ----------------------------------------------------------------------------

#[test]
fn unknown_sender_is_dropped_silently() {
    let mut h = harness();
    h.dispatcher
        .handle_event(datagram(endpoint("2001:db8::9", 5683), b"hello"))
        .unwrap();

    assert_eq!(h.dispatcher.stats().datagrams_dropped, 1);
    assert!(h.engine.calls.lock().unwrap().inbound.is_empty());
    assert!(h.dispatcher.registry().is_empty());
}

#[test]
fn configured_sender_is_admitted_and_delivered() {
    let mut h = harness();
    h.dispatcher
        .handle_event(create(
            InstanceKind::Server,
            0,
            nosec_args(1, "coap://[2001:db8::1]:5683"),
        ))
        .unwrap();

    let remote = endpoint("2001:db8::1", 5683);
    h.dispatcher.handle_event(datagram(remote, b"reg-reply")).unwrap();

    assert_eq!(h.dispatcher.registry().len(ConnList::Server), 1);
    assert_eq!(h.dispatcher.stats().connections_opened, 1);
    let inbound = h.engine.calls.lock().unwrap().inbound.clone();
    assert_eq!(inbound.len(), 1);
    assert_eq!(inbound[0].1, b"reg-reply");

    // a second datagram reuses the record
    h.dispatcher.handle_event(datagram(remote, b"more")).unwrap();
    assert_eq!(h.dispatcher.stats().connections_opened, 1);
    assert_eq!(h.dispatcher.stats().datagrams_delivered, 2);
}

#[test]
fn endpoint_name_admits_a_sender_at_an_unknown_address() {
    let mut h = harness();
    let mut args = nosec_args(2, "coap://[2001:db8::5]");
    args.endpoint_name = Some("sensor-7".into());
    h.dispatcher
        .handle_event(create(InstanceKind::Client, 0, args))
        .unwrap();

    // the sender roams: address matches nothing, the payload names it
    let remote = endpoint("2001:db8::bad", 40000);
    h.dispatcher.handle_event(datagram(remote, b"ep=sensor-7")).unwrap();

    assert_eq!(h.dispatcher.registry().len(ConnList::Peer), 1);
    assert_eq!(h.engine.calls.lock().unwrap().inbound.len(), 1);

    // an unknown name still drops
    h.dispatcher
        .handle_event(datagram(endpoint("2001:db8::bad2", 40000), b"ep=sensor-8"))
        .unwrap();
    assert_eq!(h.dispatcher.stats().datagrams_dropped, 1);
}

#[test]
fn header_peer_id_admits_and_unwraps() {
    let mut h = harness();
    let context = h
        .dispatcher
        .create_context(&ContextParams {
            master_secret: vec![1; 16],
            master_salt: vec![],
            id_context: None,
            sender_id: RecipientId::from_slice(&[]),
            recipient_id: RecipientId::from_slice(&[0x01]),
            aead: AeadAlgorithm::AesCcm16_64_128,
            hkdf: HkdfAlgorithm::Sha256,
        })
        .unwrap();
    let mut args = nosec_args(3, "coap://[2001:db8::7]");
    args.oscore_context = Some(context);
    h.dispatcher
        .handle_event(create(InstanceKind::Client, 0, args))
        .unwrap();

    let remote = endpoint("2001:db8::ffff", 50000);
    h.dispatcher
        .handle_event(RuntimeEvent::Datagram {
            transport: TransportKind::Udp,
            remote,
            secure_session: None,
            // flag 0x09: peer id present after a one-byte sequence number
            security_header: Some(vec![0x09, 0x00, 0x01]),
            payload: b"enc:inner".to_vec(),
        })
        .unwrap();

    let inbound = h.engine.calls.lock().unwrap().inbound.clone();
    assert_eq!(inbound.len(), 1);
    assert_eq!(inbound[0].1, b"inner");

    // replies go back wrapped over plain datagram
    let session = inbound[0].0;
    h.dispatcher.send(session, b"answer").unwrap();
    let sends = h.udp.sends.lock().unwrap();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].0, remote);
    assert_eq!(sends[0].1, b"enc:answer");
}

#[test]
fn unwrappable_datagram_on_a_wrapped_connection_is_dropped() {
    let mut h = harness();
    let context = h
        .dispatcher
        .create_context(&ContextParams {
            master_secret: vec![1; 16],
            master_salt: vec![],
            id_context: None,
            sender_id: RecipientId::from_slice(&[]),
            recipient_id: RecipientId::from_slice(&[0x01]),
            aead: AeadAlgorithm::AesCcm16_64_128,
            hkdf: HkdfAlgorithm::Sha256,
        })
        .unwrap();
    let mut args = nosec_args(3, "coap://[2001:db8::7]:5683");
    args.oscore_context = Some(context);
    h.dispatcher
        .handle_event(create(InstanceKind::Client, 0, args))
        .unwrap();

    let remote = endpoint("2001:db8::7", 5683);
    h.dispatcher.handle_event(datagram(remote, b"enc:first")).unwrap();
    assert_eq!(h.dispatcher.stats().datagrams_delivered, 1);

    // same connection, but the bytes carry no security header
    h.dispatcher.handle_event(datagram(remote, b"bare")).unwrap();
    assert_eq!(h.dispatcher.stats().datagrams_delivered, 1);
    assert_eq!(h.dispatcher.stats().datagrams_dropped, 1);
    assert_eq!(h.engine.calls.lock().unwrap().inbound.len(), 1);
}

// ----------------------------------------------------------------------------
// Outbound Connections
// ----------------------------------------------------------------------------

#[test]
fn connect_performs_handshake_with_the_registered_tag() {
    let mut h = harness();
    h.dispatcher
        .handle_event(RuntimeEvent::Security(SecurityCommand::Create {
            kind: InstanceKind::Server,
            instance: InstanceId::new(0),
            args: SecurityInstanceArgs {
                short_id: 1,
                uri: "coaps://[2001:db8::1]:5684".into(),
                endpoint_name: None,
                bootstrap: false,
                mode: SecurityMode::PreSharedKey,
                credential: Some(PskCredential::new("device-1", b"secret".to_vec())),
                oscore_context: None,
            },
        }))
        .unwrap();

    let session = h.dispatcher.connect(InstanceId::new(0)).unwrap();
    let connects = h.dtls.connects.lock().unwrap().clone();
    assert_eq!(connects.len(), 1);
    assert_eq!(connects[0].0, endpoint("2001:db8::1", 5684));
    // the tag handed to the handshake is the registered one
    assert_eq!(h.credentials.tags(), vec![connects[0].1]);
    // the configured handshake bound reaches the transport
    assert_eq!(connects[0].2, Duration::from_millis(50));

    // connecting again reuses the record
    assert_eq!(h.dispatcher.connect(InstanceId::new(0)).unwrap(), session);
    assert_eq!(h.dtls.connects.lock().unwrap().len(), 1);

    h.dispatcher.send(session, b"register").unwrap();
    assert_eq!(h.dtls.sends.lock().unwrap().len(), 1);
}

#[test]
fn handshake_failure_surfaces_and_leaves_no_record() {
    let mut h = harness();
    *h.dtls.fail_handshake.lock().unwrap() = true;
    h.dispatcher
        .handle_event(RuntimeEvent::Security(SecurityCommand::Create {
            kind: InstanceKind::Server,
            instance: InstanceId::new(0),
            args: SecurityInstanceArgs {
                short_id: 1,
                uri: "coaps://[2001:db8::1]:5684".into(),
                endpoint_name: None,
                bootstrap: false,
                mode: SecurityMode::PreSharedKey,
                credential: Some(PskCredential::new("device-1", b"secret".to_vec())),
                oscore_context: None,
            },
        }))
        .unwrap();

    assert!(h.dispatcher.connect(InstanceId::new(0)).is_err());
    assert!(h.dispatcher.registry().is_empty());
}

#[test]
fn uri_scheme_must_match_the_security_mode() {
    let mut h = harness();
    // encrypted scheme without a handshake mode
    h.dispatcher
        .handle_event(create(InstanceKind::Server, 0, nosec_args(1, "coaps://[2001:db8::1]:5684")))
        .unwrap();
    assert!(h.dispatcher.connect(InstanceId::new(0)).is_err());

    // handshake mode behind the plain scheme
    h.dispatcher
        .handle_event(RuntimeEvent::Security(SecurityCommand::Create {
            kind: InstanceKind::Server,
            instance: InstanceId::new(1),
            args: SecurityInstanceArgs {
                short_id: 2,
                uri: "coap://[2001:db8::2]:5683".into(),
                endpoint_name: None,
                bootstrap: false,
                mode: SecurityMode::PreSharedKey,
                credential: Some(PskCredential::new("device-1", b"secret".to_vec())),
                oscore_context: None,
            },
        }))
        .unwrap();
    assert!(h.dispatcher.connect(InstanceId::new(1)).is_err());

    assert!(h.dispatcher.registry().is_empty());
    assert!(h.dtls.connects.lock().unwrap().is_empty());
}

#[test]
fn plain_datagram_does_not_reach_an_encrypted_connection() {
    let mut h = harness();
    h.dispatcher
        .handle_event(RuntimeEvent::Security(SecurityCommand::Create {
            kind: InstanceKind::Server,
            instance: InstanceId::new(0),
            args: SecurityInstanceArgs {
                short_id: 1,
                uri: "coaps://[2001:db8::1]:5684".into(),
                endpoint_name: None,
                bootstrap: false,
                mode: SecurityMode::PreSharedKey,
                credential: Some(PskCredential::new("device-1", b"secret".to_vec())),
                oscore_context: None,
            },
        }))
        .unwrap();
    let secure_session = h.dispatcher.connect(InstanceId::new(0)).unwrap();

    // plain bytes from the same remote must not ride the encrypted record:
    // they are admitted separately, under their own session
    h.dispatcher
        .handle_event(datagram(endpoint("2001:db8::1", 5684), b"spoof"))
        .unwrap();
    let inbound = h.engine.calls.lock().unwrap().inbound.clone();
    assert_eq!(inbound.len(), 1);
    assert_ne!(inbound[0].0, secure_session);

    // a reply to the plain sender leaves over the plain transport
    h.dispatcher.send(inbound[0].0, b"plain-reply").unwrap();
    assert!(h.dtls.sends.lock().unwrap().is_empty());
    assert_eq!(h.udp.sends.lock().unwrap().len(), 1);
}

#[test]
fn bootstrap_instances_default_to_the_bootstrap_port() {
    let mut h = harness();
    let mut args = nosec_args(1, "coap://[2001:db8::1]");
    args.bootstrap = true;
    h.dispatcher
        .handle_event(create(InstanceKind::Server, 0, args))
        .unwrap();

    let session = h.dispatcher.connect(InstanceId::new(0)).unwrap();
    h.dispatcher.send(session, b"bs-request").unwrap();
    let sends = h.udp.sends.lock().unwrap();
    assert_eq!(sends[0].0.port, 5783);
}

#[test]
fn stale_session_send_fails_and_close_is_idempotent() {
    let mut h = harness();
    h.dispatcher
        .handle_event(create(InstanceKind::Server, 0, nosec_args(1, "coap://[2001:db8::1]:5683")))
        .unwrap();
    let session = h.dispatcher.connect(InstanceId::new(0)).unwrap();

    assert!(h.dispatcher.close_session(session));
    assert!(!h.dispatcher.close_session(session));
    assert!(h.dispatcher.send(session, b"late").is_err());
    assert_eq!(h.dispatcher.stats().connections_closed, 1);
}

// ----------------------------------------------------------------------------
// Peer Requests
// ----------------------------------------------------------------------------

#[test]
fn read_request_connects_and_reaches_the_engine() {
    let mut h = harness();
    h.dispatcher
        .handle_event(create(InstanceKind::Client, 4, nosec_args(2, "coap://[2001:db8::4]:5683")))
        .unwrap();

    let responses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&responses);
    h.dispatcher
        .handle_event(RuntimeEvent::Request(PeerRequest::Read {
            instance: InstanceId::new(4),
            path: "/3303/0/5700".parse().unwrap(),
            on_response: Box::new(move |status, payload| {
                sink.lock().unwrap().push((status, payload.to_vec()));
            }),
        }))
        .unwrap();

    assert_eq!(h.dispatcher.registry().len(ConnList::Peer), 1);
    let reads = h.engine.calls.lock().unwrap().reads.clone();
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].1, "/3303/0/5700");
    let responses = responses.lock().unwrap();
    assert_eq!(responses.len(), 1);
    assert!(responses[0].0.is_success());
    assert_eq!(responses[0].1, b"22.5");
}

#[test]
fn request_against_an_unknown_instance_fails() {
    let mut h = harness();
    let result = h.dispatcher.handle_event(RuntimeEvent::Request(PeerRequest::Observe {
        instance: InstanceId::new(9),
        path: ResourcePath::resource(3303, 0, 5700),
        on_notify: Box::new(|_, _| {}),
    }));
    assert!(matches!(
        result,
        Err(lwm2m_core::Lwm2mError::Request(RequestError::UnknownInstance { .. }))
    ));
}

#[test]
fn authorization_goes_through_the_vouching_server() {
    let mut h = harness();
    h.dispatcher
        .handle_event(create(InstanceKind::Server, 0, nosec_args(1, "coap://[2001:db8::1]:5683")))
        .unwrap();

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&outcomes);
    h.dispatcher
        .handle_event(RuntimeEvent::Request(PeerRequest::Authorize {
            server: InstanceId::new(0),
            host_uri: "coap://[2001:db8::4]:5683".into(),
            on_response: Box::new(move |status| sink.lock().unwrap().push(status)),
        }))
        .unwrap();

    let authorizes = h.engine.calls.lock().unwrap().authorizes.clone();
    assert_eq!(authorizes.len(), 1);
    assert_eq!(authorizes[0].1, "coap://[2001:db8::4]:5683");
    assert_eq!(outcomes.lock().unwrap().len(), 1);
}

#[test]
fn queue_backpressure_is_reported_to_the_submitter() {
    let h = harness();
    // the dispatcher is not draining: fill the buffer
    let capacity = ClientConfig::testing().queue.event_buffer;
    for _ in 0..capacity {
        h.handle
            .submit(datagram(endpoint("2001:db8::9", 1), b"x"))
            .unwrap();
    }
    assert!(matches!(
        h.handle.submit(datagram(endpoint("2001:db8::9", 1), b"x")),
        Err(RequestError::QueueFull { .. })
    ));
    assert!(matches!(
        h.handle.submit_request(PeerRequest::Authorize {
            server: InstanceId::new(0),
            host_uri: "x".repeat(300),
            on_response: Box::new(|_| {}),
        }),
        Err(RequestError::UriTooLong { .. })
    ));
}

// ----------------------------------------------------------------------------
// Task Loop
// ----------------------------------------------------------------------------

#[tokio::test]
async fn task_loop_steps_on_its_deadline_and_shuts_down() {
    let h = harness();
    let engine = h.engine.clone();
    let handle = h.handle.clone();
    // settled engines are stepped at the 10ms testing minimum, whatever
    // interval they request
    *engine.state.lock().unwrap() = FsmState::Ready;

    let task = tokio::spawn(h.dispatcher.run());

    tokio::time::sleep(Duration::from_millis(80)).await;
    handle.shutdown().unwrap();
    task.await.unwrap().unwrap();

    let steps = engine.calls.lock().unwrap().steps;
    assert!(steps >= 2, "expected repeated stepping, saw {steps}");
}

#[test]
fn explicit_step_event_runs_the_engine() {
    let mut h = harness();
    h.dispatcher.handle_event(RuntimeEvent::Step).unwrap();
    h.dispatcher.handle_event(RuntimeEvent::Step).unwrap();
    assert_eq!(h.engine.calls.lock().unwrap().steps, 2);
    assert_eq!(h.dispatcher.stats().steps, 2);
}

#[test]
fn handshake_credential_selection_matches_by_location() {
    let mut h = harness();
    h.dispatcher
        .handle_event(RuntimeEvent::Security(SecurityCommand::Create {
            kind: InstanceKind::Server,
            instance: InstanceId::new(0),
            args: SecurityInstanceArgs {
                short_id: 1,
                uri: "coaps://[2001:db8::1]:5684".into(),
                endpoint_name: None,
                bootstrap: false,
                mode: SecurityMode::PreSharedKey,
                credential: Some(PskCredential::new("device-1", b"secret".to_vec())),
                oscore_context: None,
            },
        }))
        .unwrap();

    let tag = h.dispatcher.credential_for(endpoint("2001:db8::1", 5684));
    assert!(!tag.is_empty());
    assert_eq!(h.credentials.tags(), vec![tag]);
    assert!(h
        .dispatcher
        .credential_for(endpoint("2001:db8::2", 5684))
        .is_empty());
}
