use std::io::Write;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::ack::AckRegistry;
use crate::config::{build_username, ClientConfig, TransportSpec};
use crate::error::{ClientError, Result};
use crate::registry::{Dispatch, SubscriptionRegistry};
use crate::session::{self, InboundEvent};
use crate::state::ConnectionState;
use crate::transport::tls::DirectTlsAdapter;
use crate::transport::websocket::SignedWebSocketAdapter;
use crate::transport::{DuplexByteChannel, TransportAdapter};
use crate::workpool::Workpool;

const SDK_PLATFORM: &str = "rust";
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const AGE_TICK_INTERVAL: Duration = Duration::from_secs(1);

enum Command {
    Connect,
    Disconnect,
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: crate::config::QoS,
        retain: bool,
        ack: Option<Box<dyn FnOnce() + Send>>,
        reply: Sender<Result<Option<u16>>>,
    },
    Subscribe {
        filter: String,
        qos: crate::config::QoS,
        dispatch: Dispatch,
        ack: Option<Box<dyn FnOnce() + Send>>,
        reply: Sender<Result<()>>,
    },
    Unsubscribe {
        filter: String,
        ack: Option<Box<dyn FnOnce() + Send>>,
        reply: Sender<Result<()>>,
    },
    Shutdown,
}

struct SharedState {
    status: ConnectionState,
    user_did_issue_connect: bool,
    user_did_issue_disconnect: bool,
    current_reconnect_secs: f64,
    connection_age_secs: u64,
    clean_session_effective: bool,
}

/// Owns the session and transport for one MQTT client identity (§4.3),
/// running the reconnect state machine on a dedicated event-loop thread.
/// Public operations hand a `Command` to that thread over a channel and
/// block for its reply, so the caller never touches the registries or the
/// transport directly.
pub struct LifecycleController {
    config: ClientConfig,
    transport_spec: TransportSpec,
    command_tx: Sender<Command>,
    loop_handle: Option<std::thread::JoinHandle<()>>,
    state: Arc<Mutex<SharedState>>,
}

impl LifecycleController {
    pub fn new(
        config: ClientConfig,
        transport_spec: TransportSpec,
        status_callback: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> Self {
        let (command_tx, command_rx) = bounded::<Command>(32);
        let state = Arc::new(Mutex::new(SharedState {
            status: ConnectionState::Disconnected,
            user_did_issue_connect: false,
            user_did_issue_disconnect: false,
            current_reconnect_secs: config.base_reconnect_secs,
            connection_age_secs: 0,
            clean_session_effective: config.clean_session,
        }));

        let loop_config = config.clone();
        let loop_state = state.clone();
        let loop_spec = transport_spec.clone();
        let loop_handle = std::thread::spawn(move || {
            EventLoop::new(loop_config, loop_spec, command_rx, loop_state, Arc::new(status_callback)).run();
        });

        LifecycleController {
            config,
            transport_spec,
            command_tx,
            loop_handle: Some(loop_handle),
            state,
        }
    }

    /// Returns `Ok(())` on successful initiation, or the documented
    /// `ConfigurationError`/`AlreadyConnecting` failure (§4.3, §7).
    pub fn connect(&self) -> Result<()> {
        {
            let mut guard = self.state.lock().unwrap();
            if guard.user_did_issue_connect {
                return Err(ClientError::AlreadyConnecting);
            }
            guard.user_did_issue_connect = true;
            guard.user_did_issue_disconnect = false;
        }
        self.command_tx
            .send(Command::Connect)
            .map_err(|_| ClientError::Transport("event loop has shut down".into()))
    }

    pub fn disconnect(&self) {
        let mut guard = self.state.lock().unwrap();
        if guard.user_did_issue_disconnect {
            return;
        }
        guard.user_did_issue_disconnect = true;
        guard.user_did_issue_connect = false;
        drop(guard);
        let _ = self.command_tx.send(Command::Disconnect);
    }

    fn check_usable(&self) -> Result<()> {
        let guard = self.state.lock().unwrap();
        if guard.user_did_issue_disconnect {
            return Err(ClientError::AlreadyDisconnected);
        }
        if !guard.user_did_issue_connect {
            return Err(ClientError::NotConnected);
        }
        Ok(())
    }

    pub fn publish(
        &self,
        topic: impl Into<String>,
        payload: Vec<u8>,
        qos: crate::config::QoS,
        retain: bool,
        ack: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<Option<u16>> {
        self.check_usable()?;
        if qos == crate::config::QoS::AtMostOnce && ack.is_some() {
            return Err(ClientError::InvalidArgument(
                "ack callback supplied for a QoS 0 publish",
            ));
        }
        let (reply, reply_rx) = bounded(1);
        self.command_tx
            .send(Command::Publish {
                topic: topic.into(),
                payload,
                qos,
                retain,
                ack,
                reply,
            })
            .map_err(|_| ClientError::Transport("event loop has shut down".into()))?;
        reply_rx
            .recv()
            .map_err(|_| ClientError::Transport("event loop dropped reply".into()))?
    }

    pub fn subscribe(
        &self,
        filter: impl Into<String>,
        qos: crate::config::QoS,
        dispatch: Dispatch,
        ack: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<()> {
        self.check_usable()?;
        let (reply, reply_rx) = bounded(1);
        self.command_tx
            .send(Command::Subscribe {
                filter: filter.into(),
                qos,
                dispatch,
                ack,
                reply,
            })
            .map_err(|_| ClientError::Transport("event loop has shut down".into()))?;
        reply_rx
            .recv()
            .map_err(|_| ClientError::Transport("event loop dropped reply".into()))?
    }

    pub fn unsubscribe(
        &self,
        filter: impl Into<String>,
        ack: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<()> {
        self.check_usable()?;
        let (reply, reply_rx) = bounded(1);
        self.command_tx
            .send(Command::Unsubscribe {
                filter: filter.into(),
                ack,
                reply,
            })
            .map_err(|_| ClientError::Transport("event loop has shut down".into()))?;
        reply_rx
            .recv()
            .map_err(|_| ClientError::Transport("event loop dropped reply".into()))?
    }

    pub fn status(&self) -> ConnectionState {
        self.state.lock().unwrap().status
    }

    fn transport_adapter(config: &ClientConfig, spec: &TransportSpec) -> Arc<dyn TransportAdapter> {
        let _ = config;
        match spec {
            TransportSpec::DirectTls {
                host,
                port,
                client_identity,
            } => Arc::new(DirectTlsAdapter::new(
                host.clone(),
                *port,
                client_identity.clone(),
                client_identity.is_some(),
            )),
            TransportSpec::SignedWebSocket {
                endpoint_host,
                region,
                credentials_provider,
            } => Arc::new(SignedWebSocketAdapter::new(
                endpoint_host.clone(),
                region.clone(),
                credentials_provider.clone(),
                crate::clock::SkewCorrectedClock::new(),
            )),
        }
    }
}

impl Drop for LifecycleController {
    /// Graceful teardown (§2.2 addendum): a controller dropped without an
    /// explicit `disconnect()` still stops the event-loop thread rather
    /// than leaking it.
    fn drop(&mut self) {
        self.disconnect();
        let _ = self.command_tx.send(Command::Shutdown);
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.join();
        }
    }
}

/// The single-threaded event loop (§5): owns the transport adapter, the
/// session's byte streams, the subscription and ack registries, and the
/// reconnect timers. Nothing here ever runs a user callback inline — every
/// dispatch goes through `workpool`.
/// One message surfaced by the per-connection reader thread (§4.2, §5):
/// a dedicated thread blocks on `session::read_event` so the event loop's
/// own `select!` never blocks on transport I/O directly.
enum TransportMessage {
    Event(InboundEvent),
    Closed,
    Error(ClientError),
}

struct EventLoop {
    config: ClientConfig,
    command_rx: Receiver<Command>,
    state: Arc<Mutex<SharedState>>,
    status_callback: Arc<dyn Fn(ConnectionState) + Send + Sync>,
    workpool: Workpool,
    subscriptions: Mutex<SubscriptionRegistry>,
    acks: Mutex<AckRegistry>,
    next_packet_id: AtomicU16,
    transport_spec: Option<TransportSpec>,
    writer: Option<Box<dyn Write + Send>>,
    shutdown_fn: Option<Box<dyn Fn() + Send + Sync>>,
    inbound_rx: Option<Receiver<TransportMessage>>,
    connecting_rx: Option<Receiver<Result<DuplexByteChannel>>>,
    reconnect_timer: Option<Receiver<std::time::Instant>>,
    username: String,
}

impl EventLoop {
    fn new(
        config: ClientConfig,
        transport_spec: TransportSpec,
        command_rx: Receiver<Command>,
        state: Arc<Mutex<SharedState>>,
        status_callback: Arc<dyn Fn(ConnectionState) + Send + Sync>,
    ) -> Self {
        let username = build_username(&config, SDK_PLATFORM, SDK_VERSION);
        EventLoop {
            config,
            command_rx,
            state,
            status_callback,
            workpool: Workpool::default(),
            subscriptions: Mutex::new(SubscriptionRegistry::new()),
            acks: Mutex::new(AckRegistry::new()),
            next_packet_id: AtomicU16::new(1),
            transport_spec: Some(transport_spec),
            writer: None,
            shutdown_fn: None,
            inbound_rx: None,
            connecting_rx: None,
            reconnect_timer: None,
            username,
        }
    }

    fn set_status(&self, status: ConnectionState) {
        self.state.lock().unwrap().status = status;
        let callback = self.status_callback.clone();
        self.workpool.spawn(move || callback(status));
    }

    fn next_packet_id(&self) -> u16 {
        let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            self.next_packet_id.fetch_add(1, Ordering::Relaxed)
        } else {
            id
        }
    }

    fn run(&mut self) {
        let heartbeat = tick(HEARTBEAT_INTERVAL);
        let mut age_timer: Option<Receiver<std::time::Instant>> = None;

        loop {
            let reconnect = self
                .reconnect_timer
                .clone()
                .unwrap_or_else(crossbeam_channel::never);
            let age = age_timer.clone().unwrap_or_else(crossbeam_channel::never);
            let inbound = self
                .inbound_rx
                .clone()
                .unwrap_or_else(crossbeam_channel::never);
            let connecting = self
                .connecting_rx
                .clone()
                .unwrap_or_else(crossbeam_channel::never);

            select! {
                recv(self.command_rx) -> cmd => match cmd {
                    Ok(Command::Shutdown) | Err(_) => {
                        self.teardown_transport();
                        return;
                    }
                    Ok(Command::Connect) => {
                        self.begin_connect();
                    }
                    Ok(Command::Disconnect) => {
                        if let Some(writer) = self.writer.as_mut() {
                            let _ = session::write_disconnect(writer);
                        }
                        self.hard_disconnect(&mut age_timer);
                        self.set_status(ConnectionState::Disconnected);
                    }
                    Ok(Command::Publish { topic, payload, qos, retain, ack, reply }) => {
                        let result = self.handle_publish(topic, payload, qos, retain, ack);
                        let _ = reply.send(result);
                    }
                    Ok(Command::Subscribe { filter, qos, dispatch, ack, reply }) => {
                        let result = self.handle_subscribe(filter, qos, dispatch, ack);
                        let _ = reply.send(result);
                    }
                    Ok(Command::Unsubscribe { filter, ack, reply }) => {
                        let result = self.handle_unsubscribe(filter, ack);
                        let _ = reply.send(result);
                    }
                },
                recv(heartbeat) -> _ => {
                    debug!("event loop heartbeat");
                }
                recv(age) -> _ => {
                    self.tick_connection_age(&mut age_timer);
                }
                recv(reconnect) -> _ => {
                    self.reconnect_timer = None;
                    self.begin_connect();
                }
                recv(inbound) -> msg => {
                    if let Ok(msg) = msg {
                        self.handle_transport_message(msg, &mut age_timer);
                    }
                }
                recv(connecting) -> result => {
                    self.connecting_rx = None;
                    if let Ok(result) = result {
                        self.on_connect_attempt_finished(result);
                    }
                }
            }
        }
    }

    /// Kicks off one connect attempt on a background thread (§5's
    /// "credentials-provider asynchronous fetch" suspension point): SigV4
    /// credential fetch, the TCP/TLS/WebSocket handshake, and writing the
    /// CONNECT packet are all blocking calls that must never run on the
    /// event loop thread itself. The outcome arrives back over
    /// `connecting_rx` and is handled by `on_connect_attempt_finished`.
    fn begin_connect(&mut self) {
        if self.connecting_rx.is_some() {
            return;
        }
        let spec = match &self.transport_spec {
            Some(spec) => spec,
            None => {
                error!("connect requested with no transport spec installed");
                return;
            }
        };

        self.set_status(ConnectionState::Connecting);
        let adapter = LifecycleController::transport_adapter(&self.config, spec);

        let (tx, rx) = bounded::<Result<DuplexByteChannel>>(1);
        std::thread::spawn(move || {
            let _ = tx.send(adapter.connect());
        });
        self.connecting_rx = Some(rx);
    }

    fn on_connect_attempt_finished(&mut self, result: Result<DuplexByteChannel>) {
        if self.state.lock().unwrap().user_did_issue_disconnect {
            // Cancellation (§5): disconnect() was issued while this attempt
            // was still in flight. Discard the outcome without installing it.
            if let Ok(channel) = result {
                (channel.shutdown)();
            }
            return;
        }

        let channel = match result {
            Ok(channel) => channel,
            Err(e) => {
                warn!("transport connect failed: {}", e);
                self.on_transport_error();
                return;
            }
        };

        let DuplexByteChannel {
            mut reader,
            mut writer,
            shutdown,
        } = channel;

        let mut effective_clean_session = self.state.lock().unwrap().clean_session_effective;
        if self.config.clean_session {
            self.subscriptions.lock().unwrap().clear();
        } else {
            effective_clean_session = false;
        }
        let mut connect_config = self.config.clone();
        connect_config.clean_session = effective_clean_session;

        if let Err(e) = session::write_connect(&mut writer, &connect_config, &self.username) {
            warn!("failed writing CONNECT: {}", e);
            shutdown();
            self.on_transport_error();
            return;
        }

        let (tx, rx) = bounded::<TransportMessage>(64);
        std::thread::spawn(move || loop {
            let message = match session::read_event(&mut reader) {
                Ok(Some(event)) => TransportMessage::Event(event),
                Ok(None) => {
                    let _ = tx.send(TransportMessage::Closed);
                    break;
                }
                Err(e) => {
                    let _ = tx.send(TransportMessage::Error(e));
                    break;
                }
            };
            if tx.send(message).is_err() {
                break;
            }
        });

        self.writer = Some(writer);
        self.shutdown_fn = Some(shutdown);
        self.inbound_rx = Some(rx);
        self.on_connected(effective_clean_session);
    }

    fn on_connected(&mut self, _clean_session: bool) {
        self.set_status(ConnectionState::Connected);
        self.state.lock().unwrap().connection_age_secs = 0;

        if self.config.auto_resubscribe {
            let filters = self.subscriptions.lock().unwrap().filters_and_qos();
            if !filters.is_empty() {
                if let Some(writer) = self.writer.as_mut() {
                    let packet_id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = session::write_subscribe(writer, packet_id, &filters) {
                        warn!("failed to re-issue subscriptions on reconnect: {}", e);
                    }
                }
            }
        }
    }

    fn tick_connection_age(&mut self, age_timer: &mut Option<Receiver<std::time::Instant>>) {
        let mut guard = self.state.lock().unwrap();
        guard.connection_age_secs += 1;
        if guard.connection_age_secs as f64 >= self.config.minimum_reconnect_secs {
            guard.current_reconnect_secs = self.config.base_reconnect_secs;
            *age_timer = None;
        }
    }

    fn on_transport_error(&mut self) {
        self.teardown_transport();
        let user_disconnected = self.state.lock().unwrap().user_did_issue_disconnect;
        if user_disconnected {
            self.set_status(ConnectionState::Disconnected);
            return;
        }
        self.set_status(ConnectionState::ConnectionError);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_timer.is_some() {
            return;
        }
        let delay_secs = {
            let mut guard = self.state.lock().unwrap();
            let current = guard.current_reconnect_secs;
            guard.current_reconnect_secs = (current * 2.0).min(self.config.maximum_reconnect_secs);
            guard.clean_session_effective = false;
            current
        };
        info!("scheduling reconnect in {:.1}s", delay_secs);
        self.reconnect_timer = Some(crossbeam_channel::after(Duration::from_secs_f64(
            delay_secs.min(1800.0),
        )));
    }

    fn teardown_transport(&mut self) {
        if let Some(shutdown) = self.shutdown_fn.take() {
            shutdown();
        }
        self.writer = None;
        self.inbound_rx = None;
    }

    /// Tears a connection down the same way a user-initiated `disconnect()`
    /// does (§3: the ack registry is purged on hard disconnect): transport
    /// closed, reconnect and age timers cancelled, subscriptions and
    /// pending acks cleared, and the disconnect flag set so `check_usable`
    /// reports `AlreadyDisconnected` rather than `NotConnected` until the
    /// caller issues a fresh `connect()`.
    fn hard_disconnect(&mut self, age_timer: &mut Option<Receiver<std::time::Instant>>) {
        self.teardown_transport();
        self.reconnect_timer = None;
        *age_timer = None;
        self.subscriptions.lock().unwrap().clear();
        self.acks.lock().unwrap().clear();
        let mut guard = self.state.lock().unwrap();
        guard.user_did_issue_connect = false;
        guard.user_did_issue_disconnect = true;
    }

    fn handle_transport_message(
        &mut self,
        message: TransportMessage,
        age_timer: &mut Option<Receiver<std::time::Instant>>,
    ) {
        match message {
            TransportMessage::Event(InboundEvent::Publish {
                topic,
                payload,
                qos,
                packet_id,
            }) => {
                self.dispatch_publish(&topic, &payload);
                if qos == crate::config::QoS::AtLeastOnce {
                    if let (Some(writer), Some(id)) = (self.writer.as_mut(), packet_id) {
                        let _ = session::write_puback(writer, id);
                    }
                }
            }
            TransportMessage::Event(InboundEvent::PubAck { packet_id })
            | TransportMessage::Event(InboundEvent::SubAck { packet_id, .. })
            | TransportMessage::Event(InboundEvent::UnsubAck { packet_id }) => {
                self.dispatch_ack(packet_id);
            }
            TransportMessage::Event(InboundEvent::ConnAck { return_code, .. }) => {
                if return_code != mqtt::control::variable_header::ConnectReturnCode::ConnectionAccepted {
                    warn!("broker refused CONNECT: {:?}", return_code);
                    self.hard_disconnect(age_timer);
                    self.set_status(ConnectionState::ConnectionRefused);
                    return;
                }
                if age_timer.is_none() {
                    *age_timer = Some(tick(AGE_TICK_INTERVAL));
                }
            }
            TransportMessage::Event(InboundEvent::PingResp) => {
                debug!("pingresp received");
            }
            TransportMessage::Closed => {
                warn!("transport closed by peer");
                self.on_transport_error();
            }
            TransportMessage::Error(e) => {
                error!("protocol error: {}", e);
                self.hard_disconnect(age_timer);
                self.set_status(ConnectionState::ProtocolError);
            }
        }
    }

    fn dispatch_publish(&self, topic: &str, payload: &[u8]) {
        let registry = self.subscriptions.lock().unwrap();
        for entry in registry.matching(topic) {
            match entry.dispatch.clone() {
                Dispatch::Simple(callback) => {
                    let payload = payload.to_vec();
                    self.workpool.spawn(move || callback(&payload));
                }
                Dispatch::Extended(callback) => {
                    let topic = topic.to_string();
                    let payload = payload.to_vec();
                    self.workpool.spawn(move || callback(&topic, &payload));
                }
            }
        }
    }

    fn dispatch_ack(&self, packet_id: u16) {
        let callback = self.acks.lock().unwrap().take(packet_id);
        if let Some(callback) = callback {
            self.workpool.spawn(callback);
        }
    }

    fn handle_publish(
        &mut self,
        topic: String,
        payload: Vec<u8>,
        qos: crate::config::QoS,
        retain: bool,
        ack: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<Option<u16>> {
        match qos {
            crate::config::QoS::AtMostOnce => {
                let writer = self.writer.as_mut().ok_or(ClientError::NotConnected)?;
                session::write_publish(writer, &topic, &payload, qos, 0, retain)?;
                Ok(None)
            }
            crate::config::QoS::AtLeastOnce => {
                let packet_id = self.next_packet_id();
                let writer = self.writer.as_mut().ok_or(ClientError::NotConnected)?;
                session::write_publish(writer, &topic, &payload, qos, packet_id, retain)?;
                if let Some(ack) = ack {
                    self.acks.lock().unwrap().bind(packet_id, ack);
                }
                Ok(Some(packet_id))
            }
        }
    }

    fn handle_subscribe(
        &mut self,
        filter: String,
        qos: crate::config::QoS,
        dispatch: Dispatch,
        ack: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<()> {
        let packet_id = self.next_packet_id();
        {
            let writer = self.writer.as_mut().ok_or(ClientError::NotConnected)?;
            session::write_subscribe(writer, packet_id, &[(filter.clone(), qos)])?;
        }
        self.subscriptions.lock().unwrap().put(&filter, qos, dispatch);
        if let Some(ack) = ack {
            self.acks.lock().unwrap().bind(packet_id, ack);
        }
        Ok(())
    }

    fn handle_unsubscribe(
        &mut self,
        filter: String,
        ack: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<()> {
        let packet_id = self.next_packet_id();
        {
            let writer = self.writer.as_mut().ok_or(ClientError::NotConnected)?;
            session::write_unsubscribe(writer, packet_id, &[filter.clone()])?;
        }
        self.subscriptions.lock().unwrap().remove(&filter);
        if let Some(ack) = ack {
            self.acks.lock().unwrap().bind(packet_id, ack);
        }
        Ok(())
    }
}
