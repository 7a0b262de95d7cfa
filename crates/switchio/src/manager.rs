//! The connection manager.
//!
//! A manager owns at most one engine at a time, drives reconnection with
//! jittered exponential backoff, and multiplexes namespace sockets over
//! the shared session. Inbound engine data is decoded here and fanned out
//! to the sockets through the `packet` event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use switchio_engine::engine::{event as eevent, Data as EngineData, Engine, EnginePayload};
use switchio_engine::{
    DefaultHttpFactory, Emitter, EngineOptions, HttpFactory, Packet as EnginePacket, Scope, Sub,
    TimerHandle,
};

use crate::backoff::Backoff;
use crate::errors::ClientError;
use crate::packet::Packet;
use crate::socket::Socket;

/// Events raised by a manager.
pub mod event {
    pub const OPEN: &str = "open";
    pub const CLOSE: &str = "close";
    pub const ERROR: &str = "error";
    pub const PACKET: &str = "packet";
    pub const RECONNECT: &str = "reconnect";
    pub const RECONNECT_ATTEMPT: &str = "reconnect_attempt";
    pub const RECONNECT_ERROR: &str = "reconnect_error";
    pub const RECONNECT_FAILED: &str = "reconnect_failed";
}

/// Payload attached to a manager event.
#[derive(Debug, Clone, Default)]
pub enum ManagerPayload {
    #[default]
    None,
    /// `packet`: a decoded Socket.IO header frame
    Packet(Packet),
    /// `packet`: a raw binary attachment frame
    Binary(bytes::Bytes),
    /// `close`, `error` and `reconnect_error`
    Reason(String),
    /// `reconnect` and `reconnect_attempt`
    Attempt(u32),
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Reconnect automatically after a dropped session. Defaults to true.
    pub reconnection: bool,
    /// Give up after this many attempts. Defaults to unbounded.
    pub reconnection_attempts: u32,
    /// First reconnection delay. Defaults to 5 seconds.
    pub reconnection_delay: Duration,
    /// Delay cap. Defaults to 10 seconds.
    pub reconnection_delay_max: Duration,
    /// Backoff jitter in `[0, 1)`. Defaults to 0.5.
    pub randomization_factor: f64,
    /// Deadline for the engine handshake; zero aborts an `open`
    /// synchronously. Defaults to 20 seconds.
    pub timeout: Duration,
    /// Auth payload sent with every namespace `Connect`.
    pub auth: HashMap<String, String>,
    /// Engine and transport options.
    pub engine: EngineOptions,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        let mut engine = EngineOptions::default();
        // the application layer mounts under its own path
        engine.transport.path = "/socket.io/".into();
        Self {
            reconnection: true,
            reconnection_attempts: u32::MAX,
            reconnection_delay: Duration::from_secs(5),
            reconnection_delay_max: Duration::from_secs(10),
            randomization_factor: 0.5,
            timeout: Duration::from_secs(20),
            auth: HashMap::new(),
            engine,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Init,
    Opening,
    Open,
    Closed,
}

/// Completion callback of [`Manager::open`]: `None` on success, the error
/// reason otherwise.
pub type OpenCallback = Box<dyn FnOnce(Option<String>) + Send>;
type SharedCallback = Arc<Mutex<Option<OpenCallback>>>;

pub struct Manager {
    uri: String,
    opts: ManagerOptions,
    scope: Scope,
    factory: Arc<dyn HttpFactory>,
    events: Arc<Emitter<ManagerPayload>>,
    state: Mutex<ManagerState>,
    engine: Mutex<Option<Arc<Engine>>>,
    engine_subs: Mutex<Vec<Sub<EnginePayload>>>,
    backoff: Mutex<Backoff>,
    reconnecting: AtomicBool,
    skip_reconnect: AtomicBool,
    open_timer: Mutex<Option<TimerHandle>>,
    reconnect_timer: Mutex<Option<TimerHandle>>,
    sockets: Mutex<HashMap<String, Arc<Socket>>>,
}

impl Manager {
    /// Build a manager for `uri`. The URI is validated now; the engine
    /// itself is created per `open`.
    pub fn new(
        uri: impl Into<String>,
        opts: ManagerOptions,
        factory: Option<Arc<dyn HttpFactory>>,
    ) -> Result<Arc<Self>, ClientError> {
        let uri = uri.into();
        url::Url::parse(&uri).map_err(|_| ClientError::InvalidUrl(uri.clone()))?;
        let factory = match factory {
            Some(factory) => factory,
            None => Arc::new(DefaultHttpFactory::new(opts.engine.transport.trust_all_certs)?),
        };
        let backoff = Backoff::new(
            opts.reconnection_delay.as_millis() as u64,
            opts.reconnection_delay_max.as_millis() as u64,
            2,
            opts.randomization_factor,
        );
        Ok(Arc::new(Self {
            uri,
            opts,
            scope: Scope::new(),
            factory,
            events: Arc::new(Emitter::new()),
            state: Mutex::new(ManagerState::Init),
            engine: Mutex::new(None),
            engine_subs: Mutex::new(Vec::new()),
            backoff: Mutex::new(backoff),
            reconnecting: AtomicBool::new(false),
            skip_reconnect: AtomicBool::new(false),
            open_timer: Mutex::new(None),
            reconnect_timer: Mutex::new(None),
            sockets: Mutex::new(HashMap::new()),
        }))
    }

    pub fn events(&self) -> &Arc<Emitter<ManagerPayload>> {
        &self.events
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: ManagerState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scope
    }

    pub(crate) fn default_auth(&self) -> &HashMap<String, String> {
        &self.opts.auth
    }

    /// Backoff attempt count, exposed for the reconnection events.
    pub fn attempts(&self) -> u32 {
        self.backoff.lock().unwrap().attempts()
    }

    /// Update the first reconnection delay, mirrored into the backoff.
    pub fn set_reconnection_delay(&self, delay: Duration) {
        self.backoff
            .lock()
            .unwrap()
            .set_min(delay.as_millis() as u64);
    }

    /// Update the delay cap, mirrored into the backoff.
    pub fn set_reconnection_delay_max(&self, delay: Duration) {
        self.backoff
            .lock()
            .unwrap()
            .set_max(delay.as_millis() as u64);
    }

    /// Update the jitter, mirrored into the backoff. Panics outside `[0, 1)`.
    pub fn set_randomization_factor(&self, jitter: f64) {
        self.backoff.lock().unwrap().set_jitter(jitter);
    }

    // ==== namespace registry ====

    /// The socket for `nsp`, created on first use.
    pub fn socket(self: &Arc<Self>, nsp: &str) -> Arc<Socket> {
        let mut sockets = self.sockets.lock().unwrap();
        sockets
            .entry(nsp.to_owned())
            .or_insert_with(|| Socket::new(self.clone(), nsp, self.opts.auth.clone()))
            .clone()
    }

    /// Whether a socket exists for `nsp`, used by the entry multiplexing
    /// rule.
    pub fn has_socket(&self, nsp: &str) -> bool {
        self.sockets.lock().unwrap().contains_key(nsp)
    }

    /// Called by a socket after it tore down its subscriptions. The last
    /// active socket going away permits manager teardown.
    pub(crate) fn on_socket_destroyed(self: &Arc<Self>) {
        let any_active = self
            .sockets
            .lock()
            .unwrap()
            .values()
            .any(|socket| socket.active());
        if !any_active {
            tracing::debug!("no active sockets left, closing manager");
            self.close();
        }
    }

    // ==== opening ====

    /// Open the underlying engine. `callback` fires once with the outcome.
    pub fn open(self: &Arc<Self>, callback: Option<OpenCallback>) {
        let manager = self.clone();
        self.scope.post(move || manager.do_open(callback));
    }

    fn do_open(self: Arc<Self>, callback: Option<OpenCallback>) {
        if !matches!(self.state(), ManagerState::Init | ManagerState::Closed) {
            // already open or opening, report success right away
            if let Some(callback) = callback {
                callback(None);
            }
            return;
        }
        tracing::debug!("opening manager to {}", self.uri);
        self.set_state(ManagerState::Opening);
        self.skip_reconnect.store(false, Ordering::SeqCst);

        let engine = match Engine::new(
            &self.uri,
            self.opts.engine.clone(),
            self.scope.clone(),
            self.factory.clone(),
        ) {
            Ok(engine) => engine,
            Err(e) => {
                self.set_state(ManagerState::Closed);
                self.events
                    .emit(event::ERROR, &ManagerPayload::Reason(e.to_string()));
                if let Some(callback) = callback {
                    callback(Some(e.to_string()));
                }
                return;
            }
        };
        *self.engine.lock().unwrap() = Some(engine.clone());

        let callback: SharedCallback = Arc::new(Mutex::new(callback));
        let mut subs = Vec::new();

        let manager = Arc::downgrade(&self);
        let cb = callback.clone();
        let listener = engine.events().once(eevent::OPEN, move |_| {
            if let Some(manager) = manager.upgrade() {
                manager.on_engine_open(&cb);
            }
        });
        subs.push(Sub::new(engine.events().clone(), eevent::OPEN, listener));

        let manager = Arc::downgrade(&self);
        let cb = callback.clone();
        let listener = engine.events().once(eevent::ERROR, move |payload| {
            if let Some(manager) = manager.upgrade() {
                let reason = match payload {
                    EnginePayload::Reason(reason) => reason.clone(),
                    _ => "connect error".to_owned(),
                };
                manager.on_open_error(&cb, reason);
            }
        });
        subs.push(Sub::new(engine.events().clone(), eevent::ERROR, listener));
        *self.engine_subs.lock().unwrap() = subs;

        if self.opts.timeout.is_zero() {
            // a zero deadline aborts the open before it starts
            self.on_open_timeout(&callback);
            return;
        }
        let manager = Arc::downgrade(&self);
        let cb = callback.clone();
        let timer = self.scope.post_delayed(self.opts.timeout, move || {
            if let Some(manager) = manager.upgrade() {
                manager.on_open_timeout(&cb);
            }
        });
        *self.open_timer.lock().unwrap() = Some(timer);

        engine.open();
    }

    fn on_engine_open(self: &Arc<Self>, callback: &SharedCallback) {
        tracing::debug!("manager open");
        self.open_timer.lock().unwrap().take();
        self.engine_subs.lock().unwrap().clear();
        self.set_state(ManagerState::Open);
        self.events.emit(event::OPEN, &ManagerPayload::None);
        self.subscribe_engine();
        if let Some(callback) = callback.lock().unwrap().take() {
            callback(None);
        }
    }

    fn on_open_error(self: &Arc<Self>, callback: &SharedCallback, reason: String) {
        tracing::debug!("manager open error: {reason}");
        self.open_timer.lock().unwrap().take();
        self.cleanup();
        self.set_state(ManagerState::Closed);
        self.events
            .emit(event::ERROR, &ManagerPayload::Reason(reason));
        if let Some(callback) = callback.lock().unwrap().take() {
            callback(Some("Connection error".to_owned()));
        } else {
            self.maybe_reconnect_on_open();
        }
    }

    fn on_open_timeout(self: &Arc<Self>, callback: &SharedCallback) {
        if self.state() != ManagerState::Opening {
            return;
        }
        tracing::debug!("manager open timed out");
        self.cleanup();
        self.set_state(ManagerState::Closed);
        self.events
            .emit(event::ERROR, &ManagerPayload::Reason("timeout".to_owned()));
        if let Some(callback) = callback.lock().unwrap().take() {
            callback(Some("timeout".to_owned()));
        } else {
            self.maybe_reconnect_on_open();
        }
    }

    /// Subscriptions for an open session.
    fn subscribe_engine(self: &Arc<Self>) {
        let Some(engine) = self.engine.lock().unwrap().clone() else {
            return;
        };
        let mut subs = Vec::new();

        let manager = Arc::downgrade(self);
        let listener = engine.events().on(eevent::DATA, move |payload| {
            if let (Some(manager), EnginePayload::Data(data)) = (manager.upgrade(), payload) {
                manager.on_data(data.clone());
            }
        });
        subs.push(Sub::new(engine.events().clone(), eevent::DATA, listener));

        let manager = Arc::downgrade(self);
        let listener = engine.events().on(eevent::ERROR, move |payload| {
            if let Some(manager) = manager.upgrade() {
                let reason = match payload {
                    EnginePayload::Reason(reason) => reason.clone(),
                    _ => "engine error".to_owned(),
                };
                manager
                    .events
                    .emit(event::ERROR, &ManagerPayload::Reason(reason));
            }
        });
        subs.push(Sub::new(engine.events().clone(), eevent::ERROR, listener));

        let manager = Arc::downgrade(self);
        let listener = engine.events().on(eevent::CLOSE, move |payload| {
            if let Some(manager) = manager.upgrade() {
                let reason = match payload {
                    EnginePayload::Reason(reason) => reason.clone(),
                    _ => "transport close".to_owned(),
                };
                manager.on_engine_close(reason);
            }
        });
        subs.push(Sub::new(engine.events().clone(), eevent::CLOSE, listener));

        *self.engine_subs.lock().unwrap() = subs;
    }

    // ==== inbound ====

    fn on_data(self: &Arc<Self>, data: EngineData) {
        match data {
            EngineData::Text(text) => match Packet::decode(&text) {
                Ok(packet) => self
                    .events
                    .emit(event::PACKET, &ManagerPayload::Packet(packet)),
                Err(e) => self
                    .events
                    .emit(event::ERROR, &ManagerPayload::Reason(e.to_string())),
            },
            EngineData::Binary(data) => self
                .events
                .emit(event::PACKET, &ManagerPayload::Binary(data)),
        }
    }

    // ==== outbound ====

    /// Encode and hand a Socket.IO packet to the engine: the header frame
    /// first, then one binary frame per attachment.
    pub(crate) fn send_packet(self: &Arc<Self>, packet: Packet) {
        let Some(engine) = self.engine.lock().unwrap().clone() else {
            return;
        };
        tracing::debug!(ns = %packet.ns, "sending packet");
        let mut frames = Vec::with_capacity(1 + packet.attachments.len());
        frames.push(EnginePacket::Message(packet.encode()));
        for attachment in &packet.attachments {
            frames.push(EnginePacket::Binary(attachment.clone()));
        }
        engine.send(frames);
    }

    // ==== closing / reconnection ====

    fn cleanup(&self) {
        self.engine_subs.lock().unwrap().clear();
        if let Some(engine) = self.engine.lock().unwrap().take() {
            engine.close();
        }
    }

    fn on_engine_close(self: &Arc<Self>, reason: String) {
        tracing::debug!("engine closed: {reason}");
        self.cleanup();
        self.backoff.lock().unwrap().reset();
        self.set_state(ManagerState::Closed);
        self.events
            .emit(event::CLOSE, &ManagerPayload::Reason(reason));
        if self.opts.reconnection && !self.skip_reconnect.load(Ordering::SeqCst) {
            self.reconnect();
        }
    }

    fn maybe_reconnect_on_open(self: &Arc<Self>) {
        if !self.reconnecting.load(Ordering::SeqCst)
            && self.opts.reconnection
            && self.backoff.lock().unwrap().attempts() == 0
        {
            self.reconnect();
        }
    }

    fn reconnect(self: &Arc<Self>) {
        if self.reconnecting.load(Ordering::SeqCst) || self.skip_reconnect.load(Ordering::SeqCst) {
            return;
        }
        let attempt = self.backoff.lock().unwrap().attempts();
        if attempt >= self.opts.reconnection_attempts {
            tracing::warn!("reconnection attempts exhausted");
            self.backoff.lock().unwrap().reset();
            self.events
                .emit(event::RECONNECT_FAILED, &ManagerPayload::None);
            self.reconnecting.store(false, Ordering::SeqCst);
            return;
        }
        let delay = self.backoff.lock().unwrap().duration();
        tracing::debug!("reconnect attempt {attempt} in {delay:?}");
        self.reconnecting.store(true, Ordering::SeqCst);

        let manager = Arc::downgrade(self);
        let timer = self.scope.post_delayed(delay, move || {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            if manager.skip_reconnect.load(Ordering::SeqCst) {
                return;
            }
            manager
                .events
                .emit(event::RECONNECT_ATTEMPT, &ManagerPayload::Attempt(attempt));
            // a listener may have closed the manager
            if manager.skip_reconnect.load(Ordering::SeqCst) {
                return;
            }
            let weak = Arc::downgrade(&manager);
            manager.clone().do_open(Some(Box::new(move |err| {
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                if let Some(err) = err {
                    tracing::debug!("reconnect attempt failed: {err}");
                    manager.reconnecting.store(false, Ordering::SeqCst);
                    manager
                        .events
                        .emit(event::RECONNECT_ERROR, &ManagerPayload::Reason(err));
                    manager.reconnect();
                } else {
                    let attempts = manager.backoff.lock().unwrap().attempts();
                    tracing::debug!("reconnected after {attempts} attempt(s)");
                    manager.backoff.lock().unwrap().reset();
                    manager.reconnecting.store(false, Ordering::SeqCst);
                    manager
                        .events
                        .emit(event::RECONNECT, &ManagerPayload::Attempt(attempts));
                }
            })));
        });
        *self.reconnect_timer.lock().unwrap() = Some(timer);
    }

    /// Tear the connection down and suppress reconnection.
    pub fn close(self: &Arc<Self>) {
        let manager = self.clone();
        self.scope.post(move || {
            tracing::debug!("manager close");
            manager.skip_reconnect.store(true, Ordering::SeqCst);
            manager.reconnecting.store(false, Ordering::SeqCst);
            manager.open_timer.lock().unwrap().take();
            manager.reconnect_timer.lock().unwrap().take();
            manager.backoff.lock().unwrap().reset();
            manager.set_state(ManagerState::Closed);
            manager.cleanup();
        });
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("uri", &self.uri)
            .field("state", &self.state())
            .field("reconnecting", &self.reconnecting())
            .finish()
    }
}
