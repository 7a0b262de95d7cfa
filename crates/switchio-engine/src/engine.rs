//! The Engine.IO session state machine.
//!
//! An [`Engine`] owns exactly one transport at a time. It performs the
//! handshake, watches the server heartbeat, buffers outbound packets until
//! the transport drains them, and runs the probe dance that upgrades a
//! polling session to websocket without losing a packet.
//!
//! Every method that transitions state runs on the serialized [`Scope`];
//! the public entry points (`open`, `send`, `close`) post themselves onto
//! it and return immediately.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use crate::config::EngineOptions;
use crate::emitter::{Emitter, Sub};
use crate::error::EngineError;
use crate::http::HttpFactory;
use crate::packet::{OpenPacket, Packet, PacketBuf};
use crate::scope::{Scope, TimerHandle};
use crate::transport::{
    event as tevent, polling, polling::PollingTransport, ws, ws::WebSocketTransport, Transport,
    TransportCore, TransportPayload,
};

/// Events raised by an engine.
pub mod event {
    pub const OPEN: &str = "open";
    pub const CLOSE: &str = "close";
    pub const PACKET: &str = "packet";
    pub const HANDSHAKE: &str = "handshake";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const DATA: &str = "data";
    pub const PING: &str = "ping";
    pub const FLUSH: &str = "flush";
    pub const DRAIN: &str = "drain";
    pub const UPGRADING: &str = "upgrading";
    pub const UPGRADE: &str = "upgrade";
    pub const UPGRADE_ERROR: &str = "upgradeError";
    pub const ERROR: &str = "error";
}

/// Payload of a `data` event: the application message a `Message` or
/// binary packet carried.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Text(String),
    Binary(Bytes),
}

/// Payload attached to an engine event.
#[derive(Debug, Clone, Default)]
pub enum EnginePayload {
    #[default]
    None,
    /// `packet`
    Packet(Packet),
    /// `data`
    Data(Data),
    /// `handshake`
    Open(OpenPacket),
    /// `close`, `error` and `upgradeError`
    Reason(String),
    /// `upgrading` and `upgrade`: the transport name
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Init,
    Opening,
    Open,
    Closing,
    Closed,
}

/// Process-wide hint: whether a websocket transport ever opened
/// successfully. Consulted when `remember_upgrade` is set to skip the
/// polling round-trip on later sessions.
static PRIOR_WEBSOCKET_SUCCESS: AtomicBool = AtomicBool::new(false);

/// One in-flight upgrade attempt.
///
/// A probe freezes exactly once: freezing marks it failed, drops its
/// subscriptions and closes the candidate. The success path detaches the
/// candidate first so a late freeze cannot touch the adopted transport.
struct Probe {
    name: String,
    candidate: Mutex<Option<Arc<dyn Transport>>>,
    failed: AtomicBool,
    subs: Mutex<Vec<Sub<TransportPayload>>>,
    engine_subs: Mutex<Vec<Sub<EnginePayload>>>,
}

impl Probe {
    fn new(name: &str, candidate: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            candidate: Mutex::new(Some(candidate)),
            failed: AtomicBool::new(false),
            subs: Mutex::new(Vec::new()),
            engine_subs: Mutex::new(Vec::new()),
        })
    }

    fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn freeze(&self) {
        if self.failed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("freezing probe of {}", self.name);
        self.subs.lock().unwrap().clear();
        self.engine_subs.lock().unwrap().clear();
        if let Some(candidate) = self.candidate.lock().unwrap().take() {
            candidate.close();
        }
    }

    /// Success path: drop the probe subscriptions but keep the candidate
    /// alive and out of reach of any later freeze.
    fn detach_candidate(&self) -> Option<Arc<dyn Transport>> {
        self.subs.lock().unwrap().clear();
        self.engine_subs.lock().unwrap().clear();
        self.candidate.lock().unwrap().take()
    }
}

pub struct Engine {
    opts: EngineOptions,
    scope: Scope,
    factory: Arc<dyn HttpFactory>,
    events: Arc<Emitter<EnginePayload>>,
    state: Mutex<EngineState>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    transport_subs: Mutex<Vec<Sub<TransportPayload>>>,
    sid: Mutex<Option<String>>,
    ping_interval: AtomicU64,
    ping_timeout: AtomicU64,
    max_payload: AtomicU64,
    upgrading: AtomicBool,
    write_buffer: Mutex<VecDeque<Packet>>,
    /// Count of buffered packets already handed to the transport and
    /// awaiting its drain.
    prev_buffer_len: AtomicUsize,
    heartbeat_timer: Mutex<Option<TimerHandle>>,
    probe: Mutex<Option<Arc<Probe>>>,
}

impl Engine {
    /// Build an engine for `uri`. The scheme picks `secure`, the URI query
    /// is merged into the transport query, and an IPv6 literal host loses
    /// its brackets until URL construction re-adds them.
    pub fn new(
        uri: &str,
        mut opts: EngineOptions,
        scope: Scope,
        factory: Arc<dyn HttpFactory>,
    ) -> Result<Arc<Self>, EngineError> {
        let url = url::Url::parse(uri).map_err(|_| EngineError::InvalidUrl(uri.to_owned()))?;
        opts.transport.secure = matches!(url.scheme(), "https" | "wss");
        if let Some(host) = url.host_str() {
            opts.transport.hostname = host
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_owned();
        }
        opts.transport.port = url
            .port()
            .unwrap_or(if opts.transport.secure { 443 } else { 80 });
        for (key, value) in url.query_pairs() {
            opts.transport
                .query
                .entry(key.into_owned())
                .or_insert(value.into_owned());
        }

        Ok(Arc::new(Self {
            opts,
            scope,
            factory,
            events: Arc::new(Emitter::new()),
            state: Mutex::new(EngineState::Init),
            transport: Mutex::new(None),
            transport_subs: Mutex::new(Vec::new()),
            sid: Mutex::new(None),
            ping_interval: AtomicU64::new(0),
            ping_timeout: AtomicU64::new(0),
            max_payload: AtomicU64::new(0),
            upgrading: AtomicBool::new(false),
            write_buffer: Mutex::new(VecDeque::new()),
            prev_buffer_len: AtomicUsize::new(0),
            heartbeat_timer: Mutex::new(None),
            probe: Mutex::new(None),
        }))
    }

    pub fn events(&self) -> &Arc<Emitter<EnginePayload>> {
        &self.events
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn sid(&self) -> Option<String> {
        self.sid.lock().unwrap().clone()
    }

    pub fn transport_name(&self) -> Option<&'static str> {
        self.transport.lock().unwrap().as_ref().map(|t| t.name())
    }

    pub fn upgrading(&self) -> bool {
        self.upgrading.load(Ordering::SeqCst)
    }

    /// Maximum polling payload size the server announced, 0 before the
    /// handshake.
    pub fn max_payload(&self) -> u64 {
        self.max_payload.load(Ordering::SeqCst)
    }

    /// The subset of `remote` upgrades this engine is configured to use,
    /// minus the transport it is already on.
    pub fn filter_upgrades(&self, remote: &[String]) -> Vec<String> {
        let current = self.transport_name();
        remote
            .iter()
            .filter(|name| {
                self.opts.transports.iter().any(|t| t == *name)
                    && current != Some(name.as_str())
            })
            .cloned()
            .collect()
    }

    // ==== opening ====

    /// Start the session. Returns immediately; progress is reported through
    /// the `open`, `handshake` and `error` events.
    pub fn open(self: &Arc<Self>) {
        let engine = self.clone();
        self.scope.post(move || engine.do_open());
    }

    fn do_open(self: Arc<Self>) {
        if !matches!(self.state(), EngineState::Init | EngineState::Closed) {
            return;
        }
        let remembered = self.opts.remember_upgrade
            && PRIOR_WEBSOCKET_SUCCESS.load(Ordering::SeqCst)
            && self.opts.transports.iter().any(|t| t == ws::NAME);
        let name = if remembered {
            ws::NAME.to_owned()
        } else {
            match self.opts.transports.first() {
                Some(name) => name.clone(),
                None => {
                    self.events.emit(
                        event::ERROR,
                        &EnginePayload::Reason("no transports configured".into()),
                    );
                    return;
                }
            }
        };
        tracing::debug!("opening engine with transport {name}");
        self.set_state(EngineState::Opening);
        match self.create_transport(&name) {
            Ok(transport) => {
                self.set_transport(transport.clone());
                transport.open();
            }
            Err(e) => {
                self.events
                    .emit(event::ERROR, &EnginePayload::Reason(e.to_string()));
                self.set_state(EngineState::Closed);
            }
        }
    }

    fn create_transport(&self, name: &str) -> Result<Arc<dyn Transport>, EngineError> {
        let opts = self.opts.options_for(name);
        let mut query = opts.query.clone();
        query.insert("EIO".into(), "4".into());
        query.insert("transport".into(), name.to_owned());
        if let Some(sid) = self.sid.lock().unwrap().as_ref() {
            query.insert("sid".into(), sid.clone());
        }
        let core = TransportCore::new(opts, query, self.scope.clone(), self.factory.clone());
        match name {
            polling::NAME => Ok(PollingTransport::new(core) as Arc<dyn Transport>),
            ws::NAME => Ok(WebSocketTransport::new(core) as Arc<dyn Transport>),
            other => Err(EngineError::UnknownTransport(other.to_owned())),
        }
    }

    /// Adopt `transport` as the current carrier. Subscriptions to the
    /// previous one are destroyed first; the previous transport itself is
    /// dropped without a closing handshake (the upgrade path has already
    /// paused it).
    fn set_transport(self: &Arc<Self>, transport: Arc<dyn Transport>) {
        let mut subs = Vec::new();
        let events = transport.core().events.clone();

        let engine = Arc::downgrade(self);
        let listener = events.on(tevent::DRAIN, move |payload| {
            if let (Some(engine), TransportPayload::Count(n)) = (engine.upgrade(), payload) {
                engine.on_drain(*n);
            }
        });
        subs.push(Sub::new(events.clone(), tevent::DRAIN, listener));

        let engine = Arc::downgrade(self);
        let listener = events.on(tevent::PACKET, move |payload| {
            if let (Some(engine), TransportPayload::Packet(packet)) = (engine.upgrade(), payload) {
                engine.on_packet(packet.clone());
            }
        });
        subs.push(Sub::new(events.clone(), tevent::PACKET, listener));

        let engine = Arc::downgrade(self);
        let listener = events.on(tevent::ERROR, move |payload| {
            if let Some(engine) = engine.upgrade() {
                let reason = match payload {
                    TransportPayload::Reason(reason) => reason.clone(),
                    _ => "transport error".to_owned(),
                };
                engine.on_error(reason);
            }
        });
        subs.push(Sub::new(events.clone(), tevent::ERROR, listener));

        let engine = Arc::downgrade(self);
        let listener = events.on(tevent::CLOSE, move |_| {
            if let Some(engine) = engine.upgrade() {
                engine.on_close("transport close");
            }
        });
        subs.push(Sub::new(events.clone(), tevent::CLOSE, listener));

        *self.transport_subs.lock().unwrap() = subs;
        *self.transport.lock().unwrap() = Some(transport);
    }

    // ==== inbound ====

    fn on_packet(self: &Arc<Self>, packet: Packet) {
        if self.state() == EngineState::Closed {
            tracing::debug!("packet received with closed engine");
            return;
        }
        self.events
            .emit(event::PACKET, &EnginePayload::Packet(packet.clone()));
        self.events.emit(event::HEARTBEAT, &EnginePayload::None);
        self.on_heartbeat();

        match packet {
            Packet::Open(open) => self.on_handshake(open),
            Packet::Ping(_) => {
                self.events.emit(event::PING, &EnginePayload::None);
                self.send_packet(Packet::Pong(None));
            }
            Packet::Message(data) => self
                .events
                .emit(event::DATA, &EnginePayload::Data(Data::Text(data))),
            Packet::Binary(data) => self
                .events
                .emit(event::DATA, &EnginePayload::Data(Data::Binary(data))),
            _ => {}
        }
    }

    fn on_handshake(self: &Arc<Self>, open: OpenPacket) {
        tracing::debug!(sid = %open.sid, "handshake");
        self.events
            .emit(event::HANDSHAKE, &EnginePayload::Open(open.clone()));
        *self.sid.lock().unwrap() = Some(open.sid.clone());
        if let Some(transport) = self.transport.lock().unwrap().as_ref() {
            transport.core().set_query_param("sid", &open.sid);
        }
        self.ping_interval
            .store(open.ping_interval, Ordering::SeqCst);
        self.ping_timeout.store(open.ping_timeout, Ordering::SeqCst);
        self.max_payload.store(open.max_payload, Ordering::SeqCst);
        let upgrades = self.filter_upgrades(&open.upgrades);

        self.on_open();
        // the open handler may have closed the session
        if self.state() == EngineState::Closed {
            return;
        }
        self.on_heartbeat();

        if self.opts.upgrade && self.transport_name() == Some(polling::NAME) {
            for candidate in upgrades {
                self.probe(&candidate);
            }
        }
    }

    fn on_open(self: &Arc<Self>) {
        self.set_state(EngineState::Open);
        PRIOR_WEBSOCKET_SUCCESS.store(self.transport_name() == Some(ws::NAME), Ordering::SeqCst);
        self.events.emit(event::OPEN, &EnginePayload::None);
        self.flush();
    }

    fn on_error(self: &Arc<Self>, reason: String) {
        tracing::debug!("engine error: {reason}");
        PRIOR_WEBSOCKET_SUCCESS.store(false, Ordering::SeqCst);
        self.events
            .emit(event::ERROR, &EnginePayload::Reason(reason));
        self.on_close("transport error");
    }

    // ==== heartbeat ====

    /// Re-arm the watchdog. The session dies when no packet arrives within
    /// `pingInterval + pingTimeout`.
    fn on_heartbeat(self: &Arc<Self>) {
        let interval = self.ping_interval.load(Ordering::SeqCst);
        if interval == 0 {
            // not handshaken yet
            return;
        }
        let delay = Duration::from_millis(interval + self.ping_timeout.load(Ordering::SeqCst));
        let engine = Arc::downgrade(self);
        let timer = self.scope.post_delayed(delay, move || {
            if let Some(engine) = engine.upgrade() {
                if engine.state() != EngineState::Closed {
                    engine.on_close("ping timeout");
                }
            }
        });
        // replacing the handle cancels the previous watchdog
        *self.heartbeat_timer.lock().unwrap() = Some(timer);
    }

    // ==== outbound ====

    /// Buffer packets and try to flush. A no-op unless the session is
    /// opening or open.
    pub fn send(self: &Arc<Self>, packets: impl IntoIterator<Item = Packet> + Send + 'static) {
        let engine = self.clone();
        self.scope.post(move || engine.do_send(packets));
    }

    fn send_packet(self: &Arc<Self>, packet: Packet) {
        self.do_send(std::iter::once(packet));
    }

    fn do_send(self: &Arc<Self>, packets: impl IntoIterator<Item = Packet>) {
        if !matches!(self.state(), EngineState::Opening | EngineState::Open) {
            return;
        }
        self.write_buffer.lock().unwrap().extend(packets);
        self.flush();
    }

    fn flush(self: &Arc<Self>) {
        if self.state() == EngineState::Closed || self.upgrading.load(Ordering::SeqCst) {
            return;
        }
        let Some(transport) = self.transport.lock().unwrap().clone() else {
            return;
        };
        if !transport.core().writable() {
            return;
        }
        let batch: PacketBuf = {
            let buffer = self.write_buffer.lock().unwrap();
            let prev = self.prev_buffer_len.load(Ordering::SeqCst);
            if buffer.len() <= prev {
                return;
            }
            let batch = buffer.iter().skip(prev).cloned().collect();
            self.prev_buffer_len.store(buffer.len(), Ordering::SeqCst);
            batch
        };
        tracing::debug!("flushing {} packet(s)", batch.len());
        self.events.emit(event::FLUSH, &EnginePayload::None);
        transport.send(batch);
    }

    fn on_drain(self: &Arc<Self>, n: usize) {
        let remaining = {
            let mut buffer = self.write_buffer.lock().unwrap();
            let n = n.min(buffer.len());
            buffer.drain(..n);
            buffer.len()
        };
        let prev = self
            .prev_buffer_len
            .load(Ordering::SeqCst)
            .saturating_sub(n);
        self.prev_buffer_len.store(prev, Ordering::SeqCst);
        if remaining == 0 {
            self.events.emit(event::DRAIN, &EnginePayload::None);
        } else if remaining > prev {
            self.flush();
        }
    }

    // ==== probe / upgrade ====

    fn probe(self: &Arc<Self>, name: &str) {
        tracing::debug!("probing transport {name}");
        let candidate = match self.create_transport(name) {
            Ok(candidate) => candidate,
            Err(e) => {
                self.events
                    .emit(event::UPGRADE_ERROR, &EnginePayload::Reason(e.to_string()));
                return;
            }
        };
        PRIOR_WEBSOCKET_SUCCESS.store(false, Ordering::SeqCst);
        let probe = Probe::new(name, candidate.clone());

        // starting a new upgrade freezes any probe still in flight
        if let Some(previous) = self.probe.lock().unwrap().replace(probe.clone()) {
            previous.freeze();
        }

        let events = candidate.core().events.clone();
        let mut subs = Vec::new();

        let engine = Arc::downgrade(self);
        let p = probe.clone();
        let c = candidate.clone();
        let listener = events.once(tevent::OPEN, move |_| {
            if p.failed() {
                return;
            }
            if let Some(engine) = engine.upgrade() {
                engine.on_probe_open(&p, &c);
            }
        });
        subs.push(Sub::new(events.clone(), tevent::OPEN, listener));

        for failure in [tevent::ERROR, tevent::CLOSE] {
            let engine = Arc::downgrade(self);
            let p = probe.clone();
            let listener = events.once(failure, move |payload| {
                if p.failed() {
                    return;
                }
                p.freeze();
                if let Some(engine) = engine.upgrade() {
                    let reason = match payload {
                        TransportPayload::Reason(reason) => format!("probe error: {reason}"),
                        _ => "probe error: transport closed".to_owned(),
                    };
                    engine
                        .events
                        .emit(event::UPGRADE_ERROR, &EnginePayload::Reason(reason));
                }
            });
            subs.push(Sub::new(events.clone(), failure, listener));
        }
        *probe.subs.lock().unwrap() = subs;

        // the probe dies with the engine
        let p = probe.clone();
        let listener = self.events.once(event::CLOSE, move |_| p.freeze());
        probe
            .engine_subs
            .lock()
            .unwrap()
            .push(Sub::new(self.events.clone(), event::CLOSE, listener));

        candidate.open();
    }

    fn on_probe_open(self: &Arc<Self>, probe: &Arc<Probe>, candidate: &Arc<dyn Transport>) {
        tracing::debug!("probe transport {} opened", probe.name);
        candidate
            .clone()
            .send(smallvec::smallvec![Packet::Ping(Some("probe".into()))]);

        let events = candidate.core().events.clone();
        let engine = Arc::downgrade(self);
        let p = probe.clone();
        let c = candidate.clone();
        let listener = events.once(tevent::PACKET, move |payload| {
            if p.failed() {
                return;
            }
            let Some(engine) = engine.upgrade() else {
                return;
            };
            let expected = matches!(
                payload,
                TransportPayload::Packet(Packet::Pong(Some(data))) if data.as_str() == "probe"
            );
            if expected {
                engine.on_probe_pong(&p, &c);
            } else {
                tracing::debug!("probe of {} answered with an unexpected packet", p.name);
                engine
                    .events
                    .emit(event::UPGRADE_ERROR, &EnginePayload::Reason("probe error".into()));
            }
        });
        probe
            .subs
            .lock()
            .unwrap()
            .push(Sub::new(events, tevent::PACKET, listener));
    }

    fn on_probe_pong(self: &Arc<Self>, probe: &Arc<Probe>, candidate: &Arc<dyn Transport>) {
        tracing::debug!("probe of {} succeeded", probe.name);
        self.upgrading.store(true, Ordering::SeqCst);
        self.events
            .emit(event::UPGRADING, &EnginePayload::Transport(probe.name.clone()));
        PRIOR_WEBSOCKET_SUCCESS.store(candidate.name() == ws::NAME, Ordering::SeqCst);

        let Some(current) = self.transport.lock().unwrap().clone() else {
            return;
        };
        tracing::debug!("pausing {}", current.name());
        let engine = Arc::downgrade(self);
        let p = probe.clone();
        current.pause(Box::new(move || {
            if p.failed() {
                return;
            }
            let Some(engine) = engine.upgrade() else {
                return;
            };
            if engine.state() == EngineState::Closed {
                return;
            }
            engine.finish_upgrade(&p);
        }));
    }

    /// The old transport is paused: complete the switch. The candidate
    /// leaves the probe so a late freeze cannot close it, the `Upgrade`
    /// packet goes out, and its drain commits the swap.
    fn finish_upgrade(self: &Arc<Self>, probe: &Arc<Probe>) {
        let Some(candidate) = probe.detach_candidate() else {
            return;
        };
        self.probe.lock().unwrap().take();

        let engine = Arc::downgrade(self);
        let c = candidate.clone();
        candidate.core().events.once(tevent::DRAIN, move |_| {
            if let Some(engine) = engine.upgrade() {
                engine.on_upgrade_drained(c.clone());
            }
        });
        candidate.clone().send(smallvec::smallvec![Packet::Upgrade]);
    }

    fn on_upgrade_drained(self: &Arc<Self>, candidate: Arc<dyn Transport>) {
        let name = candidate.name().to_owned();
        tracing::debug!("upgrade to {name} complete");
        self.set_transport(candidate);
        self.upgrading.store(false, Ordering::SeqCst);
        self.events
            .emit(event::UPGRADE, &EnginePayload::Transport(name));
        self.flush();
    }

    // ==== closing ====

    /// Close the session once outstanding work settled: a non-empty write
    /// buffer waits for its drain, an in-flight upgrade for its outcome.
    pub fn close(self: &Arc<Self>) {
        let engine = self.clone();
        self.scope.post(move || engine.do_close());
    }

    fn do_close(self: Arc<Self>) {
        if !matches!(self.state(), EngineState::Opening | EngineState::Open) {
            return;
        }
        self.set_state(EngineState::Closing);

        if !self.write_buffer.lock().unwrap().is_empty() {
            let engine = self.clone();
            self.events.once(event::DRAIN, move |_| {
                if engine.upgrading.load(Ordering::SeqCst) {
                    engine.wait_for_upgrade();
                } else {
                    engine.on_close("force close");
                }
            });
        } else if self.upgrading.load(Ordering::SeqCst) {
            self.wait_for_upgrade();
        } else {
            self.on_close("force close");
        }
    }

    fn wait_for_upgrade(self: &Arc<Self>) {
        let fired = Arc::new(AtomicBool::new(false));
        for outcome in [event::UPGRADE, event::UPGRADE_ERROR] {
            let engine = Arc::downgrade(self);
            let fired = fired.clone();
            self.events.once(outcome, move |_| {
                if fired.swap(true, Ordering::SeqCst) {
                    return;
                }
                if let Some(engine) = engine.upgrade() {
                    engine.on_close("force close");
                }
            });
        }
    }

    fn on_close(self: &Arc<Self>, reason: &str) {
        if !matches!(
            self.state(),
            EngineState::Opening | EngineState::Open | EngineState::Closing
        ) {
            return;
        }
        tracing::debug!("engine closed: {reason}");
        self.heartbeat_timer.lock().unwrap().take();
        if let Some(probe) = self.probe.lock().unwrap().take() {
            probe.freeze();
        }
        self.transport_subs.lock().unwrap().clear();
        if let Some(transport) = self.transport.lock().unwrap().take() {
            transport.close();
        }
        self.set_state(EngineState::Closed);
        self.sid.lock().unwrap().take();
        self.events
            .emit(event::CLOSE, &EnginePayload::Reason(reason.to_owned()));
        self.write_buffer.lock().unwrap().clear();
        self.prev_buffer_len.store(0, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .field("sid", &self.sid())
            .field("transport", &self.transport_name())
            .field("upgrading", &self.upgrading())
            .finish()
    }
}
