//! The namespace socket.
//!
//! A [`Socket`] is the user-facing client for one namespace multiplexed
//! over the shared manager session. It encodes user emits into Socket.IO
//! packets, tracks acknowledgement callbacks, reassembles binary events,
//! and buffers in both directions across (re)connection boundaries.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use serde_json::{Map, Value};

use switchio_engine::{Emitter, Listener, Scope, Sub};

use crate::ack::{Ack, AckHandler, AckWithTimeout};
use crate::binary::{BinaryReconstructor, ReconstructedElem};
use crate::manager::{event as mevent, Manager, ManagerPayload, ManagerState};
use crate::packet::{Packet, PacketData, PayloadElem};
use crate::payload::Data;

/// Events dispatched locally by the socket itself. User code may listen
/// for them but cannot emit them.
pub mod event {
    pub const CONNECT: &str = "connect";
    pub const CONNECT_ERROR: &str = "connect_error";
    pub const DISCONNECT: &str = "disconnect";
    pub const DISCONNECTING: &str = "disconnecting";
    pub const ERROR: &str = "error";
}

/// Event names reserved for the library.
pub const RESERVED_EVENTS: [&str; 6] = [
    "connect",
    "connect_error",
    "disconnect",
    "disconnecting",
    "newListener",
    "removeListener",
];

/// Payload delivered to user listeners: the event arguments, plus the
/// reply callback when the server requested an acknowledgement.
#[derive(Debug, Clone)]
pub struct Event {
    pub args: Vec<Data>,
    pub ack: Option<ReplyAck>,
}

impl Event {
    fn plain(args: Vec<Data>) -> Self {
        Self { args, ack: None }
    }
}

/// Reply callback carried by an inbound event that requested an
/// acknowledgement. Sending is idempotent: only the first call reaches
/// the wire.
#[derive(Clone)]
pub struct ReplyAck {
    socket: Weak<Socket>,
    id: i64,
    sent: Arc<AtomicBool>,
}

impl ReplyAck {
    fn new(socket: &Arc<Socket>, id: i64) -> Self {
        Self {
            socket: Arc::downgrade(socket),
            id,
            sent: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn send(&self, args: Vec<Data>) {
        if self.sent.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(socket) = self.socket.upgrade() else {
            return;
        };
        let id = self.id;
        let target = socket.clone();
        socket.scope.post(move || target.send_ack(id, args));
    }
}

impl std::fmt::Debug for ReplyAck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyAck")
            .field("id", &self.id)
            .field("sent", &self.sent.load(Ordering::SeqCst))
            .finish()
    }
}

pub struct Socket {
    manager: Arc<Manager>,
    nsp: String,
    scope: Scope,
    events: Arc<Emitter<Event>>,
    auth: Mutex<HashMap<String, String>>,
    connected: AtomicBool,
    sid: Mutex<Option<String>>,
    /// Decoded events received before the namespace connected.
    recv_buffer: Mutex<VecDeque<(String, Event)>>,
    /// Packets emitted before the namespace connected.
    send_buffer: Mutex<VecDeque<Packet>>,
    acks: Mutex<HashMap<i64, AckHandler>>,
    ack_counter: AtomicI64,
    reconstructor: Mutex<Option<BinaryReconstructor>>,
    subs: Mutex<Vec<Sub<ManagerPayload>>>,
}

impl Socket {
    pub(crate) fn new(
        manager: Arc<Manager>,
        nsp: &str,
        auth: HashMap<String, String>,
    ) -> Arc<Self> {
        let scope = manager.scope().clone();
        Arc::new(Self {
            manager,
            nsp: nsp.to_owned(),
            scope,
            events: Arc::new(Emitter::new()),
            auth: Mutex::new(auth),
            connected: AtomicBool::new(false),
            sid: Mutex::new(None),
            recv_buffer: Mutex::new(VecDeque::new()),
            send_buffer: Mutex::new(VecDeque::new()),
            acks: Mutex::new(HashMap::new()),
            ack_counter: AtomicI64::new(0),
            reconstructor: Mutex::new(None),
            subs: Mutex::new(Vec::new()),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.nsp
    }

    /// The manager this socket is multiplexed on.
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The namespace session id, once connected.
    pub fn id(&self) -> Option<String> {
        self.sid.lock().unwrap().clone()
    }

    /// Whether the socket still listens to its manager.
    pub fn active(&self) -> bool {
        !self.subs.lock().unwrap().is_empty()
    }

    /// Replace the auth payload sent with the next `Connect`.
    pub fn set_auth(&self, auth: HashMap<String, String>) {
        *self.auth.lock().unwrap() = auth;
    }

    // ==== user listener registration ====

    pub fn on(&self, event: &str, f: impl Fn(&Event) + Send + Sync + 'static) -> Listener<Event> {
        self.events.on(event, f)
    }

    pub fn once(
        &self,
        event: &str,
        f: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Listener<Event> {
        self.events.once(event, f)
    }

    pub fn off(&self, event: &str) {
        self.events.off(event);
    }

    pub fn off_listener(&self, event: &str, listener: &Listener<Event>) {
        self.events.off_listener(event, listener);
    }

    pub fn off_all(&self) {
        self.events.off_all();
    }

    pub fn listeners(&self, event: &str) -> Vec<Listener<Event>> {
        self.events.listeners(event)
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        self.events.has_listeners(event)
    }

    // ==== lifecycle ====

    /// Connect the namespace, opening the shared manager if needed.
    pub fn connect(self: &Arc<Self>) {
        let socket = self.clone();
        self.scope.post(move || socket.do_connect());
    }

    /// Alias of [`Socket::connect`].
    pub fn open(self: &Arc<Self>) {
        self.connect();
    }

    fn do_connect(self: Arc<Self>) {
        if self.connected() || self.manager.reconnecting() {
            return;
        }
        self.subscribe();
        self.manager.open(None);
        if self.manager.state() == ManagerState::Open {
            self.on_manager_open();
        }
    }

    fn subscribe(self: &Arc<Self>) {
        let mut subs = self.subs.lock().unwrap();
        if !subs.is_empty() {
            return;
        }
        let events = self.manager.events().clone();

        let socket = Arc::downgrade(self);
        let listener = events.on(mevent::OPEN, move |_| {
            if let Some(socket) = socket.upgrade() {
                socket.on_manager_open();
            }
        });
        subs.push(Sub::new(events.clone(), mevent::OPEN, listener));

        let socket = Arc::downgrade(self);
        let listener = events.on(mevent::PACKET, move |payload| {
            if let Some(socket) = socket.upgrade() {
                match payload {
                    ManagerPayload::Packet(packet) => socket.on_packet(packet),
                    ManagerPayload::Binary(data) => socket.on_binary(data.clone()),
                    _ => {}
                }
            }
        });
        subs.push(Sub::new(events.clone(), mevent::PACKET, listener));

        let socket = Arc::downgrade(self);
        let listener = events.on(mevent::ERROR, move |payload| {
            if let Some(socket) = socket.upgrade() {
                if !socket.connected() {
                    let reason = match payload {
                        ManagerPayload::Reason(reason) => reason.clone(),
                        _ => "manager error".to_owned(),
                    };
                    socket.events.emit(
                        event::CONNECT_ERROR,
                        &Event::plain(vec![Data::Json(Value::String(reason))]),
                    );
                }
            }
        });
        subs.push(Sub::new(events.clone(), mevent::ERROR, listener));

        let socket = Arc::downgrade(self);
        let listener = events.on(mevent::CLOSE, move |payload| {
            if let Some(socket) = socket.upgrade() {
                let reason = match payload {
                    ManagerPayload::Reason(reason) => reason.clone(),
                    _ => "transport close".to_owned(),
                };
                socket.on_close(&reason);
            }
        });
        subs.push(Sub::new(events, mevent::CLOSE, listener));
    }

    fn on_manager_open(self: &Arc<Self>) {
        tracing::debug!(ns = %self.nsp, "joining namespace");
        let auth = self.auth.lock().unwrap();
        let payload = if auth.is_empty() {
            None
        } else {
            let object: Map<String, Value> = auth
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            Some(Value::Object(object))
        };
        drop(auth);
        self.manager.send_packet(Packet::connect(&self.nsp, payload));
    }

    /// Leave the namespace. Sends a `Disconnect` when connected and tears
    /// down the manager subscriptions either way.
    pub fn disconnect(self: &Arc<Self>) {
        let socket = self.clone();
        self.scope.post(move || {
            let was_connected = socket.connected();
            if was_connected {
                socket
                    .events
                    .emit(event::DISCONNECTING, &Event::plain(Vec::new()));
                socket.manager.send_packet(Packet::disconnect(&socket.nsp));
            }
            socket.destroy();
            if was_connected {
                socket.on_close("io client disconnect");
            }
        });
    }

    /// Alias of [`Socket::disconnect`].
    pub fn close(self: &Arc<Self>) {
        self.disconnect();
    }

    fn destroy(self: &Arc<Self>) {
        self.subs.lock().unwrap().clear();
        self.manager.on_socket_destroyed();
    }

    fn on_close(self: &Arc<Self>, reason: &str) {
        tracing::debug!(ns = %self.nsp, "disconnected: {reason}");
        self.connected.store(false, Ordering::SeqCst);
        self.sid.lock().unwrap().take();
        self.events.emit(
            event::DISCONNECT,
            &Event::plain(vec![Data::Json(Value::String(reason.to_owned()))]),
        );
        // pending acks will never be answered now
        let pending: Vec<AckHandler> = {
            let mut acks = self.acks.lock().unwrap();
            acks.drain().map(|(_, entry)| entry).collect()
        };
        for entry in pending {
            if let AckHandler::WithTimeout(ack) = entry {
                ack.fire_timeout();
            }
        }
    }

    // ==== inbound dispatch ====

    fn on_packet(self: &Arc<Self>, packet: &Packet) {
        if packet.ns != self.nsp {
            return;
        }
        match &packet.data {
            PacketData::Connect(payload) => {
                let sid = payload
                    .as_ref()
                    .and_then(|p| p.get("sid"))
                    .and_then(Value::as_str);
                match sid {
                    Some(sid) => self.on_connect(sid.to_owned()),
                    None => self.local_error(
                        "received a Connect packet without a session id, \
                         the server is probably not a v4 server",
                    ),
                }
            }
            PacketData::Disconnect => {
                self.destroy();
                self.on_close("io server disconnect");
            }
            PacketData::ConnectError(data) => {
                self.destroy();
                let data = data.clone().unwrap_or_else(|| Value::Object(Map::new()));
                self.events.emit(
                    event::CONNECT_ERROR,
                    &Event::plain(vec![Data::Json(data)]),
                );
            }
            PacketData::Event(payload, ack_id) => {
                let args = payload.iter().cloned().map(Data::Json).collect();
                self.on_event(args, *ack_id);
            }
            PacketData::Ack(payload, ack_id) => {
                let args: Vec<Data> = payload.iter().cloned().map(Data::Json).collect();
                self.on_ack(*ack_id, &args);
            }
            PacketData::BinaryEvent(..) | PacketData::BinaryAck(..) => {
                let mut reconstructor = self.reconstructor.lock().unwrap();
                if reconstructor.is_some() {
                    drop(reconstructor);
                    self.local_error("binary packet started while another is pending");
                } else {
                    *reconstructor = Some(BinaryReconstructor::new(packet.clone()));
                }
            }
        }
    }

    fn on_binary(self: &Arc<Self>, data: Bytes) {
        let mut slot = self.reconstructor.lock().unwrap();
        let Some(reconstructor) = slot.as_mut() else {
            drop(slot);
            self.local_error("binary frame received with no binary packet pending");
            return;
        };
        match reconstructor.add(data) {
            Ok(None) => {}
            Ok(Some(done)) => {
                *slot = None;
                drop(slot);
                let args: Vec<Data> = done
                    .payload
                    .into_iter()
                    .map(|elem| match elem {
                        ReconstructedElem::Json(value) => Data::Json(value),
                        ReconstructedElem::Binary(data) => Data::Binary(data),
                    })
                    .collect();
                if done.is_ack {
                    // a binary ack always carries its id
                    if let Some(id) = done.ack_id {
                        self.on_ack(id, &args);
                    }
                } else {
                    self.on_event(args, done.ack_id);
                }
            }
            Err(e) => {
                *slot = None;
                drop(slot);
                self.local_error(&e.to_string());
            }
        }
    }

    fn on_event(self: &Arc<Self>, payload: Vec<Data>, ack_id: Option<i64>) {
        let mut args = payload.into_iter();
        let name = match args.next() {
            Some(Data::Json(Value::String(name))) => name,
            _ => return self.local_error("event payload does not start with an event name"),
        };
        let event = Event {
            args: args.collect(),
            ack: ack_id.map(|id| ReplyAck::new(self, id)),
        };
        if self.connected() {
            self.events.emit(&name, &event);
        } else {
            self.recv_buffer.lock().unwrap().push_back((name, event));
        }
    }

    fn on_ack(self: &Arc<Self>, id: i64, args: &[Data]) {
        let entry = self.acks.lock().unwrap().remove(&id);
        match entry {
            Some(entry) => entry.call(args),
            // unknown ids are dropped silently
            None => tracing::debug!(ns = %self.nsp, "no handler for ack {id}"),
        }
    }

    fn on_connect(self: &Arc<Self>, sid: String) {
        tracing::debug!(ns = %self.nsp, %sid, "namespace connected");
        self.connected.store(true, Ordering::SeqCst);
        *self.sid.lock().unwrap() = Some(sid);

        // deliver what arrived early, then flush what the user queued
        let received: Vec<(String, Event)> =
            self.recv_buffer.lock().unwrap().drain(..).collect();
        for (name, event) in received {
            self.events.emit(&name, &event);
        }
        let queued: Vec<Packet> = self.send_buffer.lock().unwrap().drain(..).collect();
        for packet in queued {
            self.manager.send_packet(packet);
        }

        self.events.emit(event::CONNECT, &Event::plain(Vec::new()));
    }

    fn local_error(self: &Arc<Self>, message: &str) {
        tracing::warn!(ns = %self.nsp, "{message}");
        self.events.emit(
            event::ERROR,
            &Event::plain(vec![Data::Json(Value::String(message.to_owned()))]),
        );
    }

    // ==== emitting ====

    /// Emit `event` with `args`. Emits issued before `connect` are queued
    /// and flushed in order once the namespace connects.
    pub fn emit(self: &Arc<Self>, event: &str, args: Vec<Data>) {
        if self.reject_reserved(event) {
            return;
        }
        let packet = self.build_event_packet(event, &args, None);
        let socket = self.clone();
        self.scope.post(move || socket.send_or_buffer(packet));
    }

    /// Emit with a response callback bound to a fresh ack id.
    pub fn emit_with_ack(self: &Arc<Self>, event: &str, args: Vec<Data>, ack: impl Ack) {
        self.emit_with_handler(event, args, AckHandler::Callback(Arc::new(ack)));
    }

    /// Emit with a deadline-bound response callback. When the timer fires
    /// first, the pending entry leaves the ack table and the send buffer
    /// before `on_timeout` runs.
    pub fn emit_with_ack_timeout(
        self: &Arc<Self>,
        event: &str,
        args: Vec<Data>,
        ack: AckWithTimeout,
    ) {
        self.emit_with_handler(event, args, AckHandler::WithTimeout(ack));
    }

    fn emit_with_handler(self: &Arc<Self>, event: &str, args: Vec<Data>, handler: AckHandler) {
        if self.reject_reserved(event) {
            return;
        }
        let id = self.ack_counter.fetch_add(1, Ordering::SeqCst);
        let packet = self.build_event_packet(event, &args, Some(id));
        let socket = self.clone();
        self.scope.post(move || {
            if let AckHandler::WithTimeout(ack) = &handler {
                let cleanup_target = Arc::downgrade(&socket);
                ack.schedule(&socket.scope, move || {
                    if let Some(socket) = cleanup_target.upgrade() {
                        socket.forget_ack(id);
                    }
                });
            }
            socket.acks.lock().unwrap().insert(id, handler);
            socket.send_or_buffer(packet);
        });
    }

    fn reject_reserved(self: &Arc<Self>, event: &str) -> bool {
        if RESERVED_EVENTS.contains(&event) {
            let socket = self.clone();
            let message = format!("\"{event}\" is a reserved event name");
            self.scope.post(move || socket.local_error(&message));
            return true;
        }
        false
    }

    fn build_event_packet(&self, event: &str, args: &[Data], ack_id: Option<i64>) -> Packet {
        if args.iter().any(Data::is_binary) {
            let mut elems = vec![PayloadElem::Json(Value::String(event.to_owned()))];
            let mut attachments = Vec::new();
            for arg in args {
                match arg {
                    Data::Json(value) => elems.push(PayloadElem::Json(value.clone())),
                    Data::Binary(data) => {
                        elems.push(PayloadElem::Attachment(attachments.len()));
                        attachments.push(data.clone());
                    }
                }
            }
            Packet::binary_event(&self.nsp, elems, ack_id, attachments)
        } else {
            let mut payload = vec![Value::String(event.to_owned())];
            payload.extend(args.iter().map(|arg| match arg {
                Data::Json(value) => value.clone(),
                Data::Binary(_) => unreachable!(),
            }));
            Packet::event(&self.nsp, payload, ack_id)
        }
    }

    fn send_or_buffer(self: &Arc<Self>, packet: Packet) {
        if self.connected() {
            self.manager.send_packet(packet);
        } else {
            self.send_buffer.lock().unwrap().push_back(packet);
        }
    }

    /// Timed-out ack cleanup: drop the table entry and the matching queued
    /// packet, if it is still waiting in the send buffer.
    fn forget_ack(self: &Arc<Self>, id: i64) {
        self.acks.lock().unwrap().remove(&id);
        let mut buffer = self.send_buffer.lock().unwrap();
        if let Some(pos) = buffer.iter().position(|p| p.ack_id() == Some(id)) {
            buffer.remove(pos);
        }
    }

    fn send_ack(self: &Arc<Self>, id: i64, args: Vec<Data>) {
        let packet = if args.iter().any(Data::is_binary) {
            let mut elems = Vec::with_capacity(args.len());
            let mut attachments = Vec::new();
            for arg in &args {
                match arg {
                    Data::Json(value) => elems.push(PayloadElem::Json(value.clone())),
                    Data::Binary(data) => {
                        elems.push(PayloadElem::Attachment(attachments.len()));
                        attachments.push(data.clone());
                    }
                }
            }
            Packet::binary_ack(&self.nsp, elems, id, attachments)
        } else {
            let payload = args
                .iter()
                .map(|arg| match arg {
                    Data::Json(value) => value.clone(),
                    Data::Binary(_) => unreachable!(),
                })
                .collect();
            Packet::ack(&self.nsp, payload, id)
        };
        self.manager.send_packet(packet);
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("nsp", &self.nsp)
            .field("connected", &self.connected())
            .field("sid", &self.id())
            .finish()
    }
}
