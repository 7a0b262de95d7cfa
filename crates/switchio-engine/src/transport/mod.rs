//! Transport abstraction over the two Engine.IO carriers.
//!
//! A transport accepts batches of packets to send and raises events for
//! everything it receives. All event callbacks run on the serialized scope;
//! the network work itself happens on I/O tasks spawned per request or per
//! session.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use http::HeaderMap;

use crate::config::TransportOptions;
use crate::emitter::Emitter;
use crate::http::HttpFactory;
use crate::packet::{Packet, PacketBuf};
use crate::query;
use crate::scope::Scope;

pub mod polling;
pub mod ws;

/// Events raised by a transport.
pub mod event {
    pub const OPEN: &str = "open";
    pub const CLOSE: &str = "close";
    pub const PACKET: &str = "packet";
    pub const DRAIN: &str = "drain";
    pub const ERROR: &str = "error";
    pub const REQUEST_HEADERS: &str = "requestHeaders";
    pub const RESPONSE_HEADERS: &str = "responseHeaders";
    pub const POLL: &str = "poll";
    pub const POLL_COMPLETE: &str = "pollComplete";
}

/// Payload attached to a transport event.
#[derive(Debug, Clone, Default)]
pub enum TransportPayload {
    #[default]
    None,
    /// `packet`
    Packet(Packet),
    /// `drain`: number of packets flushed out
    Count(usize),
    /// `close` and `error`
    Reason(String),
    /// `requestHeaders` / `responseHeaders`
    Headers(HeaderMap),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Init,
    Opening,
    Open,
    Closing,
    Closed,
    /// Polling only: quiesced while an upgrade swaps transports.
    Paused,
}

/// State and wiring shared by both transport kinds.
pub struct TransportCore {
    pub opts: TransportOptions,
    state: Mutex<TransportState>,
    writable: AtomicBool,
    pub events: Arc<Emitter<TransportPayload>>,
    pub scope: Scope,
    pub factory: Arc<dyn HttpFactory>,
    /// Session query parameters. Kept apart from the user query in the
    /// options because the engine rewrites `sid` after the handshake.
    query: Mutex<HashMap<String, String>>,
}

impl TransportCore {
    pub fn new(
        opts: TransportOptions,
        query: HashMap<String, String>,
        scope: Scope,
        factory: Arc<dyn HttpFactory>,
    ) -> Self {
        Self {
            opts,
            state: Mutex::new(TransportState::Init),
            writable: AtomicBool::new(false),
            events: Arc::new(Emitter::new()),
            scope,
            factory,
            query: Mutex::new(query),
        }
    }

    pub fn state(&self) -> TransportState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: TransportState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    pub fn set_query_param(&self, key: &str, value: &str) {
        self.query
            .lock()
            .unwrap()
            .insert(key.to_owned(), value.to_owned());
    }

    /// Build the request URL for this transport.
    ///
    /// The port is only rendered when it differs from the scheme default,
    /// IPv6 literals are bracketed, and the query is percent-encoded.
    pub fn uri(&self, secure_scheme: &str, insecure_scheme: &str) -> String {
        let scheme = if self.opts.secure {
            secure_scheme
        } else {
            insecure_scheme
        };
        let mut query = self.query.lock().unwrap().clone();
        if self.opts.timestamp_requests {
            query.insert(self.opts.timestamp_param.clone(), query::timestamp());
        }
        let host = if self.opts.hostname.contains(':') {
            format!("[{}]", self.opts.hostname)
        } else {
            self.opts.hostname.clone()
        };
        let default_port = if self.opts.secure { 443 } else { 80 };
        let port = if self.opts.port > 0 && self.opts.port != default_port {
            format!(":{}", self.opts.port)
        } else {
            String::new()
        };
        let encoded = query::encode(&query);
        let query = if encoded.is_empty() {
            String::new()
        } else {
            format!("?{encoded}")
        };
        format!("{scheme}://{host}{port}{}{query}", self.opts.path)
    }

    pub(crate) fn emit_packet(&self, packet: Packet) {
        self.events
            .emit(event::PACKET, &TransportPayload::Packet(packet));
    }

    pub(crate) fn emit_error(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("transport error: {reason}");
        self.events
            .emit(event::ERROR, &TransportPayload::Reason(reason));
    }
}

/// One of the two Engine.IO carriers.
///
/// `open`, `send` and `close` must be invoked on the serialized scope; the
/// engine owns its transport exclusively and guarantees this.
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn core(&self) -> &TransportCore;

    /// Start connecting. Completion is signalled through the `open` event.
    fn open(self: Arc<Self>);

    /// Hand a batch to the wire. Must only be called while `open`, with the
    /// send side idle (`writable`).
    fn send(self: Arc<Self>, packets: PacketBuf);

    /// Close the carrier. Completion is signalled through `close`.
    fn close(self: Arc<Self>);

    /// Quiesce the transport, then invoke `on_pause`. Only meaningful for
    /// polling; the websocket carrier has nothing to quiesce.
    fn pause(self: Arc<Self>, on_pause: Box<dyn FnOnce() + Send>) {
        on_pause();
    }
}
