//! Scripted Socket.IO server double for the client scenarios.
//!
//! Speaks just enough of both protocol layers over the `HttpFactory`
//! contract: Engine.IO handshake and polling, plus namespace connect acks,
//! event echo and scripted acknowledgements at the Socket.IO layer.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use tokio::sync::mpsc;

use switchio::socket::{Event, Socket};
use switchio_engine::{
    payload, Emitter, EngineError, HttpFactory, HttpResponse, OpenPacket, Packet, WsSession,
};

pub struct Script {
    pub sid: String,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    /// Acknowledge namespace `Connect` requests with a session id.
    pub accept_namespaces: bool,
    /// Echo event and binary frames back to the client.
    pub echo_events: bool,
    /// Answer events that carry an ack id with `["got it"]`.
    pub ack_events: bool,
    /// Refuse every polling request.
    pub fail_get: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            sid: "s1".into(),
            ping_interval: 25000,
            ping_timeout: 20000,
            accept_namespaces: true,
            echo_events: false,
            ack_events: false,
            fail_get: false,
        }
    }
}

pub struct MockServer {
    script: Script,
    poll_tx: mpsc::UnboundedSender<String>,
    poll_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    posts: Mutex<Vec<String>>,
}

impl MockServer {
    pub fn new(script: Script) -> Arc<Self> {
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            script,
            poll_tx,
            poll_rx: tokio::sync::Mutex::new(poll_rx),
            posts: Mutex::new(Vec::new()),
        })
    }

    /// Queue one polling response body.
    pub fn push_poll(&self, body: impl Into<String>) {
        self.poll_tx.send(body.into()).ok();
    }

    /// Queue a Socket.IO frame, wrapped in its Engine.IO message packet.
    pub fn push_sio(&self, frame: impl Into<String>) {
        self.push_poll(format!("4{}", frame.into()));
    }

    /// Every packet the client posted, in wire order and text form.
    pub fn posts(&self) -> Vec<String> {
        self.posts.lock().unwrap().clone()
    }

    /// Index of the first posted packet starting with `prefix`.
    pub fn post_index(&self, prefix: &str) -> Option<usize> {
        self.posts().iter().position(|p| p.starts_with(prefix))
    }

    fn connect_ack(&self, request: &str) -> String {
        // "0" or "0/nsp,{auth}" -> "0{...}" or "0/nsp,{...}"
        let ns = if request[1..].starts_with('/') {
            let rest = &request[1..];
            let end = rest.find(',').unwrap_or(rest.len());
            &rest[..end]
        } else {
            "/"
        };
        let sid = format!("{}-{}", self.script.sid, ns.trim_start_matches('/'));
        if ns == "/" {
            format!("0{{\"sid\":\"{sid}\"}}")
        } else {
            format!("0{ns},{{\"sid\":\"{sid}\"}}")
        }
    }

    fn on_sio_frame(&self, frame: &str) {
        match frame.as_bytes().first() {
            Some(b'0') if self.script.accept_namespaces => {
                self.push_sio(self.connect_ack(frame));
            }
            Some(b'2') => {
                // split off a leading "<nsp>," to reach the ack id digits
                let body = match frame[1..].strip_prefix('/') {
                    Some(rest) => match rest.find(',') {
                        Some(comma) => &rest[comma + 1..],
                        None => rest,
                    },
                    None => &frame[1..],
                };
                let ack_id: String =
                    body.chars().take_while(|c| c.is_ascii_digit()).collect();
                if self.script.ack_events && !ack_id.is_empty() {
                    let ns_prefix = match frame[1..].strip_prefix('/') {
                        Some(rest) => {
                            let comma = rest.find(',').map(|i| i + 1).unwrap_or(0);
                            format!("/{}", &rest[..comma])
                        }
                        None => String::new(),
                    };
                    self.push_sio(format!("3{ns_prefix}{ack_id}[\"got it\"]"));
                } else if self.script.echo_events {
                    self.push_sio(frame.to_owned());
                }
            }
            Some(b'5') if self.script.echo_events => {
                self.push_sio(frame.to_owned());
            }
            _ => {}
        }
    }
}

#[async_trait]
impl HttpFactory for MockServer {
    async fn get(&self, url: &str, _headers: &HeaderMap) -> Result<HttpResponse, EngineError> {
        if self.script.fail_get {
            return Err(EngineError::Http("connection refused".into()));
        }
        let body = if !url.contains("sid=") {
            String::from(&Packet::Open(OpenPacket {
                sid: self.script.sid.clone(),
                upgrades: Vec::new(),
                ping_interval: self.script.ping_interval,
                ping_timeout: self.script.ping_timeout,
                max_payload: 100000,
            }))
        } else {
            let mut rx = self.poll_rx.lock().await;
            match rx.recv().await {
                Some(body) => body,
                None => String::from(&Packet::Noop),
            }
        };
        Ok(HttpResponse {
            status: 200,
            headers: HeaderMap::new(),
            body: Bytes::from(body),
        })
    }

    async fn post(
        &self,
        _url: &str,
        _headers: &HeaderMap,
        body: String,
    ) -> Result<HttpResponse, EngineError> {
        let packets = payload::decode(&body).expect("client posted a malformed payload");
        for packet in packets {
            self.posts.lock().unwrap().push(String::from(&packet));
            match packet {
                Packet::Message(frame) => self.on_sio_frame(&frame),
                Packet::Binary(data) if self.script.echo_events => {
                    self.push_poll(String::from(&Packet::Binary(data)));
                }
                _ => {}
            }
        }
        Ok(HttpResponse {
            status: 200,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"ok"),
        })
    }

    async fn ws_connect(
        &self,
        _url: &str,
        _headers: &HeaderMap,
    ) -> Result<WsSession, EngineError> {
        Err(EngineError::Ws("websocket disabled in this fixture".into()))
    }
}

/// Buffers selected events from the moment of subscription so a test can
/// await them later without missing back-to-back emissions.
pub struct Recorder<T> {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(String, T)>>,
}

impl<T: Clone + Send + Sync + 'static> Recorder<T> {
    pub fn subscribe(events: &Arc<Emitter<T>>, names: &[&str]) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for name in names {
            let tx = tx.clone();
            let tag = name.to_string();
            events.on(name, move |payload: &T| {
                tx.send((tag.clone(), payload.clone())).ok();
            });
        }
        Self {
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    pub async fn next(&self, name: &str) -> T {
        let mut rx = self.rx.lock().await;
        loop {
            let recorded = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
                .expect("emitter dropped");
            if recorded.0 == name {
                return recorded.1;
            }
        }
    }

    /// Collect occurrences of `names` until `last` has been seen.
    pub async fn collect_until(&self, last: &str) -> Vec<(String, T)> {
        let mut rx = self.rx.lock().await;
        let mut out = Vec::new();
        loop {
            let recorded = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {last}"))
                .expect("emitter dropped");
            let done = recorded.0 == last;
            out.push(recorded);
            if done {
                return out;
            }
        }
    }
}

impl Recorder<Event> {
    /// Subscribe on a socket's user-facing events.
    pub fn subscribe_socket(socket: &Arc<Socket>, names: &[&str]) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for name in names {
            let tx = tx.clone();
            let tag = name.to_string();
            socket.on(name, move |event: &Event| {
                tx.send((tag.clone(), event.clone())).ok();
            });
        }
        Self {
            rx: tokio::sync::Mutex::new(rx),
        }
    }
}
