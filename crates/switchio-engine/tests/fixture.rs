//! Scripted in-memory server double driving the engine without a network.
//!
//! The mock implements the `HttpFactory` contract: handshake GETs answer
//! with an `Open` packet, later GETs long-poll on a queue the test (or the
//! mock itself) pushes bodies into, POSTs are recorded and optionally
//! echoed, and websocket sessions run a tiny scripted server loop that
//! answers the upgrade probe the way a real server does.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use tokio::sync::mpsc;

use switchio_engine::{
    payload, Emitter, EngineError, HttpFactory, HttpResponse, OpenPacket, Packet, WsFrame,
    WsSession,
};

pub struct Script {
    pub sid: String,
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    pub max_payload: u64,
    /// Echo every `Message`/`Binary` packet back to the client.
    pub echo_messages: bool,
    /// Accept websocket sessions and answer the upgrade probe.
    pub accept_ws: bool,
    /// Refuse every polling request.
    pub fail_get: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            sid: "s1".into(),
            upgrades: Vec::new(),
            ping_interval: 25000,
            ping_timeout: 20000,
            max_payload: 100000,
            echo_messages: false,
            accept_ws: false,
            fail_get: false,
        }
    }
}

struct Shared {
    poll_tx: mpsc::UnboundedSender<String>,
    poll_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    posts: Mutex<Vec<String>>,
    ws_sent: Mutex<Vec<String>>,
    upgrading: AtomicBool,
}

impl Shared {
    fn record_ws(&self, frame: &WsFrame) {
        let rendered = match frame {
            WsFrame::Text(text) => text.clone(),
            WsFrame::Binary(data) => String::from(&Packet::Binary(data.clone())),
            WsFrame::Close => "close".to_owned(),
        };
        self.ws_sent.lock().unwrap().push(rendered);
    }
}

pub struct MockFactory {
    script: Script,
    shared: Arc<Shared>,
}

impl MockFactory {
    pub fn new(script: Script) -> Arc<Self> {
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            script,
            shared: Arc::new(Shared {
                poll_tx,
                poll_rx: tokio::sync::Mutex::new(poll_rx),
                posts: Mutex::new(Vec::new()),
                ws_sent: Mutex::new(Vec::new()),
                upgrading: AtomicBool::new(false),
            }),
        })
    }

    /// Queue one polling response body.
    pub fn push_poll(&self, body: impl Into<String>) {
        self.shared.poll_tx.send(body.into()).ok();
    }

    /// Every packet the client posted, in wire order and text form.
    pub fn posts(&self) -> Vec<String> {
        self.shared.posts.lock().unwrap().clone()
    }

    /// Every websocket frame the client sent, in order and text form.
    pub fn ws_sent(&self) -> Vec<String> {
        self.shared.ws_sent.lock().unwrap().clone()
    }

    fn open_body(&self) -> String {
        String::from(&Packet::Open(OpenPacket {
            sid: self.script.sid.clone(),
            upgrades: self.script.upgrades.clone(),
            ping_interval: self.script.ping_interval,
            ping_timeout: self.script.ping_timeout,
            max_payload: self.script.max_payload,
        }))
    }
}

#[async_trait]
impl HttpFactory for MockFactory {
    async fn get(&self, url: &str, _headers: &HeaderMap) -> Result<HttpResponse, EngineError> {
        if self.script.fail_get {
            return Err(EngineError::Http("connection refused".into()));
        }
        let body = if !url.contains("sid=") {
            self.open_body()
        } else if self.shared.upgrading.load(Ordering::SeqCst) {
            // a session mid-upgrade only ever sees noops on polling
            String::from(&Packet::Noop)
        } else {
            let mut rx = self.shared.poll_rx.lock().await;
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
            self.shared
                .posts
                .lock()
                .unwrap()
                .push(String::from(&packet));
            if self.script.echo_messages
                && matches!(packet, Packet::Message(_) | Packet::Binary(_))
            {
                self.push_poll(String::from(&packet));
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
        if !self.script.accept_ws {
            return Err(EngineError::Ws("connection refused".into()));
        }
        let (c2s_tx, mut c2s_rx) = mpsc::unbounded_channel::<WsFrame>();
        let (s2c_tx, s2c_rx) = mpsc::unbounded_channel::<WsFrame>();

        let shared = self.shared.clone();
        let echo = self.script.echo_messages;
        tokio::spawn(async move {
            while let Some(frame) = c2s_rx.recv().await {
                shared.record_ws(&frame);
                match frame {
                    WsFrame::Text(text) if text == "2probe" => {
                        s2c_tx.send(WsFrame::Text("3probe".into())).ok();
                        // release the pending polling request, as a real
                        // server does when the probe arrives
                        shared.upgrading.store(true, Ordering::SeqCst);
                        shared.poll_tx.send(String::from(&Packet::Noop)).ok();
                    }
                    WsFrame::Text(text) if text == "5" || text == "1" => {}
                    WsFrame::Text(text) if echo && text.starts_with('4') => {
                        s2c_tx.send(WsFrame::Text(text)).ok();
                    }
                    WsFrame::Binary(data) if echo => {
                        s2c_tx.send(WsFrame::Binary(data)).ok();
                    }
                    WsFrame::Close => {
                        s2c_tx.send(WsFrame::Close).ok();
                        break;
                    }
                    _ => {}
                }
            }
        });

        let sink = futures_util::sink::unfold(c2s_tx, |tx, frame: WsFrame| async move {
            tx.send(frame)
                .map_err(|_| EngineError::Ws("session closed".into()))?;
            Ok::<_, EngineError>(tx)
        });
        let source = futures_util::stream::unfold(s2c_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (Ok(frame), rx))
        });
        Ok(WsSession {
            sink: Box::pin(sink),
            source: Box::pin(source),
            response_headers: HeaderMap::new(),
        })
    }
}

/// Buffers selected events from the moment of subscription so a test can
/// await them later without missing back-to-back emissions.
pub struct Recorder<T> {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(String, T)>>,
}

impl<T: Clone + Send + Sync + 'static> Recorder<T> {
    /// Subscribe to `names` on `events`. Must be called before the
    /// activity under test starts.
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

    /// The payload of the next `name` occurrence, discarding the recorded
    /// events before it.
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
}
