//! WebSocket transport.
//!
//! One Engine.IO packet per frame: text frames for textual packets, binary
//! frames for binary payloads. A writer task owns the sink half of the
//! session and reports drains back to the scope; the reader loop forwards
//! every inbound frame onto the scope until the session ends.

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::http::{WsFrame, WsSession};
use crate::packet::{Packet, PacketBuf};
use crate::transport::{event, Transport, TransportCore, TransportPayload, TransportState};

pub const NAME: &str = "websocket";

enum WriterCmd {
    Batch(PacketBuf),
    Close,
}

pub struct WebSocketTransport {
    core: TransportCore,
    writer: Mutex<Option<mpsc::UnboundedSender<WriterCmd>>>,
}

impl WebSocketTransport {
    pub fn new(core: TransportCore) -> Arc<Self> {
        Arc::new(Self {
            core,
            writer: Mutex::new(None),
        })
    }

    fn on_connected(self: &Arc<Self>, session: WsSession) {
        if self.core.state() != TransportState::Opening {
            // closed while the handshake was in flight
            self.on_close();
            return;
        }
        self.core.events.emit(
            event::RESPONSE_HEADERS,
            &TransportPayload::Headers(session.response_headers.clone()),
        );

        let (tx, rx) = mpsc::unbounded_channel();
        *self.writer.lock().unwrap() = Some(tx);
        self.spawn_writer(session.sink, rx);
        self.spawn_reader(session.source);

        self.core.set_state(TransportState::Open);
        self.core.set_writable(true);
        self.core.events.emit(event::OPEN, &TransportPayload::None);
    }

    fn spawn_writer(
        self: &Arc<Self>,
        mut sink: crate::http::WsSink,
        mut rx: mpsc::UnboundedReceiver<WriterCmd>,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    WriterCmd::Batch(packets) => {
                        let count = packets.len();
                        let mut failed = None;
                        for packet in packets {
                            let frame = match packet {
                                Packet::Binary(data) => WsFrame::Binary(data),
                                textual => WsFrame::Text(String::from(&textual)),
                            };
                            if let Err(e) = sink.feed(frame).await {
                                failed = Some(e);
                                break;
                            }
                        }
                        if let Some(e) = failed {
                            let transport = this.clone();
                            this.core
                                .scope
                                .post(move || transport.core.emit_error(e.to_string()));
                            break;
                        }
                        sink.flush().await.ok();
                        let transport = this.clone();
                        this.core.scope.post(move || {
                            transport.core.set_writable(true);
                            transport
                                .core
                                .events
                                .emit(event::DRAIN, &TransportPayload::Count(count));
                        });
                    }
                    WriterCmd::Close => {
                        sink.send(WsFrame::Close).await.ok();
                        break;
                    }
                }
            }
        });
    }

    fn spawn_reader(self: &Arc<Self>, mut source: crate::http::WsSource) {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(item) = source.next().await {
                match item {
                    Ok(WsFrame::Text(text)) => {
                        let transport = this.clone();
                        this.core.scope.post(move || {
                            match Packet::try_from(text.as_str()) {
                                Ok(packet) => transport.core.emit_packet(packet),
                                Err(e) => transport.core.emit_error(e.to_string()),
                            }
                        });
                    }
                    Ok(WsFrame::Binary(data)) => {
                        let transport = this.clone();
                        this.core
                            .scope
                            .post(move || transport.core.emit_packet(Packet::Binary(data)));
                    }
                    Ok(WsFrame::Close) => break,
                    Err(e) => {
                        let transport = this.clone();
                        this.core
                            .scope
                            .post(move || transport.core.emit_error(e.to_string()));
                        break;
                    }
                }
            }
            let transport = this.clone();
            this.core.scope.post(move || transport.on_close());
        });
    }

    fn on_close(&self) {
        if self.core.state() == TransportState::Closed {
            return;
        }
        self.core.set_state(TransportState::Closed);
        self.core.set_writable(false);
        self.writer.lock().unwrap().take();
        self.core.events.emit(event::CLOSE, &TransportPayload::None);
    }
}

impl Transport for WebSocketTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    fn core(&self) -> &TransportCore {
        &self.core
    }

    fn open(self: Arc<Self>) {
        self.core.set_state(TransportState::Opening);
        let url = self.core.uri("wss", "ws");
        let headers = self.core.opts.extra_headers.clone();
        self.core.events.emit(
            event::REQUEST_HEADERS,
            &TransportPayload::Headers(headers.clone()),
        );
        tracing::debug!("websocket connect {url}");

        let this = self.clone();
        tokio::spawn(async move {
            let res = this.core.factory.ws_connect(&url, &headers).await;
            let transport = this.clone();
            this.core.scope.post(move || match res {
                Ok(session) => transport.on_connected(session),
                Err(e) => transport.core.emit_error(e.to_string()),
            });
        });
    }

    fn send(self: Arc<Self>, packets: PacketBuf) {
        assert_eq!(
            self.core.state(),
            TransportState::Open,
            "send on a transport that is not open"
        );
        self.core.set_writable(false);
        if let Some(writer) = self.writer.lock().unwrap().as_ref() {
            writer.send(WriterCmd::Batch(packets)).ok();
        }
    }

    fn close(self: Arc<Self>) {
        let state = self.core.state();
        self.core.set_state(TransportState::Closing);
        if let Some(writer) = self.writer.lock().unwrap().take() {
            writer.send(WriterCmd::Close).ok();
        } else if state == TransportState::Opening {
            // nothing on the wire yet, the pending handshake job will
            // observe the state change and finish the close
        } else {
            self.on_close();
        }
    }
}
