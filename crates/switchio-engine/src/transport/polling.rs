//! HTTP long-polling transport.
//!
//! A GET is kept in flight whenever the transport is open; its response
//! body carries a batch of packets. Outbound batches go out as POSTs with a
//! `text/plain` body. `pause` quiesces both directions before an upgrade
//! hands the session over to another transport.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use http::{header, HeaderMap, HeaderValue};

use crate::error::EngineError;
use crate::packet::{Packet, PacketBuf};
use crate::payload;
use crate::transport::{event, Transport, TransportCore, TransportPayload, TransportState};

pub const NAME: &str = "polling";

pub struct PollingTransport {
    core: TransportCore,
    polling: AtomicBool,
}

impl PollingTransport {
    pub fn new(core: TransportCore) -> Arc<Self> {
        Arc::new(Self {
            core,
            polling: AtomicBool::new(false),
        })
    }

    fn request_headers(&self, content_type: Option<&'static str>) -> HeaderMap {
        let mut headers = self.core.opts.extra_headers.clone();
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        if let Some(content_type) = content_type {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        self.core
            .events
            .emit(event::REQUEST_HEADERS, &TransportPayload::Headers(headers.clone()));
        headers
    }

    fn poll(self: &Arc<Self>) {
        self.polling.store(true, Ordering::SeqCst);
        self.core.events.emit(event::POLL, &TransportPayload::None);

        let url = self.core.uri("https", "http");
        let headers = self.request_headers(None);
        tracing::debug!("polling GET {url}");

        let this = self.clone();
        tokio::spawn(async move {
            let res = this.core.factory.get(&url, &headers).await;
            let transport = this.clone();
            this.core
                .scope
                .post(move || transport.on_poll_response(res));
        });
    }

    fn on_poll_response(self: Arc<Self>, res: Result<crate::http::HttpResponse, EngineError>) {
        let response = match res {
            Ok(response) => response,
            Err(e) => return self.core.emit_error(e.to_string()),
        };
        self.core.events.emit(
            event::RESPONSE_HEADERS,
            &TransportPayload::Headers(response.headers.clone()),
        );
        if !(200..300).contains(&response.status) {
            return self
                .core
                .emit_error(EngineError::HttpStatus(response.status).to_string());
        }
        let body = match std::str::from_utf8(&response.body) {
            Ok(body) => body,
            Err(e) => return self.core.emit_error(e.to_string()),
        };
        match payload::decode(body) {
            Ok(packets) => self.on_data(packets),
            Err(e) => self.core.emit_error(e.to_string()),
        }
    }

    fn on_data(self: &Arc<Self>, packets: PacketBuf) {
        for packet in packets {
            let state = self.core.state();
            if matches!(state, TransportState::Opening | TransportState::Closing)
                && matches!(packet, Packet::Open(_))
            {
                self.on_open();
                self.core.emit_packet(packet);
            } else if packet == Packet::Close {
                self.on_close();
                // the rest of the batch is not processed past a close
                break;
            } else {
                self.core.emit_packet(packet);
            }
        }
        if self.core.state() != TransportState::Closed {
            self.polling.store(false, Ordering::SeqCst);
            self.core
                .events
                .emit(event::POLL_COMPLETE, &TransportPayload::None);
            if self.core.state() == TransportState::Open {
                self.poll();
            }
        }
    }

    fn on_open(&self) {
        self.core.set_state(TransportState::Open);
        self.core.set_writable(true);
        self.core.events.emit(event::OPEN, &TransportPayload::None);
    }

    fn on_close(&self) {
        self.core.set_state(TransportState::Closed);
        self.core.set_writable(false);
        self.core.events.emit(event::CLOSE, &TransportPayload::None);
    }

    /// POST a batch. Used by both the public `send` and the closing
    /// handshake, which runs while the state is already `Closing`.
    fn write(self: &Arc<Self>, packets: PacketBuf) {
        self.core.set_writable(false);
        let count = packets.len();
        let body = payload::encode(&packets);
        let url = self.core.uri("https", "http");
        let headers = self.request_headers(Some("text/plain;charset=UTF-8"));
        tracing::debug!("polling POST {count} packet(s)");

        let this = self.clone();
        tokio::spawn(async move {
            let res = this.core.factory.post(&url, &headers, body).await;
            let transport = this.clone();
            this.core.scope.post(move || match res {
                Ok(response) if (200..300).contains(&response.status) => {
                    transport.core.events.emit(
                        event::RESPONSE_HEADERS,
                        &TransportPayload::Headers(response.headers.clone()),
                    );
                    transport.core.set_writable(true);
                    transport
                        .core
                        .events
                        .emit(event::DRAIN, &TransportPayload::Count(count));
                }
                Ok(response) => transport
                    .core
                    .emit_error(EngineError::HttpStatus(response.status).to_string()),
                Err(e) => transport.core.emit_error(e.to_string()),
            });
        });
    }

    /// Send a `Close` packet and tear down once it drained.
    fn write_close(self: &Arc<Self>) {
        let this = self.clone();
        self.core.events.once(event::DRAIN, move |_| {
            this.on_close();
        });
        self.write(smallvec::smallvec![Packet::Close]);
    }
}

impl Transport for PollingTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    fn core(&self) -> &TransportCore {
        &self.core
    }

    fn open(self: Arc<Self>) {
        self.core.set_state(TransportState::Opening);
        self.poll();
    }

    fn send(self: Arc<Self>, packets: PacketBuf) {
        assert_eq!(
            self.core.state(),
            TransportState::Open,
            "send on a transport that is not open"
        );
        self.write(packets);
    }

    fn close(self: Arc<Self>) {
        let previous = self.core.state();
        self.core.set_state(TransportState::Closing);
        match previous {
            TransportState::Open | TransportState::Paused => self.write_close(),
            _ => {
                // not yet open: run the closing handshake once it is
                let this = self.clone();
                self.core.events.once(event::OPEN, move |_| {
                    this.write_close();
                });
            }
        }
    }

    /// Wait for the in-flight GET and POST to settle, then hand over.
    fn pause(self: Arc<Self>, on_pause: Box<dyn FnOnce() + Send>) {
        self.core.set_state(TransportState::Paused);

        let polling = self.polling.load(Ordering::SeqCst);
        let writable = self.core.writable();
        if !polling && writable {
            return on_pause();
        }

        fn finish(pending: &AtomicUsize, on_pause: &Mutex<Option<Box<dyn FnOnce() + Send>>>) {
            if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                if let Some(f) = on_pause.lock().unwrap().take() {
                    f();
                }
            }
        }

        let pending = Arc::new(AtomicUsize::new(
            usize::from(polling) + usize::from(!writable),
        ));
        let on_pause = Arc::new(Mutex::new(Some(on_pause)));
        if polling {
            tracing::debug!("waiting for the in-flight poll before pausing");
            let pending = pending.clone();
            let on_pause = on_pause.clone();
            self.core.events.once(event::POLL_COMPLETE, move |_| {
                finish(&pending, &on_pause);
            });
        }
        if !writable {
            tracing::debug!("waiting for the outstanding write before pausing");
            self.core.events.once(event::DRAIN, move |_| {
                finish(&pending, &on_pause);
            });
        }
    }
}
