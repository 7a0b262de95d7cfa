//! The injected HTTP / WebSocket factory.
//!
//! Transports never talk to the network directly: they go through an
//! [`HttpFactory`] supplied at construction time. The default factory is
//! backed by `reqwest` and `tokio-tungstenite`; tests substitute scripted
//! in-memory doubles.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use http::HeaderMap;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector;

use crate::error::EngineError;

/// A websocket frame as seen by the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub enum WsFrame {
    Text(String),
    Binary(Bytes),
    Close,
}

/// Write half of an open websocket session.
pub type WsSink = Pin<Box<dyn Sink<WsFrame, Error = EngineError> + Send>>;
/// Read half of an open websocket session.
pub type WsSource = Pin<Box<dyn Stream<Item = Result<WsFrame, EngineError>> + Send>>;

/// Response of one polling request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// An established websocket session: sink, source and the handshake
/// response headers.
pub struct WsSession {
    pub sink: WsSink,
    pub source: WsSource,
    pub response_headers: HeaderMap,
}

/// Supplier of the raw HTTP and WebSocket clients.
///
/// The factory is shared between transports and outlives any single engine,
/// it is held behind an `Arc` and not owned by the engine.
#[async_trait]
pub trait HttpFactory: Send + Sync + 'static {
    /// Issue a polling GET against `url`.
    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<HttpResponse, EngineError>;

    /// Issue a polling POST with the given body.
    async fn post(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: String,
    ) -> Result<HttpResponse, EngineError>;

    /// Open a websocket session against `url`.
    async fn ws_connect(&self, url: &str, headers: &HeaderMap) -> Result<WsSession, EngineError>;
}

/// Default factory backed by `reqwest` for polling and `tokio-tungstenite`
/// for websocket sessions.
pub struct DefaultHttpFactory {
    client: reqwest::Client,
    trust_all_certs: bool,
}

impl DefaultHttpFactory {
    pub fn new(trust_all_certs: bool) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(trust_all_certs)
            .build()
            .map_err(|e| EngineError::Http(e.to_string()))?;
        Ok(Self {
            client,
            trust_all_certs,
        })
    }

    async fn response(&self, res: reqwest::Response) -> Result<HttpResponse, EngineError> {
        let status = res.status().as_u16();
        let headers = res.headers().clone();
        let body = res
            .bytes()
            .await
            .map_err(|e| EngineError::Http(e.to_string()))?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl HttpFactory for DefaultHttpFactory {
    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<HttpResponse, EngineError> {
        let res = self
            .client
            .get(url)
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| EngineError::Http(e.to_string()))?;
        self.response(res).await
    }

    async fn post(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: String,
    ) -> Result<HttpResponse, EngineError> {
        let res = self
            .client
            .post(url)
            .headers(headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| EngineError::Http(e.to_string()))?;
        self.response(res).await
    }

    async fn ws_connect(&self, url: &str, headers: &HeaderMap) -> Result<WsSession, EngineError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| EngineError::Ws(e.to_string()))?;
        request.headers_mut().extend(headers.clone());

        let connector = if self.trust_all_certs {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .map_err(|e| EngineError::Ws(e.to_string()))?;
            Some(Connector::NativeTls(tls))
        } else {
            None
        };

        let (ws, response) =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
                .await
                .map_err(|e| EngineError::Ws(e.to_string()))?;
        let response_headers = response.headers().clone();

        let (sink, source) = ws.split();
        let sink: WsSink = Box::pin(
            sink.sink_map_err(|e| EngineError::Ws(e.to_string()))
                .with(|frame: WsFrame| {
                    future::ready(Ok::<Message, EngineError>(match frame {
                        WsFrame::Text(text) => Message::Text(text.into()),
                        WsFrame::Binary(data) => Message::Binary(data),
                        WsFrame::Close => Message::Close(None),
                    }))
                }),
        );
        let source: WsSource = Box::pin(source.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(WsFrame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(data)) => Some(Ok(WsFrame::Binary(data))),
                Ok(Message::Close(_)) => Some(Ok(WsFrame::Close)),
                // ping/pong control frames are answered by tungstenite
                Ok(_) => None,
                Err(e) => Some(Err(EngineError::Ws(e.to_string()))),
            })
        }));

        Ok(WsSession {
            sink,
            source,
            response_headers,
        })
    }
}
