use std::collections::HashMap;

use http::HeaderMap;

/// Options shared by every transport of a session.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Use `https`/`wss` schemes.
    pub secure: bool,
    /// Host name or IP literal. IPv6 literals are stored unbracketed and
    /// re-bracketed when the URL is built.
    pub hostname: String,
    /// Port, `0` lets the scheme default apply.
    pub port: u16,
    /// Request path, defaults to `/engine.io/`.
    pub path: String,
    /// Append a cache-busting timestamp parameter to every request URL.
    pub timestamp_requests: bool,
    /// Name of the timestamp parameter.
    pub timestamp_param: String,
    /// Extra query parameters passed through verbatim.
    pub query: HashMap<String, String>,
    /// Extra headers for every HTTP request and the websocket handshake.
    pub extra_headers: HeaderMap,
    /// Accept any TLS certificate. Forwarded to the HTTP factory.
    pub trust_all_certs: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            secure: false,
            hostname: "localhost".into(),
            port: 0,
            path: "/engine.io/".into(),
            timestamp_requests: false,
            timestamp_param: "t".into(),
            query: HashMap::new(),
            extra_headers: HeaderMap::new(),
            trust_all_certs: false,
        }
    }
}

/// Options of an engine session.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Base options applied to every transport.
    pub transport: TransportOptions,
    /// Transport names to try, in order. The first entry is the initial
    /// transport unless `remember_upgrade` applies.
    pub transports: Vec<String>,
    /// Probe the upgrade candidates the server offers after the handshake.
    pub upgrade: bool,
    /// Start directly on websocket when a previous session upgraded
    /// successfully.
    pub remember_upgrade: bool,
    /// Per-transport replacements for the base transport options.
    pub transport_options: HashMap<String, TransportOptions>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            transport: TransportOptions::default(),
            transports: vec!["polling".into(), "websocket".into()],
            upgrade: true,
            remember_upgrade: false,
            transport_options: HashMap::new(),
        }
    }
}

impl EngineOptions {
    pub fn builder() -> EngineOptionsBuilder {
        EngineOptionsBuilder::new()
    }

    /// Options for one transport: the per-transport replacement if
    /// configured, the base options otherwise.
    pub(crate) fn options_for(&self, transport: &str) -> TransportOptions {
        self.transport_options
            .get(transport)
            .unwrap_or(&self.transport)
            .clone()
    }
}

pub struct EngineOptionsBuilder {
    opts: EngineOptions,
}

impl EngineOptionsBuilder {
    pub fn new() -> Self {
        Self {
            opts: EngineOptions::default(),
        }
    }

    /// Transport names to try, in order.
    pub fn transports(mut self, transports: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.opts.transports = transports.into_iter().map(Into::into).collect();
        self
    }

    /// Probe the upgrade candidates offered by the server. Defaults to true.
    pub fn upgrade(mut self, upgrade: bool) -> Self {
        self.opts.upgrade = upgrade;
        self
    }

    /// Start directly on websocket when a previous session upgraded
    /// successfully. Defaults to false.
    pub fn remember_upgrade(mut self, remember: bool) -> Self {
        self.opts.remember_upgrade = remember;
        self
    }

    /// Request path. Defaults to `/engine.io/`.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.opts.transport.path = path.into();
        self
    }

    /// Add a query parameter passed through on every request.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.opts.transport.query.insert(key.into(), value.into());
        self
    }

    /// Extra headers for every request.
    pub fn extra_headers(mut self, headers: HeaderMap) -> Self {
        self.opts.transport.extra_headers = headers;
        self
    }

    /// Append a cache-busting timestamp parameter to every request URL.
    pub fn timestamp_requests(mut self, enabled: bool) -> Self {
        self.opts.transport.timestamp_requests = enabled;
        self
    }

    /// Accept any TLS certificate.
    pub fn trust_all_certs(mut self, trust: bool) -> Self {
        self.opts.transport.trust_all_certs = trust;
        self
    }

    /// Replace the transport options for one transport entirely.
    pub fn transport_options(
        mut self,
        transport: impl Into<String>,
        opts: TransportOptions,
    ) -> Self {
        self.opts.transport_options.insert(transport.into(), opts);
        self
    }

    pub fn build(self) -> EngineOptions {
        self.opts
    }
}

impl Default for EngineOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
