//! Entry surface: URI parsing and the manager cache.
//!
//! One manager is kept per `scheme://host:port` origin and shared between
//! the sockets of its namespaces, unless multiplexing is disabled, a fresh
//! connection is forced, or the namespace is already taken on the cached
//! manager.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use switchio_engine::HttpFactory;

use crate::errors::ClientError;
use crate::manager::{Manager, ManagerOptions};
use crate::socket::Socket;

#[derive(Clone)]
pub struct IoOptions {
    /// Always create a dedicated manager. Defaults to false.
    pub force_new: bool,
    /// Share one manager per origin. Defaults to true.
    pub multiplex: bool,
    /// Replacement for the default HTTP/WebSocket factory.
    pub factory: Option<Arc<dyn HttpFactory>>,
    pub manager: ManagerOptions,
}

impl IoOptions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for IoOptions {
    fn default() -> Self {
        Self {
            force_new: false,
            multiplex: true,
            factory: None,
            manager: ManagerOptions::default(),
        }
    }
}

/// A manager cache. The free function [`connect`] uses a process-wide
/// instance; tests create their own.
#[derive(Default)]
pub struct Io {
    cache: Mutex<HashMap<String, Arc<Manager>>>,
}

impl Io {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `uri` to a namespace socket and start connecting it.
    pub fn connect(&self, uri: &str, opts: IoOptions) -> Result<Arc<Socket>, ClientError> {
        let url = url::Url::parse(uri).map_err(|_| ClientError::InvalidUrl(uri.to_owned()))?;
        let host = url
            .host_str()
            .ok_or_else(|| ClientError::InvalidUrl(uri.to_owned()))?;
        let secure = matches!(url.scheme(), "https" | "wss");
        let port = url.port().unwrap_or(if secure { 443 } else { 80 });
        let origin = format!("{}://{host}:{port}", url.scheme());
        let nsp = match url.path() {
            "" | "/" => "/".to_owned(),
            path => path.to_owned(),
        };

        let mut cache = self.cache.lock().unwrap();
        let same_namespace = cache
            .get(&origin)
            .is_some_and(|manager| manager.has_socket(&nsp));
        let new_connection = opts.force_new || !opts.multiplex || same_namespace;

        let manager = if new_connection {
            tracing::debug!("new manager for {origin}");
            Manager::new(uri, opts.manager, opts.factory)?
        } else {
            match cache.get(&origin) {
                Some(manager) => {
                    tracing::debug!("reusing manager for {origin}");
                    manager.clone()
                }
                None => {
                    let manager = Manager::new(uri, opts.manager, opts.factory)?;
                    cache.insert(origin, manager.clone());
                    manager
                }
            }
        };
        drop(cache);

        let socket = manager.socket(&nsp);
        socket.connect();
        Ok(socket)
    }
}

static GLOBAL: OnceLock<Io> = OnceLock::new();

/// Connect using the process-wide manager cache.
pub fn connect(uri: &str, opts: IoOptions) -> Result<Arc<Socket>, ClientError> {
    GLOBAL.get_or_init(Io::new).connect(uri, opts)
}
