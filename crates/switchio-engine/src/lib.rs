//! Engine.IO v4 client.
//!
//! This crate implements the session layer of the Socket.IO stack: it opens
//! a connection over HTTP long-polling or websocket, performs the Engine.IO
//! handshake, keeps the session alive through the server heartbeat, buffers
//! outbound packets, and upgrades from polling to websocket in flight
//! without losing a packet.
//!
//! The application layer (`switchio`) multiplexes namespaces on top of the
//! [`engine::Engine`] exposed here.
//!
//! All state machines run on a serialized [`scope::Scope`]; network I/O
//! happens on plain tokio tasks that post their outcomes back onto it.

pub mod config;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod http;
pub mod packet;
pub mod payload;
pub mod query;
pub mod scope;
pub mod transport;

pub use crate::config::{EngineOptions, EngineOptionsBuilder, TransportOptions};
pub use crate::emitter::{Emitter, Listener, Sub};
pub use crate::engine::{Data, Engine, EnginePayload, EngineState};
pub use crate::error::EngineError;
pub use crate::http::{DefaultHttpFactory, HttpFactory, HttpResponse, WsFrame, WsSession};
pub use crate::packet::{OpenPacket, Packet, PacketBuf, PacketParseError};
pub use crate::scope::{Scope, TimerHandle};
