//! Socket.IO v4 client.
//!
//! This crate speaks the Socket.IO application protocol over the Engine.IO
//! session layer of `switchio-engine`. It multiplexes namespace channels
//! over one physical connection, reconnects with jittered exponential
//! backoff, and exposes an event-emitter API for typed events, binary
//! attachments and request/response acknowledgements.
//!
//! ```no_run
//! use switchio::{connect, Data, IoOptions};
//!
//! # async fn run() -> Result<(), switchio::ClientError> {
//! let socket = connect("http://localhost:3000/", IoOptions::new())?;
//! socket.on("connect", |_| println!("connected"));
//! socket.on("message", |event| println!("got {:?}", event.args));
//! socket.emit("message", vec![Data::from("hi")]);
//! # Ok(())
//! # }
//! ```

pub mod ack;
pub mod backoff;
pub mod binary;
pub mod errors;
pub mod io;
pub mod manager;
pub mod packet;
pub mod payload;
pub mod socket;

pub use crate::ack::{Ack, AckHandler, AckWithTimeout};
pub use crate::backoff::Backoff;
pub use crate::binary::BinaryReconstructor;
pub use crate::errors::{ClientError, ParseError};
pub use crate::io::{connect, Io, IoOptions};
pub use crate::manager::{Manager, ManagerOptions, ManagerPayload, ManagerState};
pub use crate::payload::Data;
pub use crate::socket::{Event, ReplyAck, Socket, RESERVED_EVENTS};
