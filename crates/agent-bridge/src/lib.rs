//! Agent Bridge Library
//!
//! Relays a duplex client connection to a conversational agent, either an
//! in-process agent or a remote agent engine reached over WebSocket.

pub mod api;
pub mod backend;
pub mod config;
pub mod driver;
pub mod error;
pub mod handshake;
pub mod queue;
pub mod receive;
pub mod session;
pub mod supervisor;

pub use error::{BridgeError, BridgeResult};
pub use session::{ClientOutbox, Session, SessionSettings};
