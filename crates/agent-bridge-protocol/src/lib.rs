//! Wire types spoken between the agent bridge and its clients.
//!
//! Clients talk to the bridge over a duplex channel carrying JSON text frames
//! and binary frames. This crate defines:
//!
//! - [`InboundMessage`]: a classified client frame, ready for the input queue
//! - [`ServerFrame`]: everything the bridge sends back to a client
//! - the response translator that normalizes remote engine envelopes into the
//!   canonical event shape produced by in-process agents

pub mod envelope;
pub mod frames;

pub use envelope::{WRAPPED_OUTPUT_KEY, is_forwardable, response_error, translate_response};
pub use frames::{BINARY_DATA_KEY, InboundMessage, SETUP_KEY, ServerFrame};
