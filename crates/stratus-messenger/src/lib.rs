//! Binary liveness/metrics client for the coordinator process.
//!
//! Every query is a single round trip on a fresh socket: a 4-byte opcode out,
//! a fixed-size little-endian reply back.

mod config;
pub use config::MessengerConfig;

mod error;
pub use error::MessengerError;

pub mod wire;

mod client;
pub use client::Messenger;
