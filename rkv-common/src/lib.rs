// rkv-common - Shared types and wire codec for the ResilientKV client
//
// This crate defines the error taxonomy, the RESP2 codec and the connection options

pub mod config;
pub mod error;
pub mod resp;

// Re-export for convenience
pub use config::*;
pub use error::*;
pub use resp::{decode, encode_command, RespDecoder, RespValue};
