//! Transport layer for cartophone.
//!
//! The reader pipeline is transport-agnostic; HTTP is the only surface today.

pub mod http;

pub use http::{ServerConfig, serve};
