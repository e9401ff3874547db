//! # Common Components
//!
//! Shared building blocks used by both the client and server sides.
//!
//! ## Modules
//!
//! - [`framing`]: Length-prefixed wire framing
//! - [`codec`]: Pluggable value codecs (JSON, raw bytes)
//! - [`connection`]: Message connection with background receive pump
//! - [`handler`]: Processing hooks injected into a connection
//! - [`config`]: Transport configuration and TOML loading
//! - [`error`]: Error taxonomy
//! - [`metrics`]: Per-connection traffic counters

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod framing;
pub mod handler;
pub mod metrics;
