//! # Client Components
//!
//! Active side of the transport: opening a [`Connection`](crate::Connection) to a
//! listening peer.

pub mod connector;

pub use connector::{connect, connect_with};
