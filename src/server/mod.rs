//! # Server Components
//!
//! Passive side of the transport: the [`Listener`] accept loop and the stock [`Echo`]
//! responder used by the `server` binary.

pub mod echo;
pub mod listener;

pub use echo::Echo;
pub use listener::{ConnectionFactory, HandlerFactory, Listener};
