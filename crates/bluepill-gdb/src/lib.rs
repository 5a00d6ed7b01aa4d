//! GDB Remote Serial Protocol server for the emulated machine.
//!
//! One blocking TCP listener, one client at a time. The packet framing and
//! hex plumbing live in [`protocol`]; [`GdbServer`] owns the socket loop
//! and translates commands into machine operations.

pub mod protocol;
mod server;

pub use server::{GdbServer, DEFAULT_PORT};
