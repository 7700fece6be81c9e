//! rocd daemon internals: configuration, signal handling, the HTTP
//! boundary, and the stream-manager placeholder. The `rocd` binary is
//! a thin wrapper over these.

pub mod config;
pub mod server;
pub mod signals;
pub mod streams;
