//! Tracing setup
//!
//! Library code only emits `tracing` events; binaries call [`init_tracing`]
//! once at startup to decide where they go.

pub mod logging;

pub use logging::{init_tracing, LoggingError};
