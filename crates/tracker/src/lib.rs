//! Core of the peer-discovery tracker: the registry, protocol dispatch,
//! connection dispatcher, and the ambient config/logging/error stack that
//! wraps them into a runnable binary (`src/bin/main.rs`).

pub mod common;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod net;
pub mod processor;
pub mod registry;

pub use error::TrackerError;
pub use registry::Registry;
