//! Error taxonomy for the tracker core.
//!
//! Every operation that can fail on caller-supplied input or a saturated
//! resource returns one of these instead of panicking; only truly
//! unreachable states use `unwrap`.

use std::io;

/// Registry full; the offending record was dropped.
#[derive(Debug, thiserror::Error)]
#[error("registry at capacity ({capacity} records)")]
pub struct CapacityError {
    pub capacity: usize,
}

/// Top-level error surfaced to `main`. Each variant carries the process
/// exit code it maps to.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("config load error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("socket setup error: {0}")]
    Socket(#[source] io::Error),
    #[error("worker pool creation error: {reason}")]
    WorkerPool { reason: &'static str },
    #[error("shutdown requested")]
    ShutdownRequested,
}

impl TrackerError {
    /// Process exit code, per the CLI surface's documented codes.
    pub fn exit_code(&self) -> i32 {
        match self {
            TrackerError::Config(_) => 2,
            TrackerError::Socket(_) => 3,
            TrackerError::WorkerPool { .. } => 5,
            TrackerError::ShutdownRequested => 6,
        }
    }
}
