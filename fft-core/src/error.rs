//! Error type shared by construction, submission and configuration loading.

use std::fmt;

/// Errors reported synchronously by the engine.
///
/// Nothing here is raised mid-computation: size and thread problems surface
/// at construction, buffer problems at submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// `nu` is zero or larger than [`crate::MAX_NU`].
    InvalidSize { nu: u32 },
    /// No power-of-two thread count `>= requested` fits under `N/2`.
    ThreadCount { requested: usize, max: usize },
    /// The submitted buffer does not hold exactly `N` samples per channel.
    BufferLength { expected: usize, real: usize, imag: usize },
    /// A transform is already in flight.
    Busy,
    /// The deadline passed before the transform finished.
    DeadlineExceeded,
    /// The engine threads are gone.
    Shutdown,
    /// A worker or coordinator thread could not be started.
    Spawn(String),
    /// A configuration file could not be parsed.
    Config(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidSize { nu } => {
                write!(f, "invalid transform size: nu={nu} (expected 1..={})", crate::MAX_NU)
            }
            EngineError::ThreadCount { requested, max } => write!(
                f,
                "cannot run {requested} worker threads: at most {max} fit this transform size"
            ),
            EngineError::BufferLength { expected, real, imag } => write!(
                f,
                "buffer length mismatch: expected {expected} samples, got real={real} imag={imag}"
            ),
            EngineError::Busy => write!(f, "engine is busy with another transform"),
            EngineError::DeadlineExceeded => write!(f, "transform deadline exceeded"),
            EngineError::Shutdown => write!(f, "engine has shut down"),
            EngineError::Spawn(msg) => write!(f, "failed to start engine thread: {msg}"),
            EngineError::Config(msg) => write!(f, "invalid engine configuration: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
