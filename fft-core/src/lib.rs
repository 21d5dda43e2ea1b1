// fft-core/src/lib.rs

//! The core of the parallel FFT engine.
//! This crate computes in-place radix-2 transforms on a fixed pool of
//! worker threads, coordinated by message-counted barriers. It is
//! completely headless and has no audio or GUI code.

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod spectrum;
pub mod twiddle;
mod worker;

pub use buffer::SampleBuffer;
pub use config::EngineConfig;
pub use engine::{Direction, Engine, Outcome, Submission, TransformOptions};
pub use error::{EngineError, Result};
pub use twiddle::{TwiddleTable, bit_reverse};

/// Largest supported `nu`; transforms hold at most `2^MAX_NU` samples.
pub const MAX_NU: u32 = 28;
