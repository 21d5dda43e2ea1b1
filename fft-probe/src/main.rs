//! # fft-probe - command-line driver for the threaded FFT engine
//!
//! Generates a test tone, runs it through an [`Engine`] the same way a tuner
//! would (submit, then wait for the completion message) and reports where
//! the energy landed.
//!
//! ## Architecture
//! - **Main Thread**: builds the engine, submits, waits on a channel
//! - **Engine Threads**: coordinator plus worker pool inside `fft-core`
//! - **Communication**: the completion callback forwards the spectrum over a
//!   crossbeam channel

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use fft_core::{Engine, EngineConfig, SampleBuffer, Submission, spectrum};
use log::{debug, info};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Run a test tone through the multi-threaded FFT engine.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Base-2 logarithm of the transform size
    #[arg(long, default_value_t = 13)]
    nu: u32,

    /// Worker thread hint (rounded up to a power of two)
    #[arg(long)]
    threads: Option<usize>,

    /// JSON engine configuration; overrides --nu and --threads
    #[arg(long)]
    config: Option<PathBuf>,

    /// Frequency of the generated tone in Hz
    #[arg(long, default_value_t = 329.7)]
    frequency: f32,

    /// Sample rate of the generated tone in Hz
    #[arg(long, default_value_t = 5510.0)]
    sample_rate: f32,

    /// Also run the inverse transform and report the reconstruction error
    #[arg(long)]
    inverse_check: bool,

    /// Give up waiting for the spectrum after this many milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Print the effective engine configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading engine configuration from {}", path.display()))?,
        None => EngineConfig::new(args.nu, args.threads),
    };
    if args.print_config {
        println!("{}", config.to_json().context("serializing engine configuration")?);
        return Ok(());
    }
    let engine = Engine::from_config(&config).context("creating FFT engine")?;
    info!(
        "[PROBE] Engine: N={} with {} worker threads",
        engine.len(),
        engine.threads()
    );

    let signal = tone(engine.len(), args.frequency, args.sample_rate);
    let timeout = Duration::from_millis(args.timeout_ms);

    let started = Instant::now();
    let result = run_forward(&engine, signal.clone(), timeout)?;
    debug!("[PROBE] Forward transform took {:?}", started.elapsed());

    let magnitudes = spectrum::magnitudes(&result);
    let Some(peak) = spectrum::peak_bin(&magnitudes) else {
        bail!("spectrum is empty: no energy outside DC");
    };
    let position = spectrum::interpolate_peak(&magnitudes, peak);
    println!(
        "peak bin {peak} ({:.2} Hz, interpolated {:.2} Hz), magnitude {:.1}",
        spectrum::bin_frequency(peak, engine.len(), args.sample_rate),
        position * args.sample_rate / engine.len() as f32,
        magnitudes[peak]
    );

    if args.inverse_check {
        let restored = engine.inverse(result).context("running inverse transform")?;
        let max_error = restored
            .real
            .iter()
            .zip(&signal)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        println!("round-trip max error {max_error:.2e}");
    }

    engine.shutdown();
    Ok(())
}

/// Submits a forward transform and waits for the completion message.
fn run_forward(engine: &Engine, samples: Vec<f32>, timeout: Duration) -> Result<SampleBuffer> {
    let (spectrum_tx, spectrum_rx) = crossbeam_channel::bounded(1);
    let submission = engine.submit(SampleBuffer::from_real(samples), move |spectrum| {
        // The receiver may have given up already.
        let _ = spectrum_tx.send(spectrum);
    })?;
    if let Submission::Busy(_) = submission {
        bail!("engine is busy");
    }

    match spectrum_rx.recv_timeout(timeout) {
        Ok(spectrum) => Ok(spectrum),
        Err(RecvTimeoutError::Timeout) => bail!("no spectrum after {timeout:?}"),
        Err(RecvTimeoutError::Disconnected) => bail!("engine stopped before completing"),
    }
}

/// Unit-amplitude sine sampled at `sample_rate`.
fn tone(len: usize, frequency: f32, sample_rate: f32) -> Vec<f32> {
    let step = 2.0 * std::f64::consts::PI * frequency as f64 / sample_rate as f64;
    (0..len).map(|i| (step * i as f64).sin() as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_peaks_at_its_frequency() {
        let engine = Engine::new(10, 2).unwrap();
        // 64 cycles in 1024 samples: exactly bin 64.
        let signal = tone(1024, 64.0 * 8000.0 / 1024.0, 8000.0);
        let result = run_forward(&engine, signal, Duration::from_secs(5)).unwrap();
        let magnitudes = spectrum::magnitudes(&result);
        assert_eq!(spectrum::peak_bin(&magnitudes), Some(64));
    }

    #[test]
    fn args_accept_defaults() {
        let args = Args::try_parse_from(["fft-probe"]).unwrap();
        assert_eq!(args.nu, 13);
        assert!(args.threads.is_none());
        assert!(!args.inverse_check);
        assert!(!args.print_config);
    }

    #[test]
    fn printed_config_loads_back() {
        let args = Args::try_parse_from(["fft-probe", "--nu", "11", "--threads", "4"]).unwrap();
        let config = EngineConfig::new(args.nu, args.threads);
        let json = config.to_json().unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }
}
