//! # FFT Engine Module
//!
//! The public entry point. An [`Engine`] owns a fixed pool of butterfly
//! workers and a coordinator thread that drives them through one transform
//! at a time.
//!
//! ## Transform lifecycle
//! 1. `submit` checks the buffer, claims the busy flag and hands the job to
//!    the coordinator. A second submit while busy is rejected, not queued.
//! 2. **Distributed**: the first `log2(threads)` stages run in strided
//!    assignment, with a barrier after each one.
//! 3. **Local**: each worker finishes every remaining stage on its own
//!    contiguous block, then reports once.
//! 4. **Reordering**: the coordinator undoes the bit-reversed output order,
//!    clears the busy flag and invokes the completion callback.
//!
//! The barrier is message counted: the coordinator sleeps in a channel
//! `select!` and only acts when the last report of a round arrives.

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::MAX_NU;
use crate::buffer::SampleBuffer;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::twiddle::{TwiddleTable, bit_reverse};
use crate::worker::{Command, Regime, Report, WorkerHandle};

/// Sign convention of the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// `X[k] = Σ x[n]·e^{-2πi·kn/N}`
    #[default]
    Forward,
    /// Conjugate twiddles, result scaled by `1/N`.
    Inverse,
}

impl Direction {
    /// Factor applied to the sine half of every twiddle.
    pub(crate) fn twiddle_sign(self) -> f32 {
        match self {
            Direction::Forward => 1.0,
            Direction::Inverse => -1.0,
        }
    }
}

/// Per-request options for [`Engine::submit_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformOptions {
    pub direction: Direction,
    /// Abort the transform if it is still running at this instant.
    pub deadline: Option<Instant>,
}

impl TransformOptions {
    pub fn inverse() -> Self {
        Self {
            direction: Direction::Inverse,
            ..Self::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }
}

/// Result of a submit call.
#[derive(Debug)]
pub enum Submission {
    /// The transform is running; the callback will fire exactly once.
    Accepted,
    /// Another transform is in flight. The buffer is returned untouched.
    Busy(SampleBuffer),
}

impl Submission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Submission::Accepted)
    }
}

/// What the completion callback of [`Engine::submit_with`] receives.
#[derive(Debug)]
pub enum Outcome {
    /// The spectrum, in natural order.
    Completed(SampleBuffer),
    /// The deadline passed. The buffer holds partially transformed data.
    DeadlineExceeded(SampleBuffer),
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn into_buffer(self) -> SampleBuffer {
        match self {
            Outcome::Completed(buffer) | Outcome::DeadlineExceeded(buffer) => buffer,
        }
    }
}

type Callback = Box<dyn FnOnce(Outcome) + Send + 'static>;

/// A checked-out buffer plus everything needed to finish it.
struct Job {
    buffer: SampleBuffer,
    direction: Direction,
    deadline: Option<Instant>,
    on_complete: Callback,
}

enum Control {
    Transform(Job),
}

/// Multi-threaded, barrier-synchronised radix-2 FFT for `N = 2^nu` samples.
///
/// ```
/// use fft_core::{Engine, SampleBuffer};
///
/// let engine = Engine::new(3, 2)?;
/// let spectrum = engine.transform(SampleBuffer::from_real(vec![1.0; 8]))?;
/// assert!((spectrum.real[0] - 8.0).abs() < 1e-6);
/// # Ok::<(), fft_core::EngineError>(())
/// ```
#[derive(Debug)]
pub struct Engine {
    nu: u32,
    threads: usize,
    busy: Arc<AtomicBool>,
    control: Option<Sender<Control>>,
    coordinator: Option<JoinHandle<()>>,
}

impl Engine {
    /// Creates an engine for `2^nu` samples.
    ///
    /// The pool size is the smallest power of two that is at least 2 and at
    /// least `thread_hint`. It must not exceed `N/2`.
    ///
    /// # Arguments
    /// * `nu` - Base-2 logarithm of the transform size (e.g. 13 for 8192)
    /// * `thread_hint` - Minimum number of worker threads wanted
    ///
    /// # Returns
    /// * `Ok(engine)` - Idle engine with its worker pool running
    /// * `Err(e)` - `InvalidSize`, `ThreadCount` or `Spawn`
    pub fn new(nu: u32, thread_hint: usize) -> Result<Self> {
        let threads = resolve_thread_count(nu, thread_hint)?;
        Self::spawn(nu, threads)
    }

    /// Creates an engine from a configuration. Without an explicit thread
    /// count the pool follows the number of available CPUs, capped at `N/2`.
    ///
    /// # Returns
    /// * `Ok(engine)` - Idle engine sized from `config`
    /// * `Err(e)` - Same failures as [`Engine::new`]
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let threads = match config.threads {
            Some(hint) => resolve_thread_count(config.nu, hint)?,
            None => {
                let cpus = thread::available_parallelism().map_or(2, |n| n.get());
                let cap = max_threads(config.nu)?.max(2);
                resolve_thread_count(config.nu, cpus.min(cap))?
            }
        };
        Self::spawn(config.nu, threads)
    }

    fn spawn(nu: u32, threads: usize) -> Result<Self> {
        let table = TwiddleTable::shared(nu);
        let (reports_tx, reports_rx) = crossbeam_channel::unbounded();
        let workers = (0..threads)
            .map(|id| WorkerHandle::spawn(id, threads, table.clone(), reports_tx.clone()))
            .collect::<Result<Vec<_>>>()?;
        // Only workers hold report senders.
        drop(reports_tx);

        let busy = Arc::new(AtomicBool::new(false));
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let coordinator = Coordinator {
            nu,
            threads,
            busy: busy.clone(),
            workers,
            in_flight: None,
        };
        let handle = thread::Builder::new()
            .name("fft-coordinator".into())
            .spawn(move || coordinator.run(control_rx, reports_rx))
            .map_err(|e| EngineError::Spawn(e.to_string()))?;

        info!("[ENGINE] Ready: N={} ({} worker threads)", 1usize << nu, threads);
        Ok(Self {
            nu,
            threads,
            busy,
            control: Some(control_tx),
            coordinator: Some(handle),
        })
    }

    /// Base-2 logarithm of the transform size.
    pub fn nu(&self) -> u32 {
        self.nu
    }

    /// Transform size `N`.
    pub fn len(&self) -> usize {
        1 << self.nu
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// True from an accepted submit until the output has been reordered and
    /// handed to the callback.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Starts a forward transform. `on_complete` receives the spectrum on the
    /// coordinator thread.
    ///
    /// # Arguments
    /// * `buffer` - Exactly `N` samples in both channels, natural order
    /// * `on_complete` - Receives the spectrum in natural order
    ///
    /// # Returns
    /// Same as [`Engine::submit_with`].
    pub fn submit<F>(&self, buffer: SampleBuffer, on_complete: F) -> Result<Submission>
    where
        F: FnOnce(SampleBuffer) + Send + 'static,
    {
        self.submit_with(buffer, TransformOptions::default(), move |outcome| {
            on_complete(outcome.into_buffer())
        })
    }

    /// Starts a transform with explicit direction and deadline.
    ///
    /// Buffer length problems are reported here, before any work starts.
    /// Rejection because of a transform in flight is not an error: the
    /// buffer comes back in [`Submission::Busy`].
    ///
    /// # Arguments
    /// * `buffer` - Exactly `N` samples in both channels, natural order
    /// * `options` - Direction and optional deadline
    /// * `on_complete` - Called once on the coordinator thread with the result
    ///
    /// # Returns
    /// * `Ok(Submission::Accepted)` - The callback will fire
    /// * `Ok(Submission::Busy(buffer))` - Rejected, buffer returned untouched
    /// * `Err(e)` - `BufferLength` or `Shutdown`
    pub fn submit_with<F>(
        &self,
        buffer: SampleBuffer,
        options: TransformOptions,
        on_complete: F,
    ) -> Result<Submission>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let expected = self.len();
        if buffer.real.len() != expected || buffer.imag.len() != expected {
            return Err(EngineError::BufferLength {
                expected,
                real: buffer.real.len(),
                imag: buffer.imag.len(),
            });
        }
        let control = self.control.as_ref().ok_or(EngineError::Shutdown)?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("[ENGINE] Busy, transform request rejected");
            return Ok(Submission::Busy(buffer));
        }

        let job = Job {
            buffer,
            direction: options.direction,
            deadline: options.deadline,
            on_complete: Box::new(on_complete),
        };
        if control.send(Control::Transform(job)).is_err() {
            self.busy.store(false, Ordering::Release);
            return Err(EngineError::Shutdown);
        }
        Ok(Submission::Accepted)
    }

    /// Forward transform that blocks until the spectrum is ready.
    pub fn transform(&self, buffer: SampleBuffer) -> Result<SampleBuffer> {
        self.transform_with(buffer, TransformOptions::default())
    }

    /// Inverse transform that blocks until the signal is ready.
    pub fn inverse(&self, buffer: SampleBuffer) -> Result<SampleBuffer> {
        self.transform_with(buffer, TransformOptions::inverse())
    }

    /// Blocking transform with options. An expired deadline becomes
    /// [`EngineError::DeadlineExceeded`].
    ///
    /// Must not be called from a completion callback: the callback runs on
    /// the coordinator thread, which would then wait on itself.
    ///
    /// # Errors
    /// * `BufferLength` - `buffer` does not hold `N` samples per channel
    /// * `Busy` - Another transform is in flight
    /// * `DeadlineExceeded` - The deadline passed at a stage barrier
    /// * `Shutdown` - The engine stopped before answering
    pub fn transform_with(
        &self,
        buffer: SampleBuffer,
        options: TransformOptions,
    ) -> Result<SampleBuffer> {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let submission = self.submit_with(buffer, options, move |outcome| {
            let _ = done_tx.send(outcome);
        })?;
        if let Submission::Busy(_) = submission {
            return Err(EngineError::Busy);
        }
        match done_rx.recv() {
            Ok(Outcome::Completed(buffer)) => Ok(buffer),
            Ok(Outcome::DeadlineExceeded(_)) => Err(EngineError::DeadlineExceeded),
            Err(_) => Err(EngineError::Shutdown),
        }
    }

    /// Stops the coordinator and every worker. A transform already accepted
    /// runs to completion first.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(control) = self.control.take() else {
            return;
        };
        drop(control);
        if let Some(handle) = self.coordinator.take() {
            // Dropping the engine from its own completion callback must not
            // join the thread running that callback.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("[ENGINE] Coordinator terminated abnormally");
            }
        }
        info!("[ENGINE] Shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Largest legal pool size for `nu`, or `InvalidSize`.
fn max_threads(nu: u32) -> Result<usize> {
    if nu == 0 || nu > MAX_NU {
        return Err(EngineError::InvalidSize { nu });
    }
    Ok((1usize << nu) / 2)
}

/// Rounds `hint` up to a power of two no smaller than 2 and checks it
/// against the `threads <= N/2` bound.
///
/// # Arguments
/// * `nu` - Base-2 logarithm of the transform size
/// * `hint` - Requested number of worker threads
///
/// # Returns
/// * `Ok(threads)` - Pool size to spawn
/// * `Err(InvalidSize)` - `nu` is out of range
/// * `Err(ThreadCount)` - No power of two `>= hint` fits under `N/2`,
///   including hints too large to round up at all
pub fn resolve_thread_count(nu: u32, hint: usize) -> Result<usize> {
    let max = max_threads(nu)?;
    hint.max(2)
        .checked_next_power_of_two()
        .filter(|&threads| threads <= max)
        .ok_or(EngineError::ThreadCount { requested: hint, max })
}

/// Swaps every sample with its bit-reversed partner, turning the
/// decimation-in-time output order back into natural order.
pub fn reorder(buffer: &mut SampleBuffer, nu: u32) {
    for k in 0..buffer.len() {
        let ib = bit_reverse(k, nu);
        if ib > k {
            buffer.swap(k, ib);
        }
    }
}

/// Where the transform in flight stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Strided stages; `depth` doubles per stage, starting at 2.
    Distributed { depth: usize },
    /// Workers are finishing their blocks.
    Local,
}

struct InFlight {
    job: Job,
    phase: Phase,
    pending: usize,
}

/// State owned by the coordinator thread.
struct Coordinator {
    nu: u32,
    threads: usize,
    busy: Arc<AtomicBool>,
    workers: Vec<WorkerHandle>,
    in_flight: Option<InFlight>,
}

impl Coordinator {
    fn run(mut self, control: Receiver<Control>, reports: Receiver<Report>) {
        debug!("[ENGINE] Coordinator started");
        let closed = crossbeam_channel::never::<Control>();
        let mut accepting = true;

        loop {
            if !accepting && self.in_flight.is_none() {
                break;
            }
            let control_rx = if accepting { &control } else { &closed };

            crossbeam_channel::select! {
                recv(control_rx) -> msg => match msg {
                    Ok(Control::Transform(job)) => self.start(job),
                    Err(_) => {
                        debug!("[ENGINE] Control channel closed");
                        accepting = false;
                    }
                },
                recv(reports) -> msg => match msg {
                    Ok(report) => self.on_report(report),
                    Err(_) => {
                        error!("[ENGINE] All workers gone");
                        break;
                    }
                },
            }
        }

        // Dropping the handles joins the workers.
        self.workers.clear();
        debug!("[ENGINE] Coordinator finished");
    }

    fn start(&mut self, mut job: Job) {
        if self.in_flight.is_some() {
            // The busy flag makes this unreachable; never touch a buffer the
            // workers may be writing.
            error!("[ENGINE] Transform started while another is in flight, dropping it");
            return;
        }
        debug!("[ENGINE] Transform started ({:?})", job.direction);

        let samples = job.buffer.shared_view();
        for worker in &self.workers {
            worker.send(Command::Begin {
                samples,
                direction: job.direction,
            });
            worker.send(Command::StridedStage);
        }
        self.in_flight = Some(InFlight {
            job,
            phase: Phase::Distributed { depth: 2 },
            pending: self.threads,
        });
    }

    fn on_report(&mut self, report: Report) {
        let Some(flight) = self.in_flight.as_mut() else {
            warn!("[ENGINE] Stray report from worker {}", report.worker);
            return;
        };
        debug!(
            "[ENGINE] Worker {} finished {:?} round after {} stage(s)",
            report.worker, report.regime, report.stages_completed
        );
        if report.regime == Regime::Local && report.stages_completed != self.nu {
            warn!(
                "[ENGINE] Worker {} stopped after {} of {} stages",
                report.worker, report.stages_completed, self.nu
            );
        }
        debug_assert_eq!(
            report.regime == Regime::Local,
            flight.phase == Phase::Local,
            "report does not match the current phase"
        );

        flight.pending -= 1;
        if flight.pending > 0 {
            return;
        }

        // Barrier reached: every worker finished the round, so nothing
        // touches the buffer until the next broadcast.
        if flight.job.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            warn!("[ENGINE] Deadline exceeded, transform aborted");
            self.finish(false);
            return;
        }
        let phase = flight.phase;
        match phase {
            Phase::Distributed { depth } if depth < self.threads => {
                debug!("[ENGINE] Barrier passed at depth {depth}, next strided stage");
                flight.phase = Phase::Distributed { depth: depth * 2 };
                flight.pending = self.threads;
                self.broadcast(|| Command::StridedStage);
            }
            Phase::Distributed { depth } => {
                debug!("[ENGINE] Barrier passed at depth {depth}, switching to local");
                flight.phase = Phase::Local;
                flight.pending = self.threads;
                self.broadcast(|| Command::LocalRemainder);
            }
            Phase::Local => self.finish(true),
        }
    }

    fn broadcast(&self, command: fn() -> Command) {
        for worker in &self.workers {
            worker.send(command());
        }
    }

    /// Releases the buffer back to the caller. Only called once no worker
    /// holds an outstanding command.
    fn finish(&mut self, completed: bool) {
        let Some(flight) = self.in_flight.take() else {
            return;
        };
        let Job {
            mut buffer,
            direction,
            on_complete,
            ..
        } = flight.job;

        let outcome = if completed {
            reorder(&mut buffer, self.nu);
            if direction == Direction::Inverse {
                buffer.scale(1.0 / buffer.len() as f32);
            }
            debug!("[ENGINE] Transform complete");
            Outcome::Completed(buffer)
        } else {
            Outcome::DeadlineExceeded(buffer)
        };

        // Cleared first so the callback may submit the next transform.
        self.busy.store(false, Ordering::Release);
        if panic::catch_unwind(AssertUnwindSafe(|| on_complete(outcome))).is_err() {
            error!("[ENGINE] Completion callback panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn thread_count_rounds_up_to_power_of_two() {
        assert_eq!(resolve_thread_count(10, 0), Ok(2));
        assert_eq!(resolve_thread_count(10, 1), Ok(2));
        assert_eq!(resolve_thread_count(10, 3), Ok(4));
        assert_eq!(resolve_thread_count(10, 8), Ok(8));
        assert_eq!(resolve_thread_count(10, 9), Ok(16));
        assert_eq!(resolve_thread_count(3, 4), Ok(4));
    }

    #[test]
    fn thread_count_must_fit_half_the_size() {
        assert_eq!(
            resolve_thread_count(3, 5),
            Err(EngineError::ThreadCount { requested: 5, max: 4 })
        );
        assert_eq!(
            resolve_thread_count(1, 2),
            Err(EngineError::ThreadCount { requested: 2, max: 1 })
        );
        // No power of two above this fits in a usize.
        assert_eq!(
            resolve_thread_count(10, usize::MAX),
            Err(EngineError::ThreadCount { requested: usize::MAX, max: 512 })
        );
        assert!(matches!(
            Engine::new(10, usize::MAX),
            Err(EngineError::ThreadCount { .. })
        ));
    }

    #[test]
    fn size_must_be_in_range() {
        assert_eq!(resolve_thread_count(0, 2), Err(EngineError::InvalidSize { nu: 0 }));
        assert_eq!(
            resolve_thread_count(MAX_NU + 1, 2),
            Err(EngineError::InvalidSize { nu: MAX_NU + 1 })
        );
    }

    #[test]
    fn reorder_moves_samples_to_bit_reversed_slots() {
        let mut buffer = SampleBuffer::new((0..8).map(|i| i as f32).collect(), vec![0.0; 8]);
        reorder(&mut buffer, 3);
        assert_eq!(buffer.real, vec![0.0, 4.0, 2.0, 6.0, 1.0, 5.0, 3.0, 7.0]);
        reorder(&mut buffer, 3);
        assert_eq!(buffer.real, (0..8).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn rejects_wrong_buffer_length_before_dispatch() {
        let engine = Engine::new(3, 2).unwrap();
        let err = engine
            .submit(SampleBuffer::zeroed(4), |_| panic!("must not run"))
            .unwrap_err();
        assert_eq!(err, EngineError::BufferLength { expected: 8, real: 4, imag: 4 });

        let lopsided = SampleBuffer::new(vec![0.0; 8], vec![0.0; 7]);
        assert!(matches!(
            engine.transform(lopsided),
            Err(EngineError::BufferLength { imag: 7, .. })
        ));
        assert!(!engine.is_busy());
    }

    #[test]
    fn constant_signal_has_only_dc() {
        let engine = Engine::new(3, 2).unwrap();
        let spectrum = engine.transform(SampleBuffer::from_real(vec![1.0; 8])).unwrap();
        assert_abs_diff_eq!(spectrum.real[0], 8.0, epsilon = 1e-6);
        assert_abs_diff_eq!(spectrum.imag[0], 0.0, epsilon = 1e-6);
        for k in 1..8 {
            assert_abs_diff_eq!(spectrum.real[k], 0.0, epsilon = 1e-6);
            assert_abs_diff_eq!(spectrum.imag[k], 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn impulse_has_flat_spectrum() {
        let engine = Engine::new(3, 2).unwrap();
        let mut real = vec![0.0; 8];
        real[0] = 1.0;
        let spectrum = engine.transform(SampleBuffer::from_real(real)).unwrap();
        for k in 0..8 {
            assert_abs_diff_eq!(spectrum.real[k], 1.0, epsilon = 1e-6);
            assert_abs_diff_eq!(spectrum.imag[k], 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn engine_is_idle_again_after_callback() {
        let engine = Engine::new(4, 2).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let submission = engine
            .submit(SampleBuffer::from_real(vec![1.0; 16]), move |spectrum| {
                tx.send(spectrum).unwrap();
            })
            .unwrap();
        assert!(submission.is_accepted());
        let spectrum = rx.recv().unwrap();
        assert_abs_diff_eq!(spectrum.real[0], 16.0, epsilon = 1e-5);
        assert!(!engine.is_busy());
    }

    #[test]
    fn expired_deadline_aborts_and_frees_the_engine() {
        let engine = Engine::new(6, 2).unwrap();
        let past = Instant::now() - Duration::from_millis(10);
        let result = engine.transform_with(
            SampleBuffer::from_real(vec![1.0; 64]),
            TransformOptions::default().with_deadline(past),
        );
        assert_eq!(result, Err(EngineError::DeadlineExceeded));
        assert!(!engine.is_busy());

        // The next request runs normally.
        let spectrum = engine.transform(SampleBuffer::from_real(vec![1.0; 64])).unwrap();
        assert_abs_diff_eq!(spectrum.real[0], 64.0, epsilon = 1e-4);
    }

    #[test]
    fn deadline_passing_mid_transform_stops_at_the_next_barrier() {
        let engine = Engine::new(12, 2).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let options = TransformOptions::default().with_timeout(Duration::from_micros(1));
        let submission = engine
            .submit_with(SampleBuffer::from_real(vec![1.0; 4096]), options, move |outcome| {
                tx.send(outcome).unwrap();
            })
            .unwrap();
        assert!(submission.is_accepted());

        let outcome = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(!outcome.is_completed());
        // Aborted after the first strided stage: no reorder, one stage applied.
        let partial = outcome.into_buffer();
        assert!(partial.real[..2048].iter().all(|&x| x == 2.0));
        assert!(partial.real[2048..].iter().all(|&x| x == 0.0));
        assert!(!engine.is_busy());

        let options = TransformOptions::default().with_timeout(Duration::from_secs(60));
        let spectrum = engine
            .transform_with(SampleBuffer::from_real(vec![1.0; 4096]), options)
            .unwrap();
        assert_abs_diff_eq!(spectrum.real[0], 4096.0, epsilon = 1e-2);
    }

    #[test]
    fn unfinished_local_round_still_releases_the_buffer() {
        // A worker whose pass panicked reports fewer stages than expected.
        let busy = Arc::new(AtomicBool::new(true));
        let mut coordinator = Coordinator {
            nu: 3,
            threads: 2,
            busy: busy.clone(),
            workers: Vec::new(),
            in_flight: None,
        };
        let (tx, rx) = crossbeam_channel::bounded(1);
        coordinator.in_flight = Some(InFlight {
            job: Job {
                buffer: SampleBuffer::zeroed(8),
                direction: Direction::Forward,
                deadline: None,
                on_complete: Box::new(move |outcome| tx.send(outcome).unwrap()),
            },
            phase: Phase::Local,
            pending: 2,
        });

        coordinator.on_report(Report { worker: 0, regime: Regime::Local, stages_completed: 3 });
        assert!(rx.try_recv().is_err());
        coordinator.on_report(Report { worker: 1, regime: Regime::Local, stages_completed: 1 });

        assert!(rx.try_recv().unwrap().is_completed());
        assert!(coordinator.in_flight.is_none());
        assert!(!busy.load(Ordering::Acquire));
    }

    #[test]
    fn engine_dropped_from_its_own_callback_winds_down() {
        let engine = Arc::new(Engine::new(4, 2).unwrap());
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let owned = engine.clone();
        engine
            .submit(SampleBuffer::from_real(vec![1.0; 16]), move |spectrum| {
                gate_rx.recv().unwrap();
                // Last reference: the engine is dropped on the coordinator thread.
                drop(owned);
                done_tx.send(spectrum).unwrap();
            })
            .unwrap();
        drop(engine);
        gate_tx.send(()).unwrap();

        let spectrum = done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_abs_diff_eq!(spectrum.real[0], 16.0, epsilon = 1e-5);
    }

    #[test]
    fn panicking_callback_does_not_wedge_the_engine() {
        let engine = Engine::new(3, 2).unwrap();
        let (tx, rx) = crossbeam_channel::bounded::<()>(1);
        engine
            .submit(SampleBuffer::zeroed(8), move |_| {
                drop(tx);
                panic!("callback failure");
            })
            .unwrap();
        // Sender dropped inside the callback.
        assert!(rx.recv().is_err());
        assert!(engine.transform(SampleBuffer::zeroed(8)).is_ok());
    }

    #[test]
    fn shutdown_joins_idle_pool() {
        let engine = Engine::new(5, 4).unwrap();
        assert_eq!(engine.threads(), 4);
        assert_eq!(engine.len(), 32);
        engine.shutdown();
    }
}
