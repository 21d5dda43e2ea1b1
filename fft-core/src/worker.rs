//! # Butterfly Worker Module
//!
//! Each worker is a dedicated thread behind a command channel. It executes
//! butterfly stages on the shared sample buffer when told to, and sends one
//! report back to the coordinator per command.
//!
//! ## Regimes
//! - **Strided**: one stage; butterflies are dealt round-robin over all
//!   workers, so several workers share each butterfly group.
//! - **Local**: every remaining stage, confined to the worker's own
//!   contiguous block of `N / threads` samples.

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::buffer::SharedSamples;
use crate::engine::Direction;
use crate::error::{EngineError, Result};
use crate::twiddle::{TwiddleTable, bit_reverse};

/// Messages from the coordinator to a worker.
#[derive(Debug)]
pub(crate) enum Command {
    /// Attach a new buffer and reset the stage counters. Not reported.
    Begin {
        samples: SharedSamples,
        direction: Direction,
    },
    /// Run exactly one stage in strided assignment.
    StridedStage,
    /// Run all remaining stages on the worker's own block.
    LocalRemainder,
}

/// Which command a report acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Regime {
    Strided,
    Local,
}

/// Completion notice sent once per executed command.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Report {
    pub worker: usize,
    pub regime: Regime,
    pub stages_completed: u32,
}

/// Coordinator-side handle. Dropping it closes the command channel and
/// joins the thread.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    id: usize,
    commands: Option<Sender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn spawn(
        id: usize,
        threads: usize,
        table: Arc<TwiddleTable>,
        reports: Sender<Report>,
    ) -> Result<Self> {
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
        let worker = Worker::new(id, threads, table, reports);
        let thread = thread::Builder::new()
            .name(format!("fft-worker-{id}"))
            .spawn(move || worker.run(commands_rx))
            .map_err(|e| EngineError::Spawn(e.to_string()))?;

        Ok(Self {
            id,
            commands: Some(commands_tx),
            thread: Some(thread),
        })
    }

    pub(crate) fn send(&self, command: Command) {
        let delivered = self
            .commands
            .as_ref()
            .is_some_and(|tx| tx.send(command).is_ok());
        if !delivered {
            error!("[ENGINE] Worker {} is gone, command dropped", self.id);
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.commands.take();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("[ENGINE] Worker {} terminated abnormally", self.id);
            }
        }
    }
}

/// Per-thread state. `nu1` and `n2` describe the stage about to run:
/// butterflies pair index `k` with `k + n2`, where `n2 = 2^nu1`.
struct Worker {
    id: usize,
    threads: usize,
    nu: u32,
    nu1: u32,
    n2: usize,
    stages_completed: u32,
    sign: f32,
    samples: Option<SharedSamples>,
    table: Arc<TwiddleTable>,
    reports: Sender<Report>,
}

impl Worker {
    fn new(id: usize, threads: usize, table: Arc<TwiddleTable>, reports: Sender<Report>) -> Self {
        let nu = table.nu();
        Self {
            id,
            threads,
            nu,
            nu1: nu - 1,
            n2: 1 << (nu - 1),
            stages_completed: 0,
            sign: 1.0,
            samples: None,
            table,
            reports,
        }
    }

    fn run(mut self, commands: Receiver<Command>) {
        debug!("[WORKER {}] Started", self.id);
        for command in commands.iter() {
            let regime = match command {
                Command::Begin { samples, direction } => {
                    self.begin(samples, direction);
                    continue;
                }
                Command::StridedStage => Regime::Strided,
                Command::LocalRemainder => Regime::Local,
            };

            // A panic here would leave the coordinator waiting forever, so it
            // is contained and the round is still acknowledged.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| match regime {
                Regime::Strided => self.strided_stage(),
                Regime::Local => self.local_remainder(),
            }));
            if outcome.is_err() {
                error!("[WORKER {}] Butterfly pass panicked", self.id);
            }

            let report = Report {
                worker: self.id,
                regime,
                stages_completed: self.stages_completed,
            };
            if self.reports.send(report).is_err() {
                break;
            }
        }
        debug!("[WORKER {}] Command channel closed, exiting", self.id);
    }

    fn begin(&mut self, samples: SharedSamples, direction: Direction) {
        self.nu1 = self.nu - 1;
        self.n2 = 1 << self.nu1;
        self.stages_completed = 0;
        self.sign = direction.twiddle_sign();
        self.samples = Some(samples);
    }

    /// One stage. Butterfly `j` of the `N/2` in this stage belongs to worker
    /// `j mod threads`; its group is `j / n2` and its offset in the group is
    /// `j mod n2`.
    fn strided_stage(&mut self) {
        let Some(samples) = self.samples else {
            error!("[WORKER {}] Strided stage without a buffer", self.id);
            return;
        };
        let half = samples.len() / 2;
        let mask = self.n2 - 1;
        for j in (self.id..half).step_by(self.threads) {
            let k = ((j >> self.nu1) << (self.nu1 + 1)) | (j & mask);
            self.butterfly(&samples, k);
        }
        self.advance();
    }

    /// All stages left, restricted to `[id·2·n2, (id+1)·2·n2)`.
    fn local_remainder(&mut self) {
        let Some(samples) = self.samples else {
            error!("[WORKER {}] Local remainder without a buffer", self.id);
            return;
        };
        let block = self.n2 << 1;
        let start = self.id * block;
        let end = start + block;
        while self.stages_completed < self.nu {
            let mut group = start;
            while group < end {
                for k in group..group + self.n2 {
                    self.butterfly(&samples, k);
                }
                group += self.n2 << 1;
            }
            self.advance();
        }
    }

    #[inline]
    fn butterfly(&self, samples: &SharedSamples, k: usize) {
        let arg = bit_reverse(k >> self.nu1, self.nu);
        let (c, s) = self.table.get(arg);
        // SAFETY: k and k + n2 are in bounds by construction of both regimes,
        // and each pair is visited by exactly one worker per round.
        unsafe { samples.butterfly(k, k + self.n2, c, s * self.sign) };
    }

    fn advance(&mut self) {
        self.nu1 = self.nu1.saturating_sub(1);
        self.n2 >>= 1;
        self.stages_completed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SampleBuffer;
    use approx::assert_abs_diff_eq;

    fn spawn_pool(nu: u32, threads: usize) -> (Vec<WorkerHandle>, Receiver<Report>) {
        let table = Arc::new(TwiddleTable::new(nu));
        let (tx, rx) = crossbeam_channel::unbounded();
        let workers = (0..threads)
            .map(|id| WorkerHandle::spawn(id, threads, table.clone(), tx.clone()).unwrap())
            .collect();
        (workers, rx)
    }

    fn round(
        workers: &[WorkerHandle],
        reports: &Receiver<Report>,
        command: fn() -> Command,
    ) -> Vec<Report> {
        for worker in workers {
            worker.send(command());
        }
        (0..workers.len()).map(|_| reports.recv().unwrap()).collect()
    }

    #[test]
    fn each_command_is_reported_once() {
        let (workers, reports) = spawn_pool(4, 2);
        let mut buffer = SampleBuffer::from_real(vec![1.0; 16]);
        let view = buffer.shared_view();
        for worker in &workers {
            worker.send(Command::Begin { samples: view, direction: Direction::Forward });
        }

        let first = round(&workers, &reports, || Command::StridedStage);
        assert!(first.iter().all(|r| r.regime == Regime::Strided && r.stages_completed == 1));

        let rest = round(&workers, &reports, || Command::LocalRemainder);
        assert!(rest.iter().all(|r| r.regime == Regime::Local && r.stages_completed == 4));
        let mut ids: Vec<_> = rest.iter().map(|r| r.worker).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1]);
        assert!(reports.try_recv().is_err());

        drop(workers);
        // Constant input: everything lands in bin 0, which is its own reversal.
        assert_abs_diff_eq!(buffer.real[0], 16.0, epsilon = 1e-5);
        for k in 1..16 {
            assert_abs_diff_eq!(buffer.real[k], 0.0, epsilon = 1e-5);
            assert_abs_diff_eq!(buffer.imag[k], 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn strided_stage_visits_every_butterfly_once() {
        // After stage 1 with constant input, the upper half becomes zero and
        // the lower half doubles, no matter how the work is dealt out.
        for threads in [2, 4, 8] {
            let (workers, reports) = spawn_pool(5, threads);
            let mut buffer = SampleBuffer::from_real(vec![1.0; 32]);
            let view = buffer.shared_view();
            for worker in &workers {
                worker.send(Command::Begin { samples: view, direction: Direction::Forward });
            }
            round(&workers, &reports, || Command::StridedStage);
            drop(workers);

            assert!(buffer.real[..16].iter().all(|&x| x == 2.0), "threads={threads}");
            assert!(buffer.real[16..].iter().all(|&x| x == 0.0), "threads={threads}");
        }
    }

    #[test]
    fn dropping_handles_joins_idle_workers() {
        let (workers, reports) = spawn_pool(3, 4);
        drop(workers);
        assert!(reports.recv().is_err());
    }
}
