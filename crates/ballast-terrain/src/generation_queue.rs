//! Bounded worker pool for collision mesh generation.
//!
//! Jobs wait in a bounded channel; a second limit caps how many jobs
//! *execute* at once. A worker takes an in-flight permit immediately before
//! running a job and the permit is returned when its guard drops, whether the
//! job finished, panicked, or was skipped as cancelled.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use thiserror::Error;
use tracing::{debug, error, warn};

use ballast_config::GenerationConfig;

/// Errors surfaced by the generation queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// The pending-job channel is at capacity.
    #[error("generation queue is full")]
    QueueFull,
    /// The queue has shut down.
    #[error("generation queue is closed")]
    Closed,
    /// The job was cancelled before it ran.
    #[error("generation job was cancelled")]
    Cancelled,
    /// The job panicked on its worker.
    #[error("generation job panicked on worker")]
    WorkerPanicked,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Counting semaphore built from a pre-filled token channel.
#[derive(Clone)]
struct InFlightLimiter {
    give: Sender<()>,
    take: Receiver<()>,
}

impl InFlightLimiter {
    fn new(permits: usize) -> Self {
        let (give, take) = bounded(permits);
        for _ in 0..permits {
            let _ = give.send(());
        }
        Self { give, take }
    }

    fn acquire(&self) -> Option<Permit<'_>> {
        self.take.recv().ok().map(|()| Permit { limiter: self })
    }
}

struct Permit<'a> {
    limiter: &'a InFlightLimiter,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.limiter.give.send(());
    }
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    running: AtomicU64,
    peak_running: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time queue counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueMetrics {
    /// Jobs accepted by [`GenerationQueue::submit`].
    pub submitted: u64,
    /// Jobs executing right now.
    pub running: u64,
    /// Highest observed value of `running`.
    pub peak_running: u64,
    /// Jobs that ran to completion.
    pub completed: u64,
    /// Jobs skipped because they were cancelled before starting.
    pub cancelled: u64,
    /// Jobs that panicked.
    pub failed: u64,
}

/// Handle to a submitted job's eventual result.
pub struct GenerationTicket<T> {
    cancelled: Arc<AtomicBool>,
    result: Receiver<Result<T, GenerationError>>,
}

impl<T> GenerationTicket<T> {
    /// Requests cancellation. A job that already started runs to completion.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Shared cancellation flag, for callers that outlive the ticket.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Takes the result if the job has finished.
    pub fn try_take(&self) -> Option<Result<T, GenerationError>> {
        self.result.try_recv().ok()
    }

    /// Blocks up to `timeout` for the result.
    pub fn wait(&self, timeout: Duration) -> Option<Result<T, GenerationError>> {
        self.result.recv_timeout(timeout).ok()
    }
}

/// Fixed-size worker pool with an independent in-flight limit.
pub struct GenerationQueue {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    limiter: InFlightLimiter,
    counters: Arc<Counters>,
    max_in_flight: usize,
}

impl GenerationQueue {
    /// Spawns `worker_threads` workers.
    ///
    /// - `max_in_flight`: jobs allowed to execute concurrently.
    /// - `queue_capacity`: jobs allowed to wait; further submissions fail
    ///   with [`GenerationError::QueueFull`].
    pub fn new(worker_threads: usize, max_in_flight: usize, queue_capacity: usize) -> Self {
        let worker_threads = worker_threads.max(1);
        let max_in_flight = max_in_flight.max(1);
        let (sender, receiver) = bounded::<Job>(queue_capacity.max(1));
        let limiter = InFlightLimiter::new(max_in_flight);
        let counters = Arc::new(Counters::default());

        let mut workers = Vec::with_capacity(worker_threads);
        for n in 0..worker_threads {
            let receiver = receiver.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("ballast-terrain-worker-{n}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => error!("failed to spawn terrain worker {n}: {e}"),
            }
        }
        debug!(
            workers = workers.len(),
            max_in_flight, queue_capacity, "generation queue started"
        );

        Self {
            sender: Some(sender),
            workers,
            limiter,
            counters,
            max_in_flight,
        }
    }

    /// Builds a queue from configuration; `worker_threads == 0` picks a count
    /// from the number of CPUs, leaving headroom for the physics and host threads.
    pub fn from_config(config: &GenerationConfig) -> Self {
        let threads = if config.worker_threads == 0 {
            default_worker_count()
        } else {
            config.worker_threads
        };
        Self::new(threads, config.max_in_flight, config.queue_capacity)
    }

    /// Queue sized from the CPU count with a small in-flight limit.
    pub fn with_defaults() -> Self {
        Self::new(default_worker_count(), 4, 256)
    }

    /// Submits a job. The returned ticket yields the job's output.
    pub fn submit<T, F>(&self, job: F) -> Result<GenerationTicket<T>, GenerationError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_with_cancel(Arc::new(AtomicBool::new(false)), job)
    }

    /// Submits a job that observes an existing cancellation flag.
    pub fn submit_with_cancel<T, F>(
        &self,
        cancelled: Arc<AtomicBool>,
        job: F,
    ) -> Result<GenerationTicket<T>, GenerationError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(GenerationError::Closed)?;
        let (result_tx, result_rx) = bounded(1);

        let flag = Arc::clone(&cancelled);
        let limiter = self.limiter.clone();
        let counters = Arc::clone(&self.counters);
        let wrapped: Job = Box::new(move || {
            if flag.load(Ordering::Relaxed) {
                counters.cancelled.fetch_add(1, Ordering::Relaxed);
                let _ = result_tx.send(Err(GenerationError::Cancelled));
                return;
            }
            let Some(_permit) = limiter.acquire() else {
                let _ = result_tx.send(Err(GenerationError::Closed));
                return;
            };
            if flag.load(Ordering::Relaxed) {
                counters.cancelled.fetch_add(1, Ordering::Relaxed);
                let _ = result_tx.send(Err(GenerationError::Cancelled));
                return;
            }

            let now = counters.running.fetch_add(1, Ordering::SeqCst) + 1;
            counters.peak_running.fetch_max(now, Ordering::SeqCst);
            let outcome = catch_unwind(AssertUnwindSafe(job));
            counters.running.fetch_sub(1, Ordering::SeqCst);

            let result = match outcome {
                Ok(value) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                    Ok(value)
                }
                Err(_) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("generation job panicked");
                    Err(GenerationError::WorkerPanicked)
                }
            };
            let _ = result_tx.send(result);
        });

        match sender.try_send(wrapped) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(GenerationTicket {
                    cancelled,
                    result: result_rx,
                })
            }
            Err(TrySendError::Full(_)) => Err(GenerationError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(GenerationError::Closed),
        }
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map_or(0, Sender::len)
    }

    /// Configured in-flight limit.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Number of live worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Current counters.
    pub fn metrics(&self) -> QueueMetrics {
        let c = &self.counters;
        QueueMetrics {
            submitted: c.submitted.load(Ordering::Relaxed),
            running: c.running.load(Ordering::SeqCst),
            peak_running: c.peak_running.load(Ordering::SeqCst),
            completed: c.completed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting jobs, lets queued jobs drain, and joins the workers.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("terrain worker exited by panic");
            }
        }
    }
}

impl Drop for GenerationQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn default_worker_count() -> usize {
    let cpus = num_cpus::get().max(2);
    (cpus - 2).max(1)
}
