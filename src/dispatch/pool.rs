//! Fixed-size worker pool for handler callbacks.
//!
//! # Responsibilities
//! - Run submitted jobs on named OS threads fed by one unbounded queue
//! - Stop accepting jobs on shutdown while letting queued ones finish
//! - Optionally watch for jobs that wait or run too long
//!
//! # Design Decisions
//! - Workers share a `crossbeam` receiver; the queue closes when the
//!   last sender is dropped, which is how shutdown reaches the workers
//! - A panicking job is caught so the worker keeps serving the queue
//! - The watchdog only reports; it never cancels a job

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use thiserror::Error;

use crate::observability::metrics;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Task {
    id: u64,
    job: Job,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    ShutDown,

    #[error("worker pool needs at least one thread")]
    NoWorkers,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy)]
struct TaskStamp {
    enqueued_at: Instant,
    started_at: Option<Instant>,
    flagged: bool,
}

/// State shared between the pool handle, its workers and the watchdog.
#[derive(Default)]
struct Monitor {
    /// Only populated while a watchdog is running.
    stamps: DashMap<u64, TaskStamp>,
    stuck: AtomicU64,
    enabled: bool,
}

impl Monitor {
    fn enqueued(&self, id: u64) {
        if self.enabled {
            self.stamps.insert(
                id,
                TaskStamp {
                    enqueued_at: Instant::now(),
                    started_at: None,
                    flagged: false,
                },
            );
        }
    }

    fn started(&self, id: u64) {
        if let Some(mut stamp) = self.stamps.get_mut(&id) {
            stamp.started_at = Some(Instant::now());
        }
    }

    fn finished(&self, id: u64) {
        self.stamps.remove(&id);
    }

    fn scan(&self, threshold: Duration) {
        for mut entry in self.stamps.iter_mut() {
            let id = *entry.key();
            let stamp = entry.value_mut();
            if stamp.flagged {
                continue;
            }
            let (phase, elapsed) = match stamp.started_at {
                Some(started) => ("running", started.elapsed()),
                None => ("waiting", stamp.enqueued_at.elapsed()),
            };
            if elapsed > threshold {
                stamp.flagged = true;
                self.stuck.fetch_add(1, Ordering::Relaxed);
                metrics::record_stuck_task();
                tracing::warn!(
                    task = id,
                    phase,
                    elapsed_ms = elapsed.as_millis() as u64,
                    threshold_ms = threshold.as_millis() as u64,
                    "Dispatch task exceeded time threshold"
                );
            }
        }
    }
}

/// A pool of named worker threads.
pub struct WorkerPool {
    name: String,
    size: usize,
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    watchdog: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
    monitor: Arc<Monitor>,
    next_id: AtomicU64,
}

impl WorkerPool {
    /// Start `size` workers named `<thread_name>-<i>`.
    ///
    /// A non-zero `stuck_task_timeout` also starts the watchdog thread.
    pub fn new(size: usize, thread_name: &str, stuck_task_timeout: Duration) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::NoWorkers);
        }

        let monitor = Arc::new(Monitor {
            enabled: !stuck_task_timeout.is_zero(),
            ..Monitor::default()
        });
        let (sender, receiver) = channel::unbounded::<Task>();

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = receiver.clone();
            let monitor = Arc::clone(&monitor);
            let handle = thread::Builder::new()
                .name(format!("{thread_name}-{index}"))
                .spawn(move || worker_loop(receiver, monitor))?;
            workers.push(handle);
        }

        let watchdog = if monitor.enabled {
            let (stop_tx, stop_rx) = channel::bounded::<()>(1);
            let watched = Arc::clone(&monitor);
            let handle = thread::Builder::new()
                .name(format!("{thread_name}-watchdog"))
                .spawn(move || watchdog_loop(stop_rx, watched, stuck_task_timeout))?;
            Some((stop_tx, handle))
        } else {
            None
        };

        tracing::info!(
            threads = size,
            name = thread_name,
            watchdog = monitor.enabled,
            "Worker pool started"
        );

        Ok(Self {
            name: thread_name.to_string(),
            size,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            watchdog: Mutex::new(watchdog),
            monitor,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job. Fails once the pool has been shut down.
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = lock(&self.sender);
        let sender = sender.as_ref().ok_or(PoolError::ShutDown)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.monitor.enqueued(id);
        sender
            .send(Task {
                id,
                job: Box::new(job),
            })
            .map_err(|_| {
                self.monitor.finished(id);
                PoolError::ShutDown
            })
    }

    /// Stop accepting jobs. Queued and running jobs still complete.
    pub fn shutdown(&self) {
        if lock(&self.sender).take().is_some() {
            tracing::info!(name = %self.name, "Worker pool shutting down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// Shut down and wait for every worker and the watchdog to exit.
    pub fn join(&self) {
        self.shutdown();
        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!(name = %self.name, "Worker thread terminated abnormally");
            }
        }
        if let Some((stop, handle)) = lock(&self.watchdog).take() {
            drop(stop);
            let _ = handle.join();
        }
        tracing::info!(name = %self.name, "Worker pool stopped");
    }

    /// Jobs the watchdog has flagged so far.
    pub fn stuck_tasks(&self) -> u64 {
        self.monitor.stuck.load(Ordering::Relaxed)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        if let Some((stop, _)) = lock(&self.watchdog).take() {
            drop(stop);
        }
    }
}

fn worker_loop(receiver: Receiver<Task>, monitor: Arc<Monitor>) {
    while let Ok(task) = receiver.recv() {
        monitor.started(task.id);
        if catch_unwind(AssertUnwindSafe(task.job)).is_err() {
            tracing::error!(task = task.id, "Worker job panicked");
        }
        monitor.finished(task.id);
    }
    tracing::trace!(thread = thread::current().name().unwrap_or("worker"), "Worker exiting");
}

fn watchdog_loop(stop: Receiver<()>, monitor: Arc<Monitor>, threshold: Duration) {
    let interval = (threshold / 4).clamp(Duration::from_millis(10), Duration::from_secs(1));
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => monitor.scan(threshold),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
