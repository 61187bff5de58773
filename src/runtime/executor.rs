//! Fixed-size worker pool for pooled item processing.
//!
//! Tasks go through a `crossbeam` channel: unbounded, or bounded at twice
//! the pool size. A full bounded queue is offered the task until the offer
//! timeout runs out or the stream halts; a task that still does not fit is
//! handed back to the caller as rejected.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender};
use tracing::{debug, error, warn};

use crate::runtime::context::CancellationToken;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

const DEFAULT_THREAD_NAME: &str = "StreamDefaultExecutorThread";
const BOUNDED_THREAD_NAME: &str = "StreamBoundedExecutorThread";

/// Longest single wait on a full queue before checking for a halt.
const OFFER_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    pub threads: usize,
    pub bounded: bool,
    pub offer_timeout: Duration,
    pub termination_timeout: Duration,
}

impl ExecutorConfig {
    pub fn queue_capacity(&self) -> Option<usize> {
        self.bounded.then(|| self.threads.max(1) * 2)
    }
}

pub struct WorkerPool {
    config: ExecutorConfig,
    sender: Option<Sender<Task>>,
    receiver: Receiver<Task>,
    workers: Vec<JoinHandle<()>>,
    abort: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn the worker threads.
    pub fn start(config: ExecutorConfig) -> io::Result<Self> {
        let (sender, receiver) = match config.queue_capacity() {
            Some(capacity) => channel::bounded::<Task>(capacity),
            None => channel::unbounded::<Task>(),
        };
        let base_name = if config.bounded {
            BOUNDED_THREAD_NAME
        } else {
            DEFAULT_THREAD_NAME
        };

        let abort = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(config.threads);
        for n in 1..=config.threads.max(1) {
            let rx = receiver.clone();
            let abort = Arc::clone(&abort);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", base_name, n))
                .spawn(move || worker_loop(rx, abort))?;
            workers.push(handle);
        }
        debug!(
            "Started {} worker thread(s), queue capacity {:?}",
            workers.len(),
            config.queue_capacity()
        );

        Ok(Self {
            config,
            sender: Some(sender),
            receiver,
            workers,
            abort,
        })
    }

    /// Queue a task.
    ///
    /// # Errors
    /// The task itself when the pool is shut down, when `token` is
    /// cancelled while waiting, or when a bounded queue stayed full for the
    /// whole offer timeout
    pub fn submit(&self, task: Task, token: &CancellationToken) -> Result<(), Task> {
        let Some(sender) = &self.sender else {
            return Err(task);
        };
        if !self.config.bounded {
            return sender.send(task).map_err(|e| e.into_inner());
        }

        let deadline = Instant::now() + self.config.offer_timeout;
        let mut task = task;
        loop {
            let slice = deadline.saturating_duration_since(Instant::now()).min(OFFER_SLICE);
            match sender.send_timeout(task, slice) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Disconnected(t)) => return Err(t),
                Err(SendTimeoutError::Timeout(t)) => {
                    if token.is_cancelled() || Instant::now() >= deadline {
                        return Err(t);
                    }
                    task = t;
                }
            }
        }
    }

    /// Tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    /// Stop accepting tasks and wait up to the termination timeout for the
    /// queue to drain. Workers still busy after that are abandoned.
    ///
    /// # Returns
    /// Number of queued tasks that never ran
    pub fn shutdown(mut self) -> usize {
        self.sender.take();
        let deadline = Instant::now() + self.config.termination_timeout;
        while self.workers.iter().any(|w| !w.is_finished()) {
            if Instant::now() >= deadline {
                return self.abort_now();
            }
            thread::sleep(Duration::from_millis(10));
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }
        0
    }

    /// Stop immediately: running tasks finish, queued tasks are discarded.
    ///
    /// # Returns
    /// Number of queued tasks that never ran
    pub fn shutdown_now(mut self) -> usize {
        self.sender.take();
        self.abort_now()
    }

    fn abort_now(&mut self) -> usize {
        self.abort.store(true, Ordering::SeqCst);
        let dropped = self.receiver.try_iter().count();
        if dropped > 0 {
            warn!("Executor shut down with {} queued task(s) not run", dropped);
        }
        // busy workers exit after their current task
        self.workers.clear();
        dropped
    }
}

fn worker_loop(rx: Receiver<Task>, abort: Arc<AtomicBool>) {
    while !abort.load(Ordering::SeqCst) {
        let Ok(task) = rx.recv() else {
            break;
        };
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("Stream task panicked");
        }
    }
}
