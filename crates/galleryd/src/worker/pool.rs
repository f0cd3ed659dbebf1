use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info, warn};

use super::task::{Dispatcher, DownloadTask, TaskOutcome, TaskReport};
use crate::engine::RunError;
use crate::error::WorkerError;

/// Executes one task attempt. Implemented by the job runner.
pub trait TaskHandler: Send + Sync {
    /// Returns how many files the attempt produced.
    fn handle(&self, task: &DownloadTask) -> Result<usize, RunError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub worker_count: usize,
    /// Attempts per task before it is dead-lettered.
    pub max_attempts: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            max_attempts: 1,
        }
    }
}

/// Reports kept for a caller that is not reading them.
const REPORT_BUFFER_PER_WORKER: usize = 64;

/// Fixed set of OS threads pulling [`DownloadTask`]s off a queue.
pub struct WorkerPool {
    task_sender: Mutex<Option<Sender<DownloadTask>>>,
    report_receiver: Receiver<TaskReport>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    pub fn new(handler: Arc<dyn TaskHandler>, config: PoolConfig) -> Result<Self, WorkerError> {
        if config.worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }
        let max_attempts = config.max_attempts.max(1);

        let (task_sender, task_receiver) = unbounded::<DownloadTask>();
        let (report_sender, report_receiver) =
            bounded::<TaskReport>(config.worker_count * REPORT_BUFFER_PER_WORKER);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.worker_count);

        for worker_id in 0..config.worker_count {
            let task_rx = task_receiver.clone();
            let report_tx = report_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_handler = Arc::clone(&handler);

            let handle = thread::Builder::new()
                .name(format!("galleryd-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        task_rx,
                        report_tx,
                        shutdown_flag,
                        worker_handler,
                        max_attempts,
                    );
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", config.worker_count);

        Ok(Self {
            task_sender: Mutex::new(Some(task_sender)),
            report_receiver,
            workers: Mutex::new(workers),
            shutdown,
        })
    }

    pub fn submit(&self, task: DownloadTask) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ShuttingDown);
        }

        let sender = self
            .task_sender
            .lock()
            .map_err(|_| WorkerError::ChannelClosed)?;
        match sender.as_ref() {
            Some(sender) => sender.send(task).map_err(|_| WorkerError::ChannelClosed),
            None => Err(WorkerError::ShuttingDown),
        }
    }

    pub fn try_recv_report(&self) -> Option<TaskReport> {
        self.report_receiver.try_recv().ok()
    }

    pub fn recv_report_timeout(&self, timeout: Duration) -> Option<TaskReport> {
        self.report_receiver.recv_timeout(timeout).ok()
    }

    /// Stops workers after their current task. Queued tasks are abandoned.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Closes the queue and joins every worker. Without a prior
    /// [`shutdown`](Self::shutdown), workers drain the queue first.
    pub fn wait(&self) {
        if let Ok(mut sender) = self.task_sender.lock() {
            sender.take();
        }

        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };

        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

impl Dispatcher for WorkerPool {
    fn enqueue(&self, task: DownloadTask) -> Result<(), WorkerError> {
        debug!("Enqueueing download {}", task.download_id);
        self.submit(task)
    }
}

fn run_worker(
    worker_id: usize,
    task_receiver: Receiver<DownloadTask>,
    report_sender: Sender<TaskReport>,
    shutdown: Arc<AtomicBool>,
    handler: Arc<dyn TaskHandler>,
    max_attempts: u32,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match task_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(task) => run_task(worker_id, task, &report_sender, &handler, max_attempts, &shutdown),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} task channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Runs every attempt of `task` on this worker.
fn run_task(
    worker_id: usize,
    mut task: DownloadTask,
    report_sender: &Sender<TaskReport>,
    handler: &Arc<dyn TaskHandler>,
    max_attempts: u32,
    shutdown: &AtomicBool,
) {
    loop {
        debug!(
            "Worker {} running download {} (attempt {}/{})",
            worker_id, task.download_id, task.attempt, max_attempts
        );

        let outcome = match handler.handle(&task) {
            Ok(files) => TaskOutcome::Succeeded { files },
            Err(e) => TaskOutcome::Failed {
                reason: e.to_string(),
                will_retry: !e.is_abandoned()
                    && task.attempt < max_attempts
                    && !shutdown.load(Ordering::Relaxed),
            },
        };

        let retry = matches!(outcome, TaskOutcome::Failed { will_retry: true, .. });
        if let TaskOutcome::Failed { reason, will_retry: false } = &outcome {
            error!(
                "Download {} dead-lettered after {} attempt(s): {}",
                task.download_id, task.attempt, reason
            );
        }

        let report = TaskReport {
            download_id: task.download_id,
            attempt: task.attempt,
            outcome,
        };
        match report_sender.try_send(report) {
            Ok(()) => {}
            Err(TrySendError::Full(report)) => {
                debug!("Report buffer full, dropping report for {}", report.download_id)
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Worker {} report channel closed", worker_id)
            }
        }

        if !retry {
            break;
        }
        task = task.next_attempt();
    }
}
