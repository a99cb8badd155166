use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::error::QueueError;
use crate::queue::job::{Deadline, JobId, JobRecord};
use crate::queue::scheduler::{DelayedTask, Scheduler, SchedulerThread, TaskId};
use crate::queue::store::{JobEvent, JobStore};

/// Everything a running job may need from the queue.
pub struct JobContext {
    pub id: JobId,
    pub deadline: Deadline,
    pub scheduler: Scheduler,
}

/// Executes one kind of job. A returned `Ok` value becomes the job's result.
pub trait JobHandler: Send + Sync + 'static {
    type Spec: Send + 'static;
    type Error: Display;

    fn handle(&self, ctx: &JobContext, spec: Self::Spec) -> Result<String, Self::Error>;
}

struct QueuedJob<S> {
    id: JobId,
    timeout: Duration,
    spec: S,
}

pub struct JobQueue<H: JobHandler> {
    job_sender: Sender<QueuedJob<H::Spec>>,
    job_receiver: Receiver<QueuedJob<H::Spec>>,
    store: Arc<JobStore>,
    scheduler: Scheduler,
    scheduler_thread: SchedulerThread,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl<H: JobHandler> JobQueue<H> {
    /// Starts the scheduler thread and `worker_count` worker threads.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn start(handler: Arc<H>, worker_count: usize) -> Result<Self, QueueError> {
        assert!(worker_count > 0, "worker_count must be > 0");
        let store = Arc::new(JobStore::default());
        let (scheduler, scheduler_thread) = Scheduler::start(Arc::clone(&store))?;
        let (job_sender, job_receiver) = unbounded::<QueuedJob<H::Spec>>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_handler = Arc::clone(&handler);
            let worker_store = Arc::clone(&store);
            let worker_scheduler = scheduler.clone();

            let handle = thread::Builder::new()
                .name(format!("docpress-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        job_rx,
                        shutdown_flag,
                        worker_handler,
                        worker_store,
                        worker_scheduler,
                    );
                })
                .map_err(|e| QueueError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender,
            job_receiver,
            store,
            scheduler,
            scheduler_thread,
            workers,
            shutdown,
        })
    }

    pub fn enqueue(&self, spec: H::Spec, timeout: Duration) -> Result<JobId, QueueError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(QueueError::ChannelClosed);
        }

        let id = JobId::new();
        self.store.insert_queued(id.clone(), timeout);

        let job = QueuedJob {
            id: id.clone(),
            timeout,
            spec,
        };
        if self.job_sender.send(job).is_err() {
            self.store.discard(&id);
            return Err(QueueError::ChannelClosed);
        }

        debug!("Enqueued job {}", id);
        Ok(id)
    }

    pub fn schedule_delayed(
        &self,
        delay: Duration,
        task: DelayedTask,
    ) -> Result<TaskId, QueueError> {
        self.scheduler.schedule(delay, task)
    }

    /// `None` means the id is unknown to this queue.
    pub fn fetch_status(&self, id: &JobId) -> Option<JobRecord> {
        self.store.get(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.store.subscribe()
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn shutdown(&self) {
        info!("Shutting down job queue...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Waits for workers to finish their current job, fails whatever is still
    /// queued, then stops the scheduler.
    pub fn wait(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        for job in self.job_receiver.try_iter() {
            self.store
                .mark_failed(&job.id, "Job queue shut down before the job ran".to_string());
        }

        self.scheduler_thread.join();
        info!("All workers have stopped");
    }
}

fn run_worker<H: JobHandler>(
    worker_id: usize,
    job_receiver: Receiver<QueuedJob<H::Spec>>,
    shutdown: Arc<AtomicBool>,
    handler: Arc<H>,
    store: Arc<JobStore>,
    scheduler: Scheduler,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job) => execute_job(worker_id, job, handler.as_ref(), &store, &scheduler),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn execute_job<H: JobHandler>(
    worker_id: usize,
    job: QueuedJob<H::Spec>,
    handler: &H,
    store: &JobStore,
    scheduler: &Scheduler,
) {
    let _span = tracing::info_span!("job", job_id = %job.id, worker = worker_id).entered();

    if !store.mark_started(&job.id) {
        warn!("Worker {} skipping job {}: not queued", worker_id, job.id);
        return;
    }

    let deadline = Deadline::after(job.timeout);
    let expiry = DelayedTask::ExpireJob {
        id: job.id.clone(),
        timeout: job.timeout,
    };
    if let Err(e) = scheduler.schedule(job.timeout, expiry) {
        // The deadline check below still catches overruns.
        warn!("Could not schedule expiry for job {}: {}", job.id, e);
    }

    let ctx = JobContext {
        id: job.id.clone(),
        deadline,
        scheduler: scheduler.clone(),
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&ctx, job.spec)));

    match outcome {
        Ok(Ok(_)) if deadline.is_expired() => {
            store.mark_failed(
                &job.id,
                format!("Job exceeded its timeout of {}s", job.timeout.as_secs()),
            );
        }
        Ok(Ok(result)) => {
            info!("Job {} finished in {:?}", job.id, deadline.elapsed());
            store.mark_finished(&job.id, result);
        }
        Ok(Err(e)) => {
            error!("Job {} failed: {}", job.id, e);
            store.mark_failed(&job.id, e.to_string());
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Job {} panicked: {}", job.id, message);
            store.mark_failed(&job.id, format!("Job panicked: {}", message));
        }
    }
}
