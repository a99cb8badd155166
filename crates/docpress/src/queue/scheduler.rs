//! Delayed, fire-and-forget tasks.
//!
//! A single thread keeps a min-heap of due times and sleeps on the command
//! channel until either a new task arrives or the earliest one is due. Tasks
//! fire "at or after" their delay; nothing is ordered between them.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::error::QueueError;
use crate::queue::job::JobId;
use crate::queue::store::JobStore;
use crate::storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelayedTask {
    /// Remove a file, or a directory recursively. Missing paths are fine.
    RemovePath(PathBuf),
    /// Fail the job if it is still running once its timeout has elapsed.
    ExpireJob { id: JobId, timeout: Duration },
}

struct Entry {
    due: Instant,
    id: TaskId,
    task: DelayedTask,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.id == other.id
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.id.cmp(&other.id))
    }
}

enum Message {
    Schedule(Entry),
    Shutdown,
}

/// Cloneable handle for scheduling delayed tasks.
#[derive(Clone)]
pub struct Scheduler {
    sender: Sender<Message>,
    next_id: Arc<AtomicU64>,
}

/// Owns the scheduler thread; dropping it without `join` detaches the thread.
pub struct SchedulerThread {
    sender: Sender<Message>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    pub fn start(store: Arc<JobStore>) -> Result<(Scheduler, SchedulerThread), QueueError> {
        let (sender, receiver) = unbounded::<Message>();

        let handle = thread::Builder::new()
            .name("docpress-scheduler".to_string())
            .spawn(move || run_scheduler(receiver, store))
            .map_err(|e| QueueError::SpawnFailed(e.to_string()))?;

        let scheduler = Scheduler {
            sender: sender.clone(),
            next_id: Arc::new(AtomicU64::new(1)),
        };

        Ok((scheduler, SchedulerThread { sender, handle }))
    }

    /// Schedules `task` to run once `delay` has elapsed.
    ///
    /// Fails if the scheduler thread is gone, so cleanup is never lost silently.
    pub fn schedule(&self, delay: Duration, task: DelayedTask) -> Result<TaskId, QueueError> {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Entry {
            due: Instant::now() + delay,
            id,
            task,
        };

        self.sender
            .send(Message::Schedule(entry))
            .map_err(|_| QueueError::SchedulerClosed)?;

        debug!("Scheduled {} in {:?}", id, delay);
        Ok(id)
    }
}

impl SchedulerThread {
    pub fn join(self) {
        let _ = self.sender.send(Message::Shutdown);
        if let Err(e) = self.handle.join() {
            error!("Scheduler thread panicked: {:?}", e);
        }
    }
}

fn run_scheduler(receiver: Receiver<Message>, store: Arc<JobStore>) {
    debug!("Scheduler started");
    let mut pending: BinaryHeap<Reverse<Entry>> = BinaryHeap::new();

    loop {
        let message = match pending.peek() {
            Some(Reverse(next)) => {
                receiver.recv_timeout(next.due.saturating_duration_since(Instant::now()))
            }
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match message {
            Ok(Message::Schedule(entry)) => pending.push(Reverse(entry)),
            Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        while pending.peek().is_some_and(|Reverse(next)| next.due <= now) {
            if let Some(Reverse(entry)) = pending.pop() {
                run_task(entry, &store);
            }
        }
    }

    if !pending.is_empty() {
        warn!(
            "Scheduler stopping with {} pending task(s) that will not run",
            pending.len()
        );
    }
    debug!("Scheduler stopped");
}

fn run_task(entry: Entry, store: &JobStore) {
    match entry.task {
        DelayedTask::RemovePath(path) => match storage::remove_path(&path) {
            Ok(true) => info!("{}: removed {}", entry.id, path.display()),
            Ok(false) => debug!("{}: {} already gone", entry.id, path.display()),
            Err(e) => error!("{}: {}", entry.id, e),
        },
        DelayedTask::ExpireJob { id, timeout } => {
            let reason = format!("Job exceeded its timeout of {}s", timeout.as_secs());
            if store.get(&id).is_some_and(|r| !r.status.is_terminal())
                && store.mark_failed(&id, reason)
            {
                warn!("Job {} timed out after {:?}", id, timeout);
            }
        }
    }
}
