//! In-memory job registry with status-change broadcasting.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::queue::job::{JobId, JobRecord, JobStatus};

/// Emitted whenever a job changes status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.id.clone(),
            status: record.status,
            result_url: record.result_url.clone(),
            error: record.error.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Holds every job the queue has seen. Transitions out of a terminal status
/// are refused, so a late worker can never resurrect a timed-out job.
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobStore {
    pub fn new(event_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(event_capacity);
        Self {
            jobs: RwLock::new(HashMap::new()),
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn insert_queued(&self, id: JobId, timeout: Duration) -> JobRecord {
        let record = JobRecord::queued(id.clone(), timeout);
        self.write().insert(id, record.clone());
        self.publish(&record);
        record
    }

    /// Removes a record that never reached a worker (enqueue failed).
    pub(crate) fn discard(&self, id: &JobId) {
        self.write().remove(id);
    }

    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.read().get(id).cloned()
    }

    pub fn mark_started(&self, id: &JobId) -> bool {
        self.transition(id, |record| {
            if record.status != JobStatus::Queued {
                return false;
            }
            record.status = JobStatus::Started;
            record.started_at = Some(Utc::now());
            true
        })
    }

    pub fn mark_finished(&self, id: &JobId, result_url: String) -> bool {
        self.transition(id, |record| {
            if record.status != JobStatus::Started {
                return false;
            }
            record.status = JobStatus::Finished;
            record.result_url = Some(result_url);
            record.ended_at = Some(Utc::now());
            true
        })
    }

    pub fn mark_failed(&self, id: &JobId, error: String) -> bool {
        self.transition(id, |record| {
            if record.status.is_terminal() {
                return false;
            }
            record.status = JobStatus::Failed;
            record.result_url = None;
            record.error = Some(error);
            record.ended_at = Some(Utc::now());
            true
        })
    }

    /// Returns `(queued, started, finished, failed)`.
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        self.read()
            .values()
            .fold((0, 0, 0, 0), |(q, s, d, f), record| match record.status {
                JobStatus::Queued => (q + 1, s, d, f),
                JobStatus::Started => (q, s + 1, d, f),
                JobStatus::Finished => (q, s, d + 1, f),
                JobStatus::Failed => (q, s, d, f + 1),
            })
    }

    fn transition<F>(&self, id: &JobId, apply: F) -> bool
    where
        F: FnOnce(&mut JobRecord) -> bool,
    {
        let updated = match self.write().get_mut(id) {
            Some(record) => {
                let from = record.status;
                if apply(record) {
                    Some(record.clone())
                } else {
                    log::warn!(
                        "Ignoring status change for job {} (currently {})",
                        id,
                        from
                    );
                    None
                }
            }
            None => {
                log::warn!("Status change for unknown job {}", id);
                None
            }
        };

        match updated {
            Some(record) => {
                self.publish(&record);
                true
            }
            None => false,
        }
    }

    // Every mutation is a single insert, remove or field update, so records
    // behind a poisoned lock are still whole.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.read().unwrap_or_else(|poisoned| {
            log::warn!("Job store lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.write().unwrap_or_else(|poisoned| {
            log::warn!("Job store lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn publish(&self, record: &JobRecord) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(JobEvent::from_record(record));
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(256)
    }
}
