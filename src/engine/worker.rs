// Worker pool for concurrent production encodes

use anyhow::{Result, bail};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;
use tracing::{debug, warn};
use uuid::Uuid;

use super::core::{BuildNotice, EncodeJob, EncodeOutcome, JobStatus, ProgressEvent};
use super::encode::{CancelToken, Encoder, ProgressSender};
use super::error::EngineError;

/// Room for status messages; progress is coalesced when it fills up
const CHANNEL_CAPACITY: usize = 256;

/// Message from worker to main thread
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    /// Job started encoding
    JobStarted { job_id: Uuid, worker_id: usize },

    /// Observable builder decision (software downgrade, ignored knob)
    Notice { job_id: Uuid, notice: BuildNotice },

    /// Progress update during encoding
    Progress { job_id: Uuid, event: ProgressEvent },

    /// Job completed successfully
    JobCompleted { job_id: Uuid, outcome: EncodeOutcome },

    /// Job failed, was rejected, timed out or was cancelled
    JobFailed {
        job_id: Uuid,
        error: String,
        details: Option<String>,
        cancelled: bool,
    },

    /// Worker is idle (waiting for work)
    WorkerIdle { worker_id: usize },
}

impl WorkerMessage {
    /// Status this message moves its job to, if it changes one
    pub fn job_status(&self) -> Option<(Uuid, JobStatus)> {
        match self {
            WorkerMessage::JobStarted { job_id, .. } => Some((*job_id, JobStatus::Running)),
            WorkerMessage::JobCompleted { job_id, .. } => Some((*job_id, JobStatus::Done)),
            WorkerMessage::JobFailed {
                job_id, cancelled, ..
            } => Some((
                *job_id,
                if *cancelled {
                    JobStatus::Cancelled
                } else {
                    JobStatus::Failed
                },
            )),
            _ => None,
        }
    }

    /// Record this message on `job` if it is about that job. Returns true
    /// when the job changed.
    pub fn apply_to(&self, job: &mut EncodeJob) -> bool {
        let Some((job_id, status)) = self.job_status() else {
            return false;
        };
        if job_id != job.id {
            return false;
        }
        job.status = status;
        job.last_error = match self {
            WorkerMessage::JobFailed { error, .. } => Some(error.clone()),
            _ => None,
        };
        true
    }
}

/// Releases the slot even if the encode thread panics
struct SlotGuard(Arc<AtomicUsize>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Worker pool with N concurrent encode slots
pub struct WorkerPool {
    max_workers: Arc<AtomicUsize>,
    tx: SyncSender<WorkerMessage>,
    rx: Receiver<WorkerMessage>,
    active_workers: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create a new worker pool
    pub fn new(max_workers: usize) -> Self {
        let (tx, rx) = mpsc::sync_channel(CHANNEL_CAPACITY);

        Self {
            max_workers: Arc::new(AtomicUsize::new(max_workers)),
            tx,
            rx,
            active_workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get the receiver for worker messages
    pub fn receiver(&self) -> &Receiver<WorkerMessage> {
        &self.rx
    }

    /// Claim a slot if one is free
    fn claim_slot(&self) -> Option<SlotGuard> {
        let max = self.max_workers();
        self.active_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                (active < max).then_some(active + 1)
            })
            .ok()
            .map(|_| SlotGuard(self.active_workers.clone()))
    }

    /// Spawn a worker to run `job` through `encoder`.
    ///
    /// Fails without starting anything when all slots are busy. Encode
    /// errors are reported as [`WorkerMessage::JobFailed`], never returned.
    pub fn spawn_worker(
        &self,
        worker_id: usize,
        job: EncodeJob,
        encoder: Encoder,
        cancel: CancelToken,
    ) -> Result<()> {
        let Some(slot) = self.claim_slot() else {
            bail!(
                "all {} encode slots are busy, cannot start job {}",
                self.max_workers(),
                job.id
            );
        };
        let tx = self.tx.clone();

        thread::spawn(move || {
            let _slot = slot;
            let job_id = job.id;

            let _ = tx.send(WorkerMessage::JobStarted { job_id, worker_id });

            let result = encoder.prepare(&job.request).and_then(|(command, media)| {
                for notice in &command.notices {
                    let _ = tx.send(WorkerMessage::Notice {
                        job_id,
                        notice: notice.clone(),
                    });
                }
                let mut progress = ProgressSender::new(tx.clone(), move |event| {
                    WorkerMessage::Progress { job_id, event }
                });
                encoder.run_prepared(
                    &job.request,
                    command,
                    media.as_ref(),
                    Some(&mut progress),
                    &cancel,
                )
            });

            match result {
                Ok(report) => {
                    debug!(%job_id, worker_id, "Job completed");
                    let _ = tx.send(WorkerMessage::JobCompleted {
                        job_id,
                        outcome: report.outcome,
                    });
                }
                Err(e) => {
                    warn!(%job_id, worker_id, error = %e, "Job failed");
                    let _ = tx.send(WorkerMessage::JobFailed {
                        job_id,
                        error: e.to_string(),
                        details: e.details().map(str::to_string),
                        cancelled: matches!(e, EngineError::Cancelled),
                    });
                }
            }

            drop(_slot);
            let _ = tx.send(WorkerMessage::WorkerIdle { worker_id });
        });

        Ok(())
    }

    /// Get the number of active workers
    pub fn active_count(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Get the maximum number of workers
    pub fn max_workers(&self) -> usize {
        self.max_workers.load(Ordering::SeqCst)
    }

    /// Set the maximum number of workers. Running jobs are not interrupted.
    pub fn set_max_workers(&self, max: usize) {
        self.max_workers.store(max, Ordering::SeqCst);
    }

    /// Check if we can spawn more workers
    pub fn can_spawn(&self) -> bool {
        self.active_count() < self.max_workers()
    }
}
