use crate::{
    models::{ApiError, IngestRequest, IngestResponse},
    pipeline::{IngestPipeline, new_batch},
    upload::UploadBatch,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Background batches, processed one at a time in submission order.
#[derive(Clone)]
pub struct BatchQueue {
    tx: mpsc::Sender<Job>,
    entries: Arc<Mutex<Vec<Entry>>>,
}

struct Job {
    id: Uuid,
    request: IngestRequest,
    progress: watch::Sender<UploadBatch>,
}

struct Entry {
    id: Uuid,
    progress: watch::Receiver<UploadBatch>,
    state: JobState,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed {
        result: IngestResponse,
    },
    Failed {
        error: String,
        stage: Option<String>,
    },
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }
}

#[derive(Clone, Serialize)]
pub struct BatchInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
    pub batch: UploadBatch,
}

impl BatchQueue {
    pub fn spawn(pipeline: IngestPipeline) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let entries: Arc<Mutex<Vec<Entry>>> = Arc::new(Mutex::new(Vec::new()));
        let entries_bg = entries.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                set_state(&entries_bg, job.id, JobState::Running).await;
                let result = pipeline.run_batch(job.request, &job.progress).await;
                let state = match result {
                    Ok(result) => JobState::Completed { result },
                    Err(err) => {
                        warn!(
                            target = "mintmark.jobs",
                            batch_id = %job.id,
                            stage = err.stage(),
                            error = %err.detail(),
                            "batch_failed"
                        );
                        JobState::Failed {
                            error: err.detail().to_string(),
                            stage: Some(err.stage().to_string()),
                        }
                    }
                };
                set_state(&entries_bg, job.id, state).await;
                let purged = pipeline.sweep_cache().await;
                if purged > 0 {
                    debug!(target = "mintmark.jobs", purged, "cache_swept");
                }
            }
        });

        (Self { tx, entries }, handle)
    }

    /// Queues a batch and returns its id, which is also the batch id.
    pub async fn enqueue(&self, request: IngestRequest) -> Result<Uuid, ApiError> {
        let batch = new_batch(&request);
        let id = batch.id;
        let (progress, rx) = watch::channel(batch);
        {
            let mut guard = self.entries.lock().await;
            guard.push(Entry {
                id,
                progress: rx,
                state: JobState::Queued,
            });
        }
        let job = Job {
            id,
            request,
            progress,
        };
        if self.tx.send(job).await.is_err() {
            self.entries.lock().await.retain(|e| e.id != id);
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
            });
        }
        info!(target = "mintmark.jobs", batch_id = %id, "batch_queued");
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<BatchInfo> {
        let guard = self.entries.lock().await;
        guard.iter().find(|e| e.id == id).map(Entry::info)
    }

    pub async fn list(&self) -> Vec<BatchInfo> {
        let guard = self.entries.lock().await;
        guard.iter().map(Entry::info).collect()
    }

    /// Drops finished batches and returns how many were removed.
    pub async fn clear_finished(&self) -> usize {
        let mut guard = self.entries.lock().await;
        let before = guard.len();
        guard.retain(|e| !e.state.is_finished());
        before - guard.len()
    }
}

impl Entry {
    fn info(&self) -> BatchInfo {
        BatchInfo {
            id: self.id.to_string(),
            state: self.state.clone(),
            batch: self.progress.borrow().clone(),
        }
    }
}

async fn set_state(entries: &Mutex<Vec<Entry>>, id: Uuid, state: JobState) {
    let mut guard = entries.lock().await;
    if let Some(entry) = guard.iter_mut().find(|e| e.id == id) {
        entry.state = state;
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}
