use super::chunking::ChunkPlan;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_with::skip_serializing_none;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    /// Every accepted file uploaded.
    Completed,
    /// The batch ran to the end but some files failed.
    Partial,
    /// Setup failed, or nothing could be uploaded.
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Partial | BatchStatus::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileState {
    Pending,
    Rejected { reason: String },
    Uploaded { reference: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub index: usize,
    pub name: String,
    #[serde(flatten)]
    pub state: FileState,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct UploadBatch {
    pub id: Uuid,
    pub entity_id: String,
    pub files: Vec<FileOutcome>,
    pub status: BatchStatus,
    pub progress: f64,
    pub completed: usize,
    pub failed: usize,
    pub rejected: usize,
    pub chunk_size: usize,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl UploadBatch {
    pub fn new(entity_id: impl Into<String>, names: Vec<String>) -> Self {
        let files = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| FileOutcome {
                index,
                name,
                state: FileState::Pending,
            })
            .collect();
        Self {
            id: Uuid::new_v4(),
            entity_id: entity_id.into(),
            files,
            status: BatchStatus::Pending,
            progress: 0.0,
            completed: 0,
            failed: 0,
            rejected: 0,
            chunk_size: 0,
            chunk_count: 0,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            error: None,
        }
    }

    /// Files that went through the gate and count towards progress.
    pub fn upload_total(&self) -> usize {
        self.files.len() - self.rejected
    }

    pub fn resolved(&self) -> usize {
        self.completed + self.failed
    }

    pub fn references(&self) -> Vec<String> {
        self.files
            .iter()
            .filter_map(|file| match &file.state {
                FileState::Uploaded { reference } => Some(reference.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn elapsed_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    pub(crate) fn mark_processing(&mut self) {
        if self.status == BatchStatus::Pending {
            self.status = BatchStatus::Processing;
            self.start_time = Some(Utc::now());
        }
    }

    pub(crate) fn reject(&mut self, index: usize, reason: impl Into<String>) {
        if let Some(file) = self.files.get_mut(index)
            && file.state == FileState::Pending
        {
            file.state = FileState::Rejected {
                reason: reason.into(),
            };
            self.rejected += 1;
        }
    }

    pub(crate) fn begin(&mut self, plan: &ChunkPlan) {
        self.mark_processing();
        self.chunk_size = plan.chunk_size;
        self.chunk_count = plan.len();
    }

    /// Records one file's result. Already-resolved files are ignored so the
    /// counters can never exceed the file count.
    pub(crate) fn record(&mut self, index: usize, result: Result<&str, &str>) {
        let Some(file) = self.files.get_mut(index) else {
            return;
        };
        if file.state != FileState::Pending {
            return;
        }
        match result {
            Ok(reference) => {
                file.state = FileState::Uploaded {
                    reference: reference.to_string(),
                };
                self.completed += 1;
            }
            Err(error) => {
                file.state = FileState::Failed {
                    error: error.to_string(),
                };
                self.failed += 1;
            }
        }
        let total = self.upload_total();
        let progress = if self.resolved() >= total {
            100.0
        } else {
            self.resolved() as f64 / total as f64 * 100.0
        };
        self.progress = self.progress.max(progress);
    }

    /// Terminal states are final; closing an already-closed batch is a no-op.
    pub(crate) fn finish(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = if self.upload_total() == 0 {
            self.error
                .get_or_insert_with(|| "no files passed the quality gate".to_string());
            BatchStatus::Failed
        } else if self.failed == 0 {
            BatchStatus::Completed
        } else if self.completed == 0 {
            self.error
                .get_or_insert_with(|| "all uploads failed".to_string());
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        };
        self.close();
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = BatchStatus::Failed;
        self.error = Some(error.into());
        self.close();
    }

    fn close(&mut self) {
        let now = Utc::now();
        self.start_time.get_or_insert(now);
        self.end_time = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(n: usize) -> UploadBatch {
        UploadBatch::new("coin-1", (0..n).map(|i| format!("f{i}.jpg")).collect())
    }

    #[test]
    fn progress_is_monotonic_and_ends_at_100() {
        let mut batch = batch(3);
        batch.begin(&ChunkPlan::new(3));
        let mut last = batch.progress;
        for (i, result) in [Ok("r0"), Err("boom"), Ok("r2")].into_iter().enumerate() {
            batch.record(i, result);
            assert!(batch.progress >= last);
            last = batch.progress;
        }
        assert_eq!(batch.progress, 100.0);
        assert_eq!(batch.resolved(), 3);
    }

    #[test]
    fn duplicate_records_are_ignored() {
        let mut batch = batch(2);
        batch.record(0, Ok("a"));
        batch.record(0, Err("late failure"));
        batch.record(7, Ok("out of range"));
        assert_eq!((batch.completed, batch.failed), (1, 0));
        assert!(batch.completed + batch.failed <= batch.files.len());
    }

    #[test]
    fn rejected_files_do_not_count_towards_progress() {
        let mut batch = batch(4);
        batch.reject(1, "too dark");
        batch.reject(1, "twice");
        assert_eq!(batch.rejected, 1);
        assert_eq!(batch.upload_total(), 3);
        batch.record(0, Ok("a"));
        batch.record(2, Ok("b"));
        batch.record(3, Ok("c"));
        assert_eq!(batch.progress, 100.0);
        batch.finish();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.references(), vec!["a", "b", "c"]);
    }

    #[test]
    fn partial_success_is_explicit() {
        let mut batch = batch(2);
        batch.mark_processing();
        batch.record(0, Ok("a"));
        batch.record(1, Err("timeout"));
        batch.finish();
        assert_eq!(batch.status, BatchStatus::Partial);
        assert!(batch.status.is_terminal());
        assert!(batch.elapsed_ms().is_some());
    }

    #[test]
    fn all_failures_fail_the_batch() {
        let mut batch = batch(2);
        batch.record(0, Err("x"));
        batch.record(1, Err("y"));
        batch.finish();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(batch.error.as_deref(), Some("all uploads failed"));
    }

    #[test]
    fn terminal_status_is_never_replaced() {
        let mut batch = batch(1);
        batch.record(0, Ok("a"));
        batch.finish();
        let closed_at = batch.end_time;
        batch.fail("late error");
        batch.finish();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.error, None);
        assert_eq!(batch.end_time, closed_at);
    }

    #[test]
    fn setup_failure_keeps_message() {
        let mut batch = batch(1);
        batch.fail("too many files");
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(batch.progress, 0.0);
        assert!(batch.end_time.is_some());
    }
}
