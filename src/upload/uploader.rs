use super::{batch::UploadBatch, chunking::ChunkPlan};
use crate::{
    metrics,
    random::RandomSource,
    storage::{BlobStore, object_path},
};
use chrono::Utc;
use futures_util::future::join_all;
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// An accepted file, already decoded from the request payload. `index` is
/// the file's position in its batch.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub index: usize,
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub extension: &'static str,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no files to upload")]
    Empty,
    #[error("too many files: {requested} submitted but only {remaining} slots remain")]
    TooManyFiles { requested: usize, remaining: usize },
}

#[derive(Clone)]
pub struct ChunkedUploader {
    store: Arc<dyn BlobStore>,
    random: Arc<dyn RandomSource>,
}

impl ChunkedUploader {
    pub fn new(store: Arc<dyn BlobStore>, random: Arc<dyn RandomSource>) -> Self {
        Self { store, random }
    }

    /// Uploads `files` chunk by chunk, publishing progress through `batch`.
    ///
    /// Chunks run strictly in order. Files inside a chunk are polled together
    /// on the current task and the chunk only ends once every one of them has
    /// settled, so a failing file never cancels its siblings. A setup failure
    /// fails the batch; otherwise the caller closes it with
    /// [`UploadBatch::finish`] once the references are recorded.
    ///
    /// Returns the references of the files that uploaded, in file order.
    pub async fn upload(
        &self,
        files: &[UploadFile],
        remaining_slots: usize,
        batch: &watch::Sender<UploadBatch>,
    ) -> Result<Vec<String>, UploadError> {
        let result = self.run(files, remaining_slots, batch).await;
        if let Err(err) = &result {
            batch.send_modify(|b| b.fail(err.to_string()));
        }
        result
    }

    async fn run(
        &self,
        files: &[UploadFile],
        remaining_slots: usize,
        batch: &watch::Sender<UploadBatch>,
    ) -> Result<Vec<String>, UploadError> {
        if files.is_empty() {
            return Err(UploadError::Empty);
        }
        if files.len() > remaining_slots {
            return Err(UploadError::TooManyFiles {
                requested: files.len(),
                remaining: remaining_slots,
            });
        }

        let plan = ChunkPlan::new(files.len());
        let (batch_id, entity_id) = {
            let current = batch.borrow();
            (current.id, current.entity_id.clone())
        };
        batch.send_modify(|b| b.begin(&plan));
        info!(
            target = "mintmark.upload",
            batch_id = %batch_id,
            entity_id = %entity_id,
            files = files.len(),
            chunk_size = plan.chunk_size,
            chunks = plan.len(),
            "batch_upload_started"
        );

        let batch_label = batch_id.to_string();
        let started = Instant::now();
        let mut references = Vec::with_capacity(files.len());
        for (chunk_no, range) in plan.ranges.iter().enumerate() {
            let chunk_started = Instant::now();
            let chunk = &files[range.clone()];
            let results = join_all(
                chunk
                    .iter()
                    .map(|file| self.upload_one(&batch_label, &entity_id, file, batch)),
            )
            .await;
            let uploaded = results.iter().filter(|r| r.is_some()).count();
            let elapsed_ms = chunk_started.elapsed().as_millis();
            metrics::chunk_elapsed(chunk.len(), elapsed_ms);
            debug!(
                target = "mintmark.upload",
                batch_id = %batch_id,
                chunk = chunk_no,
                files = chunk.len(),
                uploaded,
                elapsed_ms = elapsed_ms as u64,
                progress = batch.borrow().progress,
                "chunk_settled"
            );
            references.extend(results.into_iter().flatten());
        }

        let elapsed_ms = started.elapsed().as_millis();
        metrics::stage_elapsed("upload_batch", elapsed_ms);
        info!(
            target = "mintmark.upload",
            batch_id = %batch_id,
            uploaded = references.len(),
            failed = files.len() - references.len(),
            elapsed_ms = elapsed_ms as u64,
            "batch_upload_finished"
        );
        Ok(references)
    }

    async fn upload_one(
        &self,
        batch_id: &str,
        entity_id: &str,
        file: &UploadFile,
        batch: &watch::Sender<UploadBatch>,
    ) -> Option<String> {
        let path = object_path(
            entity_id,
            file.extension,
            Utc::now().timestamp_millis(),
            self.random.as_ref(),
        );
        match self.store.put(&path, &file.bytes, &file.content_type).await {
            Ok(reference) => {
                batch.send_modify(|b| b.record(file.index, Ok(&reference)));
                metrics::file_outcome(true);
                Some(reference)
            }
            Err(err) => {
                warn!(
                    target = "mintmark.upload",
                    batch_id,
                    file = %file.name,
                    error = %err,
                    "file_upload_failed"
                );
                let message = err.to_string();
                batch.send_modify(|b| b.record(file.index, Err(&message)));
                metrics::file_outcome(false);
                None
            }
        }
    }
}
