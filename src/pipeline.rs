use crate::cache::TtlCache;
use crate::imaging::{
    EnhancementOptions, Enhancer, GateVerdict, ScoreProfile, codec, gate, scorer,
};
use crate::models::{
    AnalyzeResponse, EnhanceResponse, EnhancedImage, FilePayload, FileVerdict, IngestRequest,
    IngestResponse, Rejection, StageReport,
};
use crate::random::{self, RandomSource};
use crate::storage::{
    BlobStore, ImageCatalog, MemoryBlobStore, MemoryCatalog, StorageError, SupabaseClient,
    object_path,
};
use crate::upload::{ChunkedUploader, FileState, UploadBatch, UploadError, UploadFile};
use chrono::Utc;
use serde_json::{Value, json};
use std::{future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Clone)]
pub struct IngestPipeline {
    pub config: Arc<PipelineConfig>,
    store: Arc<dyn BlobStore>,
    catalog: Arc<dyn ImageCatalog>,
    random: Arc<dyn RandomSource>,
    cache: Arc<TtlCache<usize>>,
    uploader: ChunkedUploader,
    enhancer: Enhancer,
}

impl IngestPipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn BlobStore>,
        catalog: Arc<dyn ImageCatalog>,
        random: Arc<dyn RandomSource>,
        cache: Arc<TtlCache<usize>>,
        enhancer: Enhancer,
    ) -> Self {
        let uploader = ChunkedUploader::new(store.clone(), random.clone());
        Self {
            config: Arc::new(config),
            store,
            catalog,
            random,
            cache,
            uploader,
            enhancer,
        }
    }

    /// Supabase when `SUPABASE_URL` and a service key are set, in-memory otherwise.
    pub fn from_env() -> Self {
        let cache = Arc::new(TtlCache::from_env());
        let random = random::source_from_env();
        match SupabaseClient::from_env() {
            Some(client) => {
                info!(target = "mintmark.storage", backend = "supabase", "storage_configured");
                let client = Arc::new(client);
                Self::new(
                    PipelineConfig::default(),
                    client.clone(),
                    client,
                    random,
                    cache,
                    Enhancer::from_env(),
                )
            }
            None => {
                warn!(
                    target = "mintmark.storage",
                    backend = "memory",
                    "SUPABASE_URL not set; uploads are kept in memory"
                );
                Self::new(
                    PipelineConfig::default(),
                    Arc::new(MemoryBlobStore::new()),
                    Arc::new(MemoryCatalog::new()),
                    random,
                    cache,
                    Enhancer::from_env(),
                )
            }
        }
    }

    #[cfg(test)]
    pub fn demo() -> Self {
        Self::new(
            PipelineConfig::default(),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryCatalog::new()),
            Arc::new(random::ThreadRandom),
            Arc::new(TtlCache::from_env()),
            Enhancer::default(),
        )
    }

    /// Slots left before the entity hits `max_images`. The catalog count is
    /// cached and dropped whenever this pipeline appends to the entity.
    pub async fn remaining_slots(&self, entity_id: &str) -> Result<usize, IngestError> {
        let key = catalog_cache_key(entity_id);
        let current = match self.cache.get(&key).await {
            Some(count) => count,
            None => {
                let images = self
                    .catalog
                    .list_images(entity_id)
                    .await
                    .map_err(|err| match err {
                        StorageError::NotFound(_) => {
                            IngestError::invalid_input("upload", format!("unknown entity `{entity_id}`"))
                        }
                        other => IngestError::internal("catalog", other.to_string()),
                    })?;
                self.cache.set(key, images.len()).await;
                images.len()
            }
        };
        Ok(self.config.max_images.saturating_sub(current))
    }

    /// Gate verdicts for each payload, in submission order.
    pub async fn validate_files(
        &self,
        files: Vec<FilePayload>,
    ) -> Result<Vec<FileVerdict>, IngestError> {
        if files.is_empty() {
            return Err(IngestError::invalid_input("validate", "no files provided"));
        }
        tokio::task::spawn_blocking(move || {
            files
                .into_iter()
                .enumerate()
                .map(|(index, file)| FileVerdict {
                    index,
                    verdict: match codec::decode_base64(&file.data) {
                        Ok(bytes) => gate::validate_bytes(&bytes),
                        Err(_) => GateVerdict::reject(gate::RejectReason::InvalidImage),
                    },
                    name: file.name,
                })
                .collect()
        })
        .await
        .map_err(|err| IngestError::internal("validate", err.to_string()))
    }

    pub async fn analyze(
        &self,
        file: FilePayload,
        profile: ScoreProfile,
    ) -> Result<AnalyzeResponse, IngestError> {
        let bytes = codec::decode_base64(&file.data)
            .map_err(|err| IngestError::invalid_input("analyze", err.to_string()))?;
        let (width, height, metrics) = tokio::task::spawn_blocking(move || {
            codec::decode(&bytes).map(|image| {
                (
                    image.width(),
                    image.height(),
                    scorer::score(&image, profile),
                )
            })
        })
        .await
        .map_err(|err| IngestError::internal("analyze", err.to_string()))?
        .map_err(|err| IngestError::invalid_input("analyze", err.to_string()))?;
        Ok(AnalyzeResponse {
            name: file.name,
            width,
            height,
            profile,
            metrics,
        })
    }

    pub async fn enhance(
        &self,
        file: FilePayload,
        options: EnhancementOptions,
    ) -> Result<EnhanceResponse, IngestError> {
        let bytes = codec::decode_base64(&file.data)
            .map_err(|err| IngestError::invalid_input("enhance", err.to_string()))?;
        let enhancer = self.enhancer;
        let encoded = tokio::task::spawn_blocking(move || enhancer.enhance_bytes(&bytes, &options))
            .await
            .map_err(|err| IngestError::internal("enhance", err.to_string()))?
            .map_err(|err| IngestError::invalid_input("enhance", err.to_string()))?;
        Ok(EnhanceResponse {
            name: file.name,
            content_type: encoded.content_type.to_string(),
            data: codec::encode_base64(&encoded.bytes),
            report: encoded.report,
        })
    }

    pub async fn run(&self, request: IngestRequest) -> Result<IngestResponse, IngestError> {
        let (batch, _progress) = watch::channel(new_batch(&request));
        self.run_batch(request, &batch).await
    }

    /// Gate, upload and optionally enhance one batch. Progress is published
    /// through `batch`, which ends in a terminal state on every path.
    pub async fn run_batch(
        &self,
        request: IngestRequest,
        batch: &watch::Sender<UploadBatch>,
    ) -> Result<IngestResponse, IngestError> {
        let result = self.run_stages(request, batch).await;
        if let Err(err) = &result {
            batch.send_if_modified(|b| {
                if b.status.is_terminal() {
                    return false;
                }
                b.fail(err.to_string());
                true
            });
        }
        result
    }

    async fn run_stages(
        &self,
        request: IngestRequest,
        batch: &watch::Sender<UploadBatch>,
    ) -> Result<IngestResponse, IngestError> {
        validate_request(&request)?;
        let IngestRequest {
            entity_id,
            files,
            enhancement,
            store_enhanced,
        } = request;
        let mut stages = Vec::new();
        batch.send_modify(UploadBatch::mark_processing);

        let gated = self
            .capture_stage("quality_gate", &mut stages, stages::quality_gate(files))
            .await?;
        for rejection in &gated.rejected {
            batch.send_modify(|b| b.reject(rejection.index, rejection.reason.as_str()));
        }

        if gated.accepted.is_empty() {
            batch.send_modify(UploadBatch::finish);
            return Ok(IngestResponse {
                batch: batch.borrow().clone(),
                accepted: Vec::new(),
                rejected: gated.rejected,
                enhancements: Vec::new(),
                stages,
            });
        }

        let remaining = self.remaining_slots(&entity_id).await?;
        let references = self
            .capture_stage(
                "upload",
                &mut stages,
                stages::upload(&self.uploader, &gated.accepted, remaining, batch),
            )
            .await?;

        // The batch stays open until the references are recorded, so a
        // catalog failure is its one terminal transition.
        if !references.is_empty() {
            if let Err(err) = self.catalog.append_images(&entity_id, &references).await {
                let message = format!(
                    "catalog update failed: {err}; stored but unrecorded: {}",
                    references.join(", ")
                );
                warn!(
                    target = "mintmark.pipeline",
                    entity_id = %entity_id,
                    stored = references.len(),
                    error = %err,
                    "catalog_append_failed"
                );
                batch.send_modify(|b| b.fail(message.clone()));
                return Err(IngestError::internal("catalog", message));
            }
            self.forget_catalog_count(&entity_id).await;
        }
        batch.send_modify(UploadBatch::finish);

        let mut enhancements = Vec::new();
        if let Some(options) = enhancement.filter(EnhancementOptions::any) {
            let uploaded = uploaded_files(gated.accepted, &batch.borrow());
            let target = store_enhanced.then_some(EnhancedTarget {
                store: self.store.as_ref(),
                random: self.random.as_ref(),
                entity_id: &entity_id,
            });
            enhancements = self
                .capture_stage(
                    "enhance",
                    &mut stages,
                    stages::enhance(self.enhancer, options, uploaded, target),
                )
                .await?;
        }

        let batch = batch.borrow().clone();
        info!(
            target = "mintmark.pipeline",
            batch_id = %batch.id,
            entity_id = %batch.entity_id,
            status = ?batch.status,
            uploaded = batch.completed,
            failed = batch.failed,
            rejected = batch.rejected,
            "ingest_finished"
        );
        Ok(IngestResponse {
            batch,
            accepted: references,
            rejected: gated.rejected,
            enhancements,
            stages,
        })
    }

    /// Drops expired catalog counts; returns how many went.
    pub async fn sweep_cache(&self) -> usize {
        self.cache.purge_expired().await
    }

    async fn forget_catalog_count(&self, entity_id: &str) {
        let pattern = format!("^{}$", regex::escape(&catalog_cache_key(entity_id)));
        if let Err(err) = self.cache.invalidate(&pattern).await {
            warn!(target = "mintmark.cache", error = %err, "cache_invalidate_failed");
        }
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, IngestError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, IngestError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

#[derive(Clone)]
pub struct PipelineConfig {
    pub max_images: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_images: max_images_allowed(),
        }
    }
}

pub fn new_batch(request: &IngestRequest) -> UploadBatch {
    UploadBatch::new(
        request.entity_id.clone(),
        request.files.iter().map(|f| f.name.clone()).collect(),
    )
}

fn validate_request(request: &IngestRequest) -> Result<(), IngestError> {
    if request.entity_id.trim().is_empty() {
        return Err(IngestError::invalid_input("request", "entity_id is required"));
    }
    if request.files.is_empty() {
        return Err(IngestError::invalid_input("request", "no files provided"));
    }
    Ok(())
}

fn catalog_cache_key(entity_id: &str) -> String {
    format!("catalog:{entity_id}")
}

/// Pairs each uploaded file with the reference it was stored under.
fn uploaded_files(accepted: Vec<UploadFile>, batch: &UploadBatch) -> Vec<(UploadFile, String)> {
    accepted
        .into_iter()
        .filter_map(|file| match batch.files.get(file.index).map(|f| &f.state) {
            Some(FileState::Uploaded { reference }) => {
                let reference = reference.clone();
                Some((file, reference))
            }
            _ => None,
        })
        .collect()
}

struct EnhancedTarget<'a> {
    store: &'a dyn BlobStore,
    random: &'a dyn RandomSource,
    entity_id: &'a str,
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct IngestError {
    stage: &'static str,
    message: String,
    kind: IngestErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestErrorKind {
    InvalidInput,
    Internal,
}

impl IngestError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: IngestErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: IngestErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> IngestErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

#[derive(Debug)]
pub struct GateOutcome {
    pub accepted: Vec<UploadFile>,
    pub rejected: Vec<Rejection>,
}

pub mod stages {
    use super::*;

    /// Decodes every payload and runs the gate off the async runtime.
    pub async fn quality_gate(
        files: Vec<FilePayload>,
    ) -> Result<StageOutcome<GateOutcome>, IngestError> {
        let submitted = files.len();
        let outcome = tokio::task::spawn_blocking(move || gate_files(files))
            .await
            .map_err(|err| IngestError::internal("quality_gate", err.to_string()))?;
        let mut reasons = serde_json::Map::new();
        for rejection in &outcome.rejected {
            let key = serde_json::to_value(rejection.code)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let count = reasons.get(&key).and_then(Value::as_u64).unwrap_or(0);
            reasons.insert(key, json!(count + 1));
        }
        let output = json!({
            "submitted": submitted,
            "accepted": outcome.accepted.len(),
            "rejected": outcome.rejected.len(),
            "reasons": reasons,
        });
        Ok(StageOutcome::new(outcome, output))
    }

    fn gate_files(files: Vec<FilePayload>) -> GateOutcome {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for (index, file) in files.into_iter().enumerate() {
            let bytes = codec::decode_base64(&file.data).unwrap_or_default();
            let verdict = gate::validate_bytes(&bytes);
            crate::metrics::gate_outcome(verdict.is_valid);
            match verdict.code {
                None => {
                    let format = codec::sniff_format(&bytes);
                    let content_type = file
                        .content_type
                        .filter(|ct| ct.starts_with("image/"))
                        .unwrap_or_else(|| codec::content_type_for(format).to_string());
                    accepted.push(UploadFile {
                        index,
                        name: file.name,
                        bytes,
                        content_type,
                        extension: codec::extension_for(format),
                    });
                }
                Some(code) => rejected.push(Rejection {
                    index,
                    name: file.name,
                    reason: code.message().to_string(),
                    code,
                }),
            }
        }
        GateOutcome { accepted, rejected }
    }

    pub async fn upload(
        uploader: &ChunkedUploader,
        files: &[UploadFile],
        remaining_slots: usize,
        batch: &watch::Sender<UploadBatch>,
    ) -> Result<StageOutcome<Vec<String>>, IngestError> {
        let references = uploader
            .upload(files, remaining_slots, batch)
            .await
            .map_err(|err: UploadError| IngestError::invalid_input("upload", err.to_string()))?;
        let snapshot = batch.borrow();
        let output = json!({
            "uploaded": snapshot.completed,
            "failed": snapshot.failed,
            "chunk_size": snapshot.chunk_size,
            "chunks": snapshot.chunk_count,
            "remaining_slots": remaining_slots.saturating_sub(snapshot.completed),
            "progress": snapshot.progress,
        });
        drop(snapshot);
        Ok(StageOutcome::new(references, output))
    }

    /// Enhances uploaded files one at a time. A failing image is logged and
    /// left out; it never fails the batch.
    pub(super) async fn enhance(
        enhancer: Enhancer,
        options: EnhancementOptions,
        files: Vec<(UploadFile, String)>,
        target: Option<EnhancedTarget<'_>>,
    ) -> Result<StageOutcome<Vec<EnhancedImage>>, IngestError> {
        let mut enhanced = Vec::with_capacity(files.len());
        let mut failures = 0usize;
        for (file, source_reference) in files {
            let index = file.index;
            let name = file.name;
            let bytes = file.bytes;
            let result =
                tokio::task::spawn_blocking(move || enhancer.enhance_bytes(&bytes, &options))
                    .await;
            let encoded = match result {
                Ok(Ok(encoded)) => encoded,
                Ok(Err(err)) => {
                    failures += 1;
                    warn!(target = "mintmark.enhance", file = %name, error = %err, "enhance_failed");
                    continue;
                }
                Err(err) => {
                    failures += 1;
                    warn!(target = "mintmark.enhance", file = %name, error = %err, "enhance_task_failed");
                    continue;
                }
            };
            let mut enhanced_reference = None;
            if let Some(target) = &target {
                let path = format!(
                    "enhanced/{}",
                    object_path(
                        target.entity_id,
                        "jpg",
                        Utc::now().timestamp_millis(),
                        target.random,
                    )
                );
                match target
                    .store
                    .put(&path, &encoded.bytes, encoded.content_type)
                    .await
                {
                    Ok(reference) => enhanced_reference = Some(reference),
                    Err(err) => {
                        warn!(target = "mintmark.enhance", file = %name, error = %err, "enhanced_store_failed")
                    }
                }
            }
            enhanced.push(EnhancedImage {
                index,
                source_reference,
                enhanced_reference,
                report: encoded.report,
            });
        }
        let mean = |pick: fn(&EnhancedImage) -> f64| {
            if enhanced.is_empty() {
                0.0
            } else {
                enhanced.iter().map(pick).sum::<f64>() / enhanced.len() as f64
            }
        };
        let output = json!({
            "enhanced": enhanced.len(),
            "failed": failures,
            "stored": enhanced.iter().filter(|e| e.enhanced_reference.is_some()).count(),
            "mean_overall_before": mean(|e| e.report.before.overall),
            "mean_overall_after": mean(|e| e.report.after.overall),
            "options": options,
        });
        Ok(StageOutcome::new(enhanced, output))
    }
}

fn max_images_allowed() -> usize {
    std::env::var("MAX_IMAGES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v >= 1)
        .unwrap_or(20)
}
