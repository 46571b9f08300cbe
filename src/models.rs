use crate::imaging::{
    EnhancementOptions, EnhancementReport, GateVerdict, QualityMetrics, RejectReason, ScoreProfile,
};
use crate::upload::UploadBatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

/// One image in a request body. `data` is base64, optionally as a data URL.
#[derive(Debug, Clone, Deserialize)]
pub struct FilePayload {
    pub name: String,
    pub data: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub entity_id: String,
    pub files: Vec<FilePayload>,
    #[serde(default)]
    pub enhancement: Option<EnhancementOptions>,
    #[serde(default)]
    pub store_enhanced: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub batch: UploadBatch,
    pub accepted: Vec<String>,
    pub rejected: Vec<Rejection>,
    pub enhancements: Vec<EnhancedImage>,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub index: usize,
    pub name: String,
    pub reason: String,
    pub code: RejectReason,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct EnhancedImage {
    pub index: usize,
    pub source_reference: String,
    pub enhanced_reference: Option<String>,
    #[serde(flatten)]
    pub report: EnhancementReport,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub files: Vec<FilePayload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileVerdict {
    pub index: usize,
    pub name: String,
    #[serde(flatten)]
    pub verdict: GateVerdict,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub accepted: usize,
    pub rejected: usize,
    pub results: Vec<FileVerdict>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub file: FilePayload,
    #[serde(default)]
    pub profile: ScoreProfile,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub profile: ScoreProfile,
    pub metrics: QualityMetrics,
}

#[derive(Debug, Deserialize)]
pub struct EnhanceRequest {
    pub file: FilePayload,
    #[serde(default)]
    pub options: EnhancementOptions,
}

#[derive(Debug, Serialize)]
pub struct EnhanceResponse {
    pub name: String,
    pub content_type: String,
    pub data: String,
    #[serde(flatten)]
    pub report: EnhancementReport,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub batch_id: String,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
}
