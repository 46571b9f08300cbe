pub mod codec;
pub mod enhance;
pub mod filters;
pub mod gate;
pub mod scorer;
pub mod stats;

use thiserror::Error;

pub use enhance::{EnhancementOptions, EnhancementReport, Enhancer};
pub use gate::{GateVerdict, RejectReason};
pub use scorer::{QualityMetrics, ScoreProfile};

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("encode failed: {0}")]
    Encode(String),
}
