pub mod config;
pub mod memory;
pub mod supabase;

use crate::random::RandomSource;
use async_trait::async_trait;
use thiserror::Error;

pub use memory::{MemoryBlobStore, MemoryCatalog};
pub use supabase::SupabaseClient;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Deserialize(String),
    #[error("entity not found: {0}")]
    NotFound(String),
}

/// Opaque "store bytes, return a reference" operation.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str)
    -> Result<String, StorageError>;
}

/// Per-entity list of accepted image references, owned by the backend.
#[async_trait]
pub trait ImageCatalog: Send + Sync {
    async fn list_images(&self, entity_id: &str) -> Result<Vec<String>, StorageError>;

    async fn append_images(
        &self,
        entity_id: &str,
        references: &[String],
    ) -> Result<(), StorageError>;
}

pub const OBJECT_TOKEN_LEN: usize = 10;

/// `{entity}/{unix_millis}-{token}.{ext}`; the entity id is sanitised so it
/// cannot introduce extra path segments.
pub fn object_path(
    entity_id: &str,
    extension: &str,
    timestamp_millis: i64,
    random: &dyn RandomSource,
) -> String {
    let entity: String = entity_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{entity}/{timestamp_millis}-{}.{extension}",
        random.token(OBJECT_TOKEN_LEN)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SeededRandom;

    #[test]
    fn object_path_is_flat_and_unique() {
        let random = SeededRandom::new(1);
        let a = object_path("coin/../42", "jpg", 1_700_000_000_000, &random);
        let b = object_path("coin/../42", "jpg", 1_700_000_000_000, &random);
        assert!(a.starts_with("coin____42/1700000000000-"));
        assert!(a.ends_with(".jpg"));
        assert_eq!(a.matches('/').count(), 1);
        assert_ne!(a, b);
    }
}
