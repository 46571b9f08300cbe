use super::{
    BlobStore, ImageCatalog, StorageError,
    config::{IMAGES_COLUMN, IMAGES_TABLE, STORAGE_BUCKET},
};
use crate::http::build_client;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use urlencoding::encode;

#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    service_key: String,
    bucket: String,
    table: String,
    column: String,
    http: Client,
}

impl SupabaseClient {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self::new(&base_url, service_key))
    }

    pub fn new(base_url: &str, service_key: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            bucket: STORAGE_BUCKET.clone(),
            table: IMAGES_TABLE.clone(),
            column: IMAGES_COLUMN.clone(),
            http: build_client(),
        }
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            self.bucket,
            encode_path(path)
        )
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            encode_path(path)
        )
    }

    fn row_url(&self, entity_id: &str) -> String {
        format!(
            "{}/rest/v1/{}?id=eq.{}",
            self.base_url,
            self.table,
            encode(entity_id)
        )
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, StorageError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(StorageError::Status { status, body })
}

#[async_trait]
impl BlobStore for SupabaseClient {
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        let response = self
            .authed(self.http.post(self.object_url(path)))
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .header("Cache-Control", "max-age=3600")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?;
        ensure_success(response).await?;
        Ok(self.public_url(path))
    }
}

#[async_trait]
impl ImageCatalog for SupabaseClient {
    async fn list_images(&self, entity_id: &str) -> Result<Vec<String>, StorageError> {
        let url = format!("{}&select={}&limit=1", self.row_url(entity_id), self.column);
        let response = self
            .authed(self.http.get(url))
            .send()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?;
        let mut rows: Vec<Map<String, Value>> = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|err| StorageError::Deserialize(err.to_string()))?;
        let row = rows
            .pop()
            .ok_or_else(|| StorageError::NotFound(entity_id.to_string()))?;
        images_from_row(&row, &self.column)
    }

    async fn append_images(
        &self,
        entity_id: &str,
        references: &[String],
    ) -> Result<(), StorageError> {
        if references.is_empty() {
            return Ok(());
        }
        // PostgREST has no array append; read-modify-write the column.
        let mut images = self.list_images(entity_id).await?;
        images.extend(references.iter().cloned());
        let mut body = Map::new();
        body.insert(self.column.clone(), Value::from(images));
        let response = self
            .authed(self.http.patch(self.row_url(entity_id)))
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?;
        ensure_success(response).await?;
        Ok(())
    }
}

fn images_from_row(row: &Map<String, Value>, column: &str) -> Result<Vec<String>, StorageError> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect()),
        Some(other) => Err(StorageError::Deserialize(format!(
            "expected array in `{column}`, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn urls_are_encoded_per_segment() {
        let client = SupabaseClient::new("https://demo.supabase.co/", "key".into());
        assert_eq!(
            client.public_url("coin 1/17-abc.jpg"),
            "https://demo.supabase.co/storage/v1/object/public/coin-images/coin%201/17-abc.jpg"
        );
        assert_eq!(
            client.row_url("a&b"),
            "https://demo.supabase.co/rest/v1/coins?id=eq.a%26b"
        );
    }

    #[test]
    fn image_column_parsing() {
        let row = json!({"images": ["a", "b", 3]});
        let row = row.as_object().unwrap();
        assert_eq!(images_from_row(row, "images").unwrap(), vec!["a", "b"]);

        let empty = json!({"images": null});
        assert!(images_from_row(empty.as_object().unwrap(), "images")
            .unwrap()
            .is_empty());

        let wrong = json!({"images": "a"});
        assert!(images_from_row(wrong.as_object().unwrap(), "images").is_err());
    }
}
