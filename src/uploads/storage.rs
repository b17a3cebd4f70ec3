use crate::http::build_upload_client;
use crate::uploads::asset::StoredObject;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use urlencoding::encode;
use uuid::Uuid;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage request failed: {0}")]
    Request(String),
    #[error("storage rejected the object: {0}")]
    Rejected(String),
    #[error("object not found: {0}")]
    NotFound(String),
}

impl StorageError {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Request(_) => "request",
            StorageError::Rejected(_) => "rejected",
            StorageError::NotFound(_) => "not_found",
        }
    }
}

/// File contents selected for upload. Cheap to clone so a failed attempt can
/// be retried without asking for the file again.
#[derive(Debug, Clone)]
pub struct UploadBlob {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Arc<Vec<u8>>,
}

impl UploadBlob {
    pub fn new(file_name: impl Into<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type,
            bytes: Arc::new(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn chunks(&self) -> Vec<Vec<u8>> {
        self.bytes.chunks(CHUNK_SIZE).map(<[u8]>::to_vec).collect()
    }
}

/// Progress reporter handed to a transfer, in whole percent.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<u8>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::UnboundedSender<u8>) -> Self {
        Self { tx }
    }

    pub fn report(&self, percent: u8) {
        let _ = self.tx.send(percent.min(100));
    }

    pub fn report_bytes(&self, sent: usize, total: usize) {
        let percent = if total == 0 { 100 } else { sent * 100 / total };
        self.report(percent as u8);
    }
}

/// Durable object store for uploaded binaries.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(&self, blob: UploadBlob, progress: ProgressSink) -> Result<StoredObject, StorageError>;
    async fn delete(&self, durable_ref: &str) -> Result<(), StorageError>;
}

fn object_path(file_name: &str) -> String {
    let name = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name).trim();
    let name = if name.is_empty() { "upload" } else { name };
    format!("{}/{}", Uuid::new_v4(), encode(name))
}

/// Supabase Storage over its REST API.
#[derive(Debug, Clone)]
pub struct SupabaseStorage {
    base_url: String,
    service_key: String,
    bucket: String,
    http: Client,
}

impl SupabaseStorage {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        let bucket = std::env::var("SUPABASE_STORAGE_BUCKET")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "listing-assets".to_string());
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            bucket,
            http: build_upload_client(),
        })
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path)
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }
}

#[async_trait]
impl ObjectStorage for SupabaseStorage {
    async fn upload(&self, blob: UploadBlob, progress: ProgressSink) -> Result<StoredObject, StorageError> {
        let path = object_path(&blob.file_name);
        let total = blob.len();
        let content_type = blob
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let mut sent = 0usize;
        let chunk_progress = progress.clone();
        let body = futures::stream::iter(blob.chunks().into_iter().map(move |chunk| {
            sent += chunk.len();
            chunk_progress.report_bytes(sent, total);
            Ok::<Vec<u8>, std::io::Error>(chunk)
        }));

        let response = self
            .http
            .post(self.object_url(&path))
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", content_type)
            .header("Content-Length", total.to_string())
            .header("x-upsert", "false")
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected(format!("HTTP {status}: {detail}")));
        }

        progress.report(100);
        Ok(StoredObject {
            url: self.public_url(&path),
            durable_ref: path,
        })
    }

    async fn delete(&self, durable_ref: &str) -> Result<(), StorageError> {
        let response = self
            .http
            .delete(self.object_url(durable_ref))
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .send()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(durable_ref.to_string()));
        }
        if !response.status().is_success() {
            return Err(StorageError::Rejected(format!("HTTP {}", response.status())));
        }
        Ok(())
    }
}

/// In-process object store. Its urls use the `memory://` scheme, so assets
/// stored here come back orphaned after a restart.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    public_base: String,
    step_delay: Duration,
    objects: Arc<Mutex<HashMap<String, usize>>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new("memory://objects", Duration::from_millis(25))
    }
}

impl MemoryStorage {
    pub fn new(public_base: impl Into<String>, step_delay: Duration) -> Self {
        Self {
            public_base: public_base.into().trim_end_matches('/').to_string(),
            step_delay,
            objects: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn contains(&self, durable_ref: &str) -> bool {
        self.objects.lock().await.contains_key(durable_ref)
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(&self, blob: UploadBlob, progress: ProgressSink) -> Result<StoredObject, StorageError> {
        let total = blob.len();
        let mut sent = 0usize;
        for chunk in blob.bytes.chunks(CHUNK_SIZE.min(total.max(1) / 4 + 1)) {
            tokio::time::sleep(self.step_delay).await;
            sent += chunk.len();
            progress.report_bytes(sent, total);
        }
        progress.report(100);

        let durable_ref = object_path(&blob.file_name);
        self.objects.lock().await.insert(durable_ref.clone(), total);
        Ok(StoredObject {
            url: format!("{}/{}", self.public_base, durable_ref),
            durable_ref,
        })
    }

    async fn delete(&self, durable_ref: &str) -> Result<(), StorageError> {
        self.objects
            .lock()
            .await
            .remove(durable_ref)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(durable_ref.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_paths_keep_only_the_encoded_file_name() {
        let path = object_path("C:\\photos\\shop front.jpg");
        let (prefix, name) = path.split_once('/').expect("prefix");
        assert!(Uuid::parse_str(prefix).is_ok());
        assert_eq!(name, "shop%20front.jpg");
        assert!(object_path("  ").ends_with("/upload"));
    }

    #[tokio::test(start_paused = true)]
    async fn memory_storage_reports_progress_and_stores() {
        let storage = MemoryStorage::new("https://cdn.test", Duration::from_millis(10));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stored = storage
            .upload(UploadBlob::new("a.jpg", None, vec![7; 4000]), ProgressSink::new(tx))
            .await
            .expect("upload");

        let mut seen = Vec::new();
        while let Ok(percent) = rx.try_recv() {
            seen.push(percent);
        }
        assert!(seen.len() > 2);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last(), Some(&100));
        assert!(stored.url.starts_with("https://cdn.test/"));
        assert!(storage.contains(&stored.durable_ref).await);

        storage.delete(&stored.durable_ref).await.expect("delete");
        assert!(matches!(
            storage.delete(&stored.durable_ref).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
