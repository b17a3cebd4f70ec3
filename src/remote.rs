use crate::http::build_client;
use crate::record::ListingRecord;
use crate::uploads::{Asset, AssetId, AssetKind, PersistedAsset};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use urlencoding::encode;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RecordServiceError {
    #[error("record request failed: {0}")]
    Request(String),
    #[error("record service rejected the request ({status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("record {0} not found")]
    NotFound(String),
    #[error("invalid record response: {0}")]
    Deserialize(String),
}

impl RecordServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            RecordServiceError::Request(_) => "upstream",
            RecordServiceError::Rejected { .. } => "rejected",
            RecordServiceError::NotFound(_) => "not_found",
            RecordServiceError::Deserialize(_) => "upstream",
        }
    }
}

/// A committed attachment as the record service sees it.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub durable_ref: String,
    pub url: String,
    pub file_name: String,
    pub content_type: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
}

impl AssetRef {
    /// `None` unless the asset is committed.
    pub fn from_asset(asset: &Asset) -> Option<Self> {
        let (durable_ref, url) = asset.committed()?;
        Some(Self {
            durable_ref: durable_ref.to_string(),
            url: url.to_string(),
            file_name: asset.file_name.clone(),
            content_type: asset.content_type.clone(),
            size_bytes: asset.size_bytes,
        })
    }

    pub fn into_persisted(self, kind: AssetKind) -> PersistedAsset {
        PersistedAsset {
            id: AssetId::new(),
            kind,
            file_name: self.file_name,
            content_type: self.content_type,
            size_bytes: self.size_bytes,
            durable_ref: Some(self.durable_ref),
            url: Some(self.url),
            existing: true,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSubmission {
    pub record: ListingRecord,
    pub media: Vec<AssetRef>,
    pub documents: Vec<AssetRef>,
    /// Durable reference of the featured media item.
    pub featured_media: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordUpdate {
    pub record: ListingRecord,
    pub new_media: Vec<AssetRef>,
    pub new_documents: Vec<AssetRef>,
    pub deleted_media: Vec<String>,
    pub deleted_documents: Vec<String>,
    pub featured_media: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    pub record: ListingRecord,
    #[serde(default)]
    pub media: Vec<AssetRef>,
    #[serde(default)]
    pub documents: Vec<AssetRef>,
    pub featured_media: Option<String>,
}

/// Backend that owns published listings.
#[async_trait]
pub trait RecordService: Send + Sync {
    async fn create_record(&self, submission: &RecordSubmission) -> Result<String, RecordServiceError>;
    async fn update_record(&self, id: &str, update: &RecordUpdate) -> Result<(), RecordServiceError>;
    async fn get_record_by_id(&self, id: &str) -> Result<RemoteRecord, RecordServiceError>;
}

#[derive(Debug, Deserialize)]
struct CreatedRecord {
    id: String,
}

#[derive(Debug, Clone)]
pub struct HttpRecordService {
    base_url: String,
    api_key: Option<String>,
    http: Client,
}

impl HttpRecordService {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("LISTINGS_API_URL").ok()?;
        Some(Self::new(base_url, std::env::var("LISTINGS_API_KEY").ok()))
    }

    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http: build_client(),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    async fn check(response: reqwest::Response, id: Option<&str>) -> Result<reqwest::Response, RecordServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND
            && let Some(id) = id
        {
            return Err(RecordServiceError::NotFound(id.to_string()));
        }
        let detail = response.text().await.unwrap_or_default();
        Err(RecordServiceError::Rejected {
            status: status.as_u16(),
            detail,
        })
    }
}

#[async_trait]
impl RecordService for HttpRecordService {
    async fn create_record(&self, submission: &RecordSubmission) -> Result<String, RecordServiceError> {
        let response = self
            .authorize(self.http.post(format!("{}/listings", self.base_url)))
            .json(submission)
            .send()
            .await
            .map_err(|err| RecordServiceError::Request(err.to_string()))?;
        let created: CreatedRecord = Self::check(response, None)
            .await?
            .json()
            .await
            .map_err(|err| RecordServiceError::Deserialize(err.to_string()))?;
        Ok(created.id)
    }

    async fn update_record(&self, id: &str, update: &RecordUpdate) -> Result<(), RecordServiceError> {
        let response = self
            .authorize(
                self.http
                    .patch(format!("{}/listings/{}", self.base_url, encode(id))),
            )
            .json(update)
            .send()
            .await
            .map_err(|err| RecordServiceError::Request(err.to_string()))?;
        Self::check(response, Some(id)).await?;
        Ok(())
    }

    async fn get_record_by_id(&self, id: &str) -> Result<RemoteRecord, RecordServiceError> {
        let response = self
            .authorize(
                self.http
                    .get(format!("{}/listings/{}", self.base_url, encode(id))),
            )
            .send()
            .await
            .map_err(|err| RecordServiceError::Request(err.to_string()))?;
        Self::check(response, Some(id))
            .await?
            .json()
            .await
            .map_err(|err| RecordServiceError::Deserialize(err.to_string()))
    }
}

/// Process-local record store used when no listings API is configured.
#[derive(Clone, Default)]
pub struct InMemoryRecordService {
    records: Arc<Mutex<HashMap<String, RemoteRecord>>>,
}

impl InMemoryRecordService {
    pub async fn count(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl RecordService for InMemoryRecordService {
    async fn create_record(&self, submission: &RecordSubmission) -> Result<String, RecordServiceError> {
        let id = format!("lst_{}", Uuid::new_v4().simple());
        let record = RemoteRecord {
            id: id.clone(),
            record: submission.record.clone(),
            media: submission.media.clone(),
            documents: submission.documents.clone(),
            featured_media: submission.featured_media.clone(),
        };
        self.records.lock().await.insert(id.clone(), record);
        info!(target = "hermes.records", record = %id, "listing stored in memory");
        Ok(id)
    }

    async fn update_record(&self, id: &str, update: &RecordUpdate) -> Result<(), RecordServiceError> {
        let mut guard = self.records.lock().await;
        let existing = guard
            .get_mut(id)
            .ok_or_else(|| RecordServiceError::NotFound(id.to_string()))?;
        existing.record = update.record.clone();
        existing
            .media
            .retain(|asset| !update.deleted_media.contains(&asset.durable_ref));
        existing
            .documents
            .retain(|asset| !update.deleted_documents.contains(&asset.durable_ref));
        existing.media.extend(update.new_media.iter().cloned());
        existing.documents.extend(update.new_documents.iter().cloned());
        existing.featured_media = update.featured_media.clone();
        info!(target = "hermes.records", record = %id, "listing updated in memory");
        Ok(())
    }

    async fn get_record_by_id(&self, id: &str) -> Result<RemoteRecord, RecordServiceError> {
        self.records
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RecordServiceError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploads::{AssetTransition, StoredObject};

    fn asset_ref(name: &str) -> AssetRef {
        AssetRef {
            durable_ref: format!("objects/{name}"),
            url: format!("https://cdn.test/objects/{name}"),
            file_name: name.to_string(),
            content_type: None,
            size_bytes: 1,
        }
    }

    #[tokio::test]
    async fn in_memory_service_applies_updates() {
        let service = InMemoryRecordService::default();
        let id = service
            .create_record(&RecordSubmission {
                record: ListingRecord::default(),
                media: vec![asset_ref("a.jpg"), asset_ref("b.jpg")],
                documents: Vec::new(),
                featured_media: Some("objects/a.jpg".into()),
            })
            .await
            .expect("created");
        assert!(id.starts_with("lst_"));

        service
            .update_record(
                &id,
                &RecordUpdate {
                    record: ListingRecord::default(),
                    new_media: vec![asset_ref("c.jpg")],
                    new_documents: Vec::new(),
                    deleted_media: vec!["objects/a.jpg".into()],
                    deleted_documents: Vec::new(),
                    featured_media: Some("objects/c.jpg".into()),
                },
            )
            .await
            .expect("updated");

        let stored = service.get_record_by_id(&id).await.expect("stored");
        let names: Vec<&str> = stored.media.iter().map(|m| m.file_name.as_str()).collect();
        assert_eq!(names, ["b.jpg", "c.jpg"]);
        assert_eq!(stored.featured_media.as_deref(), Some("objects/c.jpg"));
        assert!(matches!(
            service.get_record_by_id("lst_missing").await,
            Err(RecordServiceError::NotFound(_))
        ));
        assert_eq!(service.count().await, 1);
    }

    #[test]
    fn only_committed_assets_become_refs() {
        let mut asset = Asset::pending(AssetKind::Media, "front.jpg", None, 3, None);
        assert!(AssetRef::from_asset(&asset).is_none());
        asset.apply(AssetTransition::Started).expect("start");
        asset
            .apply(AssetTransition::Committed(StoredObject {
                durable_ref: "objects/front.jpg".into(),
                url: "https://cdn.test/objects/front.jpg".into(),
            }))
            .expect("commit");
        let reference = AssetRef::from_asset(&asset).expect("committed");
        assert_eq!(reference.durable_ref, "objects/front.jpg");

        let persisted = reference.into_persisted(AssetKind::Media);
        assert!(persisted.existing);
        assert!(Asset::from_persisted(persisted).committed().is_some());
    }

    #[test]
    fn remote_record_tolerates_missing_lists() {
        let parsed: RemoteRecord = serde_json::from_value(serde_json::json!({
            "id": "lst_1",
            "record": { "shared": { "title": "Corner cafe" } }
        }))
        .expect("parse");
        assert!(parsed.media.is_empty());
        assert_eq!(parsed.featured_media, None);
    }
}
