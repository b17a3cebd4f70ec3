use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeSet;

use crate::record::ListingRecord;
use crate::uploads::asset::{PersistedAsset, is_durable_url};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Edit-mode bookkeeping that has to survive a reload.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditingSnapshot {
    pub record_id: String,
    #[serde(default)]
    pub deleted_media: Vec<String>,
    #[serde(default)]
    pub deleted_documents: Vec<String>,
}

/// Everything the store writes for one session. Only durable data fits in
/// here; live previews and in-flight transfers have no representation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub record: ListingRecord,
    pub active_step: usize,
    pub visited_steps: BTreeSet<usize>,
    pub featured_media: Option<usize>,
    pub media: Vec<PersistedAsset>,
    pub documents: Vec<PersistedAsset>,
    pub editing: Option<EditingSnapshot>,
    pub saved_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    /// Normalises the snapshot so whatever is written can be read back into a
    /// consistent session.
    pub fn sanitised(mut self) -> Self {
        self.visited_steps.insert(0);
        self.visited_steps.insert(self.active_step);
        for asset in self.media.iter_mut().chain(self.documents.iter_mut()) {
            if asset.url.as_deref().is_some_and(|url| !is_durable_url(url)) {
                asset.url = None;
            }
            if asset.durable_ref.as_deref().is_some_and(|r| r.trim().is_empty()) {
                asset.durable_ref = None;
            }
        }
        self.featured_media = self
            .featured_media
            .filter(|index| *index < self.media.len());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RecordEnvelope {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub record: ListingRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKey {
    Record,
    ActiveStep,
    VisitedSteps,
    FeaturedMedia,
    Media,
    Documents,
    Editing,
}

impl SnapshotKey {
    pub const ALL: [SnapshotKey; 7] = [
        SnapshotKey::Record,
        SnapshotKey::ActiveStep,
        SnapshotKey::VisitedSteps,
        SnapshotKey::FeaturedMedia,
        SnapshotKey::Media,
        SnapshotKey::Documents,
        SnapshotKey::Editing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKey::Record => "record",
            SnapshotKey::ActiveStep => "active_step",
            SnapshotKey::VisitedSteps => "visited_steps",
            SnapshotKey::FeaturedMedia => "featured_media",
            SnapshotKey::Media => "media",
            SnapshotKey::Documents => "documents",
            SnapshotKey::Editing => "editing",
        }
    }
}

/// Key layout `<prefix>:<session>:<key>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotKeys {
    namespace: String,
}

impl SnapshotKeys {
    pub fn new(prefix: &str, session: &str) -> Self {
        Self {
            namespace: format!("{}:{}", prefix.trim_end_matches(':'), session),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self, key: SnapshotKey) -> String {
        format!("{}:{}", self.namespace, key.as_str())
    }

    pub fn all(&self) -> Vec<String> {
        SnapshotKey::ALL.iter().map(|key| self.key(*key)).collect()
    }
}

/// Serialises one value per key. `editing: None` and `featured_media: None`
/// are written as JSON `null` so stale values are overwritten.
pub(crate) fn encode(snapshot: &SessionSnapshot) -> Result<Vec<(SnapshotKey, String)>, serde_json::Error> {
    let envelope = RecordEnvelope {
        version: SNAPSHOT_VERSION,
        saved_at: snapshot.saved_at.unwrap_or_else(Utc::now),
        record: snapshot.record.clone(),
    };
    Ok(vec![
        (SnapshotKey::Record, serde_json::to_string(&envelope)?),
        (SnapshotKey::ActiveStep, serde_json::to_string(&snapshot.active_step)?),
        (SnapshotKey::VisitedSteps, serde_json::to_string(&snapshot.visited_steps)?),
        (SnapshotKey::FeaturedMedia, serde_json::to_string(&snapshot.featured_media)?),
        (SnapshotKey::Media, serde_json::to_string(&snapshot.media)?),
        (SnapshotKey::Documents, serde_json::to_string(&snapshot.documents)?),
        (SnapshotKey::Editing, serde_json::to_string(&snapshot.editing)?),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploads::asset::{AssetId, AssetKind};

    #[test]
    fn sanitising_strips_ephemeral_urls_and_fixes_pointers() {
        let snapshot = SessionSnapshot {
            active_step: 2,
            featured_media: Some(3),
            media: vec![PersistedAsset {
                id: AssetId::new(),
                kind: AssetKind::Media,
                file_name: "shop.jpg".into(),
                content_type: Some("image/jpeg".into()),
                size_bytes: 42,
                durable_ref: Some("listings/shop.jpg".into()),
                url: Some("blob:http://localhost/abc".into()),
                existing: false,
            }],
            ..SessionSnapshot::default()
        }
        .sanitised();

        assert_eq!(snapshot.visited_steps, BTreeSet::from([0, 2]));
        assert_eq!(snapshot.featured_media, None);
        assert_eq!(snapshot.media[0].url, None);
        assert_eq!(snapshot.media[0].durable_ref.as_deref(), Some("listings/shop.jpg"));
    }

    #[test]
    fn keys_are_namespaced_per_session() {
        let keys = SnapshotKeys::new("hermes.wizard:", "abc");
        assert_eq!(keys.key(SnapshotKey::Record), "hermes.wizard:abc:record");
        assert_eq!(keys.all().len(), 7);
        assert!(keys.all().iter().all(|k| k.starts_with("hermes.wizard:abc:")));
    }

    #[test]
    fn encoding_writes_every_key() {
        let encoded = encode(&SessionSnapshot::default()).expect("encode");
        let written: Vec<SnapshotKey> = encoded.iter().map(|(key, _)| *key).collect();
        assert_eq!(written, SnapshotKey::ALL.to_vec());
        let (_, featured) = &encoded[3];
        assert_eq!(featured, "null");
    }
}
