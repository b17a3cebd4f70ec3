use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(Uuid);

impl AssetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for AssetId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Media,
    Document,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Media => "media",
            AssetKind::Document => "document",
        }
    }

    pub fn from_str(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "media" | "image" | "images" | "photo" | "photos" => Some(AssetKind::Media),
            "document" | "documents" | "doc" | "docs" => Some(AssetKind::Document),
            _ => None,
        }
    }
}

/// Session-local preview resource. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PreviewHandle(Uuid);

impl PreviewHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PreviewHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AssetState {
    PlaceholderPending {
        #[serde(skip)]
        preview: Option<PreviewHandle>,
    },
    Uploading {
        #[serde(skip)]
        preview: Option<PreviewHandle>,
        progress: u8,
    },
    Committed {
        durable_ref: String,
        url: String,
    },
    Error {
        message: String,
    },
    PlaceholderOrphaned {
        durable_ref: Option<String>,
    },
}

impl AssetState {
    pub fn name(&self) -> &'static str {
        match self {
            AssetState::PlaceholderPending { .. } => "placeholder_pending",
            AssetState::Uploading { .. } => "uploading",
            AssetState::Committed { .. } => "committed",
            AssetState::Error { .. } => "error",
            AssetState::PlaceholderOrphaned { .. } => "placeholder_orphaned",
        }
    }

    pub fn preview(&self) -> Option<PreviewHandle> {
        match self {
            AssetState::PlaceholderPending { preview } | AssetState::Uploading { preview, .. } => {
                *preview
            }
            _ => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            AssetState::PlaceholderPending { .. } | AssetState::Uploading { .. }
        )
    }

    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            AssetState::Error { .. } | AssetState::PlaceholderOrphaned { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub durable_ref: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetTransition {
    Started,
    Progress(u8),
    Committed(StoredObject),
    Failed(String),
    Retried { preview: Option<PreviewHandle> },
    Orphaned,
}

impl AssetTransition {
    fn name(&self) -> &'static str {
        match self {
            AssetTransition::Started => "started",
            AssetTransition::Progress(_) => "progress",
            AssetTransition::Committed(_) => "committed",
            AssetTransition::Failed(_) => "failed",
            AssetTransition::Retried { .. } => "retried",
            AssetTransition::Orphaned => "orphaned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("asset cannot go from {from} via {event}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub event: &'static str,
}

/// The asset lifecycle as a pure reducer.
pub fn transition(state: &AssetState, event: AssetTransition) -> Result<AssetState, InvalidTransition> {
    let invalid = InvalidTransition {
        from: state.name(),
        event: event.name(),
    };
    match (state, event) {
        (AssetState::PlaceholderPending { preview }, AssetTransition::Started) => {
            Ok(AssetState::Uploading {
                preview: *preview,
                progress: 0,
            })
        }
        (AssetState::Uploading { preview, progress }, AssetTransition::Progress(next)) => {
            Ok(AssetState::Uploading {
                preview: *preview,
                progress: (*progress).max(next.min(100)),
            })
        }
        (AssetState::Uploading { .. }, AssetTransition::Committed(stored)) => {
            Ok(AssetState::Committed {
                durable_ref: stored.durable_ref,
                url: stored.url,
            })
        }
        (
            AssetState::PlaceholderPending { .. } | AssetState::Uploading { .. },
            AssetTransition::Failed(message),
        ) => Ok(AssetState::Error { message }),
        (
            AssetState::Error { .. } | AssetState::PlaceholderOrphaned { .. },
            AssetTransition::Retried { preview },
        ) => Ok(AssetState::PlaceholderPending { preview }),
        (AssetState::Committed { durable_ref, .. }, AssetTransition::Orphaned) => {
            Ok(AssetState::PlaceholderOrphaned {
                durable_ref: Some(durable_ref.clone()),
            })
        }
        _ => Err(invalid),
    }
}

pub fn is_durable_url(url: &str) -> bool {
    let url = url.trim().to_ascii_lowercase();
    url.starts_with("https://") || url.starts_with("http://")
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Asset {
    pub id: AssetId,
    pub kind: AssetKind,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size_bytes: u64,
    #[serde(flatten)]
    pub state: AssetState,
    /// Already attached to the remote record when an edit session started.
    pub existing: bool,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl Asset {
    pub fn pending(
        kind: AssetKind,
        file_name: impl Into<String>,
        content_type: Option<String>,
        size_bytes: u64,
        preview: Option<PreviewHandle>,
    ) -> Self {
        Self {
            id: AssetId::new(),
            kind,
            file_name: file_name.into(),
            content_type,
            size_bytes,
            state: AssetState::PlaceholderPending { preview },
            existing: false,
            attempt: 1,
            created_at: Utc::now(),
        }
    }

    pub fn committed(&self) -> Option<(&str, &str)> {
        match &self.state {
            AssetState::Committed { durable_ref, url } => Some((durable_ref, url)),
            _ => None,
        }
    }

    pub fn apply(&mut self, event: AssetTransition) -> Result<(), InvalidTransition> {
        self.state = transition(&self.state, event)?;
        Ok(())
    }

    /// Durable projection. Preview handles and non-http urls never leave the
    /// process.
    pub fn to_persisted(&self) -> PersistedAsset {
        let (durable_ref, url) = match &self.state {
            AssetState::Committed { durable_ref, url } => (
                Some(durable_ref.clone()),
                is_durable_url(url).then(|| url.clone()),
            ),
            AssetState::PlaceholderOrphaned { durable_ref } => (durable_ref.clone(), None),
            _ => (None, None),
        };
        PersistedAsset {
            id: self.id,
            kind: self.kind,
            file_name: self.file_name.clone(),
            content_type: self.content_type.clone(),
            size_bytes: self.size_bytes,
            durable_ref,
            url,
            existing: self.existing,
        }
    }

    /// Rebuilds an asset from a prior session. Anything without a resolvable
    /// durable reference comes back orphaned.
    pub fn from_persisted(persisted: PersistedAsset) -> Self {
        let state = match (persisted.durable_ref.clone(), persisted.url.clone()) {
            (Some(durable_ref), Some(url)) if !durable_ref.trim().is_empty() => {
                let committed = AssetState::Committed { durable_ref, url };
                if state_url_resolves(&committed) {
                    committed
                } else {
                    transition(&committed, AssetTransition::Orphaned).unwrap_or_else(|_| {
                        AssetState::PlaceholderOrphaned {
                            durable_ref: persisted.durable_ref.clone(),
                        }
                    })
                }
            }
            (durable_ref, _) => AssetState::PlaceholderOrphaned { durable_ref },
        };
        Self {
            id: persisted.id,
            kind: persisted.kind,
            file_name: persisted.file_name,
            content_type: persisted.content_type,
            size_bytes: persisted.size_bytes,
            state,
            existing: persisted.existing,
            attempt: 0,
            created_at: Utc::now(),
        }
    }
}

fn state_url_resolves(state: &AssetState) -> bool {
    matches!(state, AssetState::Committed { url, .. } if is_durable_url(url))
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedAsset {
    pub id: AssetId,
    pub kind: AssetKind,
    pub file_name: String,
    pub content_type: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
    pub durable_ref: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub existing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShelfError {
    #[error("asset {0} not found")]
    NotFound(AssetId),
    #[error("media index {0} is out of range")]
    FeaturedOutOfRange(usize),
}

/// Media and document lists plus the featured-media pointer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssetShelf {
    pub media: Vec<Asset>,
    pub documents: Vec<Asset>,
    pub featured_media: Option<usize>,
}

impl AssetShelf {
    pub fn list(&self, kind: AssetKind) -> &[Asset] {
        match kind {
            AssetKind::Media => &self.media,
            AssetKind::Document => &self.documents,
        }
    }

    pub fn list_mut(&mut self, kind: AssetKind) -> &mut Vec<Asset> {
        match kind {
            AssetKind::Media => &mut self.media,
            AssetKind::Document => &mut self.documents,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.media.iter().chain(self.documents.iter())
    }

    pub fn find(&self, id: AssetId) -> Option<&Asset> {
        self.iter().find(|asset| asset.id == id)
    }

    pub fn find_mut(&mut self, id: AssetId) -> Option<&mut Asset> {
        self.media
            .iter_mut()
            .chain(self.documents.iter_mut())
            .find(|asset| asset.id == id)
    }

    pub fn push(&mut self, asset: Asset) {
        self.list_mut(asset.kind).push(asset);
    }

    /// Removes the asset and keeps the featured pointer on the same media
    /// item, or resets it when the featured item itself goes.
    pub fn remove(&mut self, id: AssetId) -> Result<Asset, ShelfError> {
        if let Some(index) = self.media.iter().position(|asset| asset.id == id) {
            self.featured_media = match self.featured_media {
                Some(featured) if featured == index => None,
                Some(featured) if featured > index => Some(featured - 1),
                other => other,
            };
            return Ok(self.media.remove(index));
        }
        let index = self
            .documents
            .iter()
            .position(|asset| asset.id == id)
            .ok_or(ShelfError::NotFound(id))?;
        Ok(self.documents.remove(index))
    }

    pub fn set_featured(&mut self, index: Option<usize>) -> Result<(), ShelfError> {
        if let Some(index) = index
            && index >= self.media.len()
        {
            return Err(ShelfError::FeaturedOutOfRange(index));
        }
        self.featured_media = index;
        Ok(())
    }

    pub fn in_flight(&self) -> usize {
        self.iter().filter(|asset| asset.state.is_in_flight()).count()
    }

    pub fn needing_attention(&self) -> usize {
        self.iter().filter(|asset| asset.state.needs_attention()).count()
    }

    pub fn committed(&self, kind: AssetKind) -> impl Iterator<Item = &Asset> {
        self.list(kind).iter().filter(|asset| asset.committed().is_some())
    }

    pub fn persisted(&self, kind: AssetKind) -> Vec<PersistedAsset> {
        self.list(kind).iter().map(Asset::to_persisted).collect()
    }

    pub fn restore(
        media: Vec<PersistedAsset>,
        documents: Vec<PersistedAsset>,
        featured_media: Option<usize>,
    ) -> Self {
        let media: Vec<Asset> = media.into_iter().map(Asset::from_persisted).collect();
        let featured_media = featured_media.filter(|index| *index < media.len());
        Self {
            media,
            documents: documents.into_iter().map(Asset::from_persisted).collect(),
            featured_media,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(name: &str) -> StoredObject {
        StoredObject {
            durable_ref: format!("listings/{name}"),
            url: format!("https://cdn.example.com/listings/{name}"),
        }
    }

    #[test]
    fn lifecycle_follows_the_happy_path() {
        let preview = PreviewHandle::new();
        let mut asset = Asset::pending(AssetKind::Media, "front.jpg", None, 10, Some(preview));
        asset.apply(AssetTransition::Started).expect("start");
        asset.apply(AssetTransition::Progress(40)).expect("progress");
        asset.apply(AssetTransition::Progress(20)).expect("progress");
        assert_eq!(
            asset.state,
            AssetState::Uploading {
                preview: Some(preview),
                progress: 40
            }
        );
        asset.apply(AssetTransition::Committed(stored("front.jpg"))).expect("commit");
        assert_eq!(asset.committed().map(|(r, _)| r), Some("listings/front.jpg"));
        assert_eq!(asset.state.preview(), None);
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let committed = AssetState::Committed {
            durable_ref: "a".into(),
            url: "https://x/a".into(),
        };
        assert!(transition(&committed, AssetTransition::Started).is_err());
        assert!(transition(&committed, AssetTransition::Retried { preview: None }).is_err());
        let pending = AssetState::PlaceholderPending { preview: None };
        assert!(transition(&pending, AssetTransition::Committed(stored("a"))).is_err());
        assert!(transition(&pending, AssetTransition::Orphaned).is_err());
        let err = transition(&pending, AssetTransition::Orphaned).expect_err("invalid");
        assert_eq!(err.from, "placeholder_pending");
    }

    #[test]
    fn error_and_orphaned_can_retry() {
        let error = AssetState::Error {
            message: "stalled".into(),
        };
        let orphaned = AssetState::PlaceholderOrphaned { durable_ref: None };
        for state in [error, orphaned] {
            let next = transition(&state, AssetTransition::Retried { preview: None }).expect("retry");
            assert!(matches!(next, AssetState::PlaceholderPending { .. }));
        }
    }

    #[test]
    fn persisted_projection_drops_local_only_data() {
        let mut asset = Asset::pending(
            AssetKind::Media,
            "x.png",
            None,
            1,
            Some(PreviewHandle::new()),
        );
        let persisted = asset.to_persisted();
        assert!(persisted.durable_ref.is_none());
        assert!(persisted.url.is_none());

        asset.apply(AssetTransition::Started).expect("start");
        asset
            .apply(AssetTransition::Committed(StoredObject {
                durable_ref: "tmp/x.png".into(),
                url: "blob:local/123".into(),
            }))
            .expect("commit");
        let persisted = asset.to_persisted();
        assert_eq!(persisted.durable_ref.as_deref(), Some("tmp/x.png"));
        assert!(persisted.url.is_none());
    }

    #[test]
    fn restore_orphans_unresolvable_references() {
        let base = PersistedAsset {
            id: AssetId::new(),
            kind: AssetKind::Media,
            file_name: "a.jpg".into(),
            content_type: None,
            size_bytes: 1,
            durable_ref: Some("listings/a.jpg".into()),
            url: Some("https://cdn.example.com/a.jpg".into()),
            existing: false,
        };
        let good = Asset::from_persisted(base.clone());
        assert!(good.committed().is_some());

        let blob = Asset::from_persisted(PersistedAsset {
            url: Some("blob:session/9".into()),
            ..base.clone()
        });
        assert_eq!(
            blob.state,
            AssetState::PlaceholderOrphaned {
                durable_ref: Some("listings/a.jpg".into())
            }
        );

        let missing = Asset::from_persisted(PersistedAsset {
            durable_ref: None,
            url: None,
            ..base
        });
        assert!(missing.state.needs_attention());
    }

    #[test]
    fn removing_media_moves_featured_pointer() {
        let mut shelf = AssetShelf::default();
        let ids: Vec<AssetId> = (0..3)
            .map(|i| {
                let asset = Asset::pending(AssetKind::Media, format!("{i}.jpg"), None, 1, None);
                let id = asset.id;
                shelf.push(asset);
                id
            })
            .collect();
        shelf.set_featured(Some(2)).expect("in range");
        shelf.remove(ids[0]).expect("removed");
        assert_eq!(shelf.featured_media, Some(1));
        shelf.remove(ids[2]).expect("removed");
        assert_eq!(shelf.featured_media, None);
        assert_eq!(shelf.set_featured(Some(4)), Err(ShelfError::FeaturedOutOfRange(4)));
        assert_eq!(shelf.remove(ids[2]), Err(ShelfError::NotFound(ids[2])));
    }
}
