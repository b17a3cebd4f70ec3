pub mod asset;
pub mod storage;

pub use asset::{
    Asset, AssetId, AssetKind, AssetShelf, AssetState, AssetTransition, InvalidTransition,
    PersistedAsset, PreviewHandle, ShelfError, StoredObject,
};
pub use storage::{MemoryStorage, ObjectStorage, ProgressSink, StorageError, SupabaseStorage, UploadBlob};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::metrics;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error(transparent)]
    Shelf(#[from] ShelfError),
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
    #[error("asset {0} has no file to retry with, select it again")]
    BlobUnavailable(AssetId),
}

impl UploadError {
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::Shelf(ShelfError::NotFound(_)) => "not_found",
            UploadError::Shelf(ShelfError::FeaturedOutOfRange(_)) => "invalid",
            UploadError::Transition(_) => "conflict",
            UploadError::BlobUnavailable(_) => "invalid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEventKind {
    Started,
    Progress(u8),
    Finished(Result<StoredObject, String>),
}

/// Message from a transfer task. `attempt` ties it to one try of the asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEvent {
    pub asset: AssetId,
    pub attempt: u32,
    pub kind: UploadEventKind,
}

/// Live local preview resources.
#[derive(Debug, Default)]
pub struct PreviewRegistry {
    live: HashSet<PreviewHandle>,
}

impl PreviewRegistry {
    pub fn create(&mut self) -> PreviewHandle {
        let handle = PreviewHandle::new();
        self.live.insert(handle);
        handle
    }

    pub fn revoke(&mut self, handle: PreviewHandle) -> bool {
        self.live.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

/// Runs transfers in the background and reconciles their outcome into an
/// [`AssetShelf`]. The shelf itself stays with the session; every call that
/// changes it takes it by `&mut`.
pub struct UploadOrchestrator {
    storage: Arc<dyn ObjectStorage>,
    previews: PreviewRegistry,
    blobs: HashMap<AssetId, UploadBlob>,
    tasks: HashMap<AssetId, JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<UploadEvent>,
    events_rx: mpsc::UnboundedReceiver<UploadEvent>,
    stall_timeout: Duration,
    idle_debounce: Duration,
    settled_at: Option<Instant>,
}

impl UploadOrchestrator {
    pub fn new(storage: Arc<dyn ObjectStorage>, stall_timeout: Duration, idle_debounce: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            storage,
            previews: PreviewRegistry::default(),
            blobs: HashMap::new(),
            tasks: HashMap::new(),
            events_tx,
            events_rx,
            stall_timeout,
            idle_debounce,
            settled_at: None,
        }
    }

    pub fn previews(&self) -> &PreviewRegistry {
        &self.previews
    }

    /// Inserts a pending placeholder right away and starts the transfer.
    pub fn enqueue(&mut self, shelf: &mut AssetShelf, kind: AssetKind, blob: UploadBlob) -> AssetId {
        let preview = self.previews.create();
        let asset = Asset::pending(
            kind,
            blob.file_name.clone(),
            blob.content_type.clone(),
            blob.len() as u64,
            Some(preview),
        );
        let id = asset.id;
        shelf.push(asset);
        info!(
            target = "hermes.uploads",
            asset = %id,
            kind = kind.as_str(),
            bytes = blob.len(),
            "upload queued"
        );
        self.start(id, 1, blob);
        id
    }

    /// Re-enters the upload for an errored or orphaned asset under the same
    /// id. Orphans need a fresh `blob`; errored assets reuse the retained one.
    pub fn retry(
        &mut self,
        shelf: &mut AssetShelf,
        id: AssetId,
        blob: Option<UploadBlob>,
    ) -> Result<(), UploadError> {
        let asset = shelf.find_mut(id).ok_or(ShelfError::NotFound(id))?;
        let blob = blob
            .or_else(|| self.blobs.get(&id).cloned())
            .ok_or(UploadError::BlobUnavailable(id))?;

        let preview = self.previews.create();
        if let Err(err) = asset.apply(AssetTransition::Retried {
            preview: Some(preview),
        }) {
            self.previews.revoke(preview);
            return Err(err.into());
        }
        asset.file_name = blob.file_name.clone();
        asset.content_type = blob.content_type.clone();
        asset.size_bytes = blob.len() as u64;
        asset.attempt += 1;
        let attempt = asset.attempt;
        info!(target = "hermes.uploads", asset = %id, attempt, "upload retried");
        self.start(id, attempt, blob);
        Ok(())
    }

    /// Drops the asset from the shelf. In-flight transfers are aborted and
    /// their preview released; committed objects uploaded in this session are
    /// deleted in the background and a failed delete is only logged.
    /// Pre-existing assets are returned untouched for the caller to record.
    pub fn remove(&mut self, shelf: &mut AssetShelf, id: AssetId) -> Result<Asset, UploadError> {
        let was_busy = shelf.in_flight() > 0;
        let asset = shelf.remove(id)?;
        if let Some(task) = self.tasks.remove(&id) {
            task.abort();
            debug!(target = "hermes.uploads", asset = %id, "transfer cancelled");
        }
        if let Some(preview) = asset.state.preview() {
            self.previews.revoke(preview);
        }
        self.blobs.remove(&id);

        if let Some((durable_ref, _)) = asset.committed()
            && !asset.existing
        {
            let storage = self.storage.clone();
            let durable_ref = durable_ref.to_string();
            tokio::spawn(async move {
                if let Err(err) = storage.delete(&durable_ref).await {
                    warn!(
                        target = "hermes.uploads",
                        durable_ref = %durable_ref,
                        error = %err,
                        "durable delete failed, object left behind"
                    );
                }
            });
        }
        self.note_settled(shelf, was_busy);
        Ok(asset)
    }

    /// Aborts every transfer and releases every preview.
    pub fn cancel_all(&mut self, shelf: &AssetShelf) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
        for asset in shelf.iter() {
            if let Some(preview) = asset.state.preview() {
                self.previews.revoke(preview);
            }
        }
        self.blobs.clear();
        self.settled_at = None;
    }

    /// Folds one event into the shelf. Events for removed assets or from a
    /// superseded attempt are dropped. Returns whether the shelf changed.
    pub fn apply(&mut self, shelf: &mut AssetShelf, event: UploadEvent) -> bool {
        let was_busy = shelf.in_flight() > 0;
        let Some(asset) = shelf.find_mut(event.asset) else {
            return false;
        };
        if asset.attempt != event.attempt {
            debug!(
                target = "hermes.uploads",
                asset = %event.asset,
                attempt = event.attempt,
                current = asset.attempt,
                "stale upload event ignored"
            );
            return false;
        }

        let before = asset.state.preview();
        let finished = matches!(event.kind, UploadEventKind::Finished(_));
        let transition = match event.kind {
            UploadEventKind::Started => AssetTransition::Started,
            UploadEventKind::Progress(percent) => AssetTransition::Progress(percent),
            UploadEventKind::Finished(Ok(stored)) => AssetTransition::Committed(stored),
            UploadEventKind::Finished(Err(message)) => AssetTransition::Failed(message),
        };
        if let Err(err) = asset.apply(transition) {
            debug!(target = "hermes.uploads", asset = %event.asset, error = %err, "upload event ignored");
            return false;
        }

        let kind = asset.kind;
        let attempt = asset.attempt;
        let committed = asset.committed().is_some();
        if let Some(preview) = before
            && asset.state.preview().is_none()
        {
            self.previews.revoke(preview);
        }
        if finished {
            self.tasks.remove(&event.asset);
            if committed {
                self.blobs.remove(&event.asset);
                info!(target = "hermes.uploads", asset = %event.asset, "upload committed");
            } else {
                warn!(target = "hermes.uploads", asset = %event.asset, "upload failed");
            }
            metrics::upload_finished(kind.as_str(), if committed { "committed" } else { "error" }, attempt);
        }
        self.note_settled(shelf, was_busy);
        true
    }

    /// Applies every event that is already waiting. Returns how many changed
    /// the shelf.
    pub fn drain(&mut self, shelf: &mut AssetShelf) -> usize {
        let mut changed = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if self.apply(shelf, event) {
                changed += 1;
            }
        }
        changed
    }

    /// Waits for the next event from any transfer.
    pub async fn next_event(&mut self) -> Option<UploadEvent> {
        self.events_rx.recv().await
    }

    /// True while something is transferring, and for a short grace period
    /// after the last transfer settles.
    pub fn is_uploading(&self, shelf: &AssetShelf) -> bool {
        if shelf.in_flight() > 0 {
            return true;
        }
        self.settled_at
            .is_some_and(|settled| settled.elapsed() < self.idle_debounce)
    }

    fn note_settled(&mut self, shelf: &AssetShelf, was_busy: bool) {
        if was_busy && shelf.in_flight() == 0 {
            self.settled_at = Some(Instant::now());
        }
    }

    fn start(&mut self, id: AssetId, attempt: u32, blob: UploadBlob) {
        self.blobs.insert(id, blob.clone());
        let task = tokio::spawn(run_transfer(
            self.storage.clone(),
            id,
            attempt,
            blob,
            self.stall_timeout,
            self.events_tx.clone(),
        ));
        if let Some(previous) = self.tasks.insert(id, task) {
            previous.abort();
        }
    }
}

impl Drop for UploadOrchestrator {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

/// One transfer attempt. A transfer that reports no progress within
/// `stall_timeout` is abandoned as failed.
async fn run_transfer(
    storage: Arc<dyn ObjectStorage>,
    asset: AssetId,
    attempt: u32,
    blob: UploadBlob,
    stall_timeout: Duration,
    events: mpsc::UnboundedSender<UploadEvent>,
) {
    let send = |kind: UploadEventKind| {
        let _ = events.send(UploadEvent {
            asset,
            attempt,
            kind,
        });
    };
    send(UploadEventKind::Started);

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let upload = storage.upload(blob, ProgressSink::new(progress_tx));
    tokio::pin!(upload);
    let stall = tokio::time::sleep(stall_timeout);
    tokio::pin!(stall);

    let result = loop {
        tokio::select! {
            result = &mut upload => break result.map_err(|err| err.to_string()),
            Some(percent) = progress_rx.recv() => {
                stall.as_mut().reset(Instant::now() + stall_timeout);
                send(UploadEventKind::Progress(percent));
            }
            _ = &mut stall => {
                break Err(format!(
                    "upload stalled: no progress for {}s",
                    stall_timeout.as_secs()
                ));
            }
        }
    };
    send(UploadEventKind::Finished(result));
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Storage whose behaviour is picked by file name: `stall*` never makes
    /// progress, `fail*` errors, `slow*` takes a while, anything else commits.
    #[derive(Default)]
    struct ScriptedStorage {
        deletes: StdMutex<Vec<String>>,
        fail_deletes: bool,
    }

    #[async_trait]
    impl ObjectStorage for ScriptedStorage {
        async fn upload(&self, blob: UploadBlob, progress: ProgressSink) -> Result<StoredObject, StorageError> {
            if blob.file_name.starts_with("stall") {
                progress.report(10);
                std::future::pending::<()>().await;
            }
            if blob.file_name.starts_with("fail") {
                return Err(StorageError::Rejected("HTTP 413".into()));
            }
            let steps = if blob.file_name.starts_with("slow") { 20 } else { 4 };
            for step in 1..=steps {
                tokio::time::sleep(Duration::from_millis(100)).await;
                progress.report((step * 100 / steps) as u8);
            }
            Ok(StoredObject {
                durable_ref: format!("objects/{}", blob.file_name),
                url: format!("https://cdn.test/objects/{}", blob.file_name),
            })
        }

        async fn delete(&self, durable_ref: &str) -> Result<(), StorageError> {
            self.deletes.lock().expect("lock").push(durable_ref.to_string());
            if self.fail_deletes {
                return Err(StorageError::Request("connection reset".into()));
            }
            Ok(())
        }
    }

    fn orchestrator(storage: Arc<ScriptedStorage>) -> UploadOrchestrator {
        UploadOrchestrator::new(storage, Duration::from_secs(30), Duration::from_millis(300))
    }

    fn blob(name: &str) -> UploadBlob {
        UploadBlob::new(name, Some("image/jpeg".into()), vec![1, 2, 3])
    }

    async fn settle(uploads: &mut UploadOrchestrator, shelf: &mut AssetShelf) {
        while shelf.in_flight() > 0 {
            let event = uploads.next_event().await.expect("event");
            uploads.apply(shelf, event);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_is_visible_immediately() {
        let mut uploads = orchestrator(Arc::new(ScriptedStorage::default()));
        let mut shelf = AssetShelf::default();
        let id = uploads.enqueue(&mut shelf, AssetKind::Media, blob("front.jpg"));

        let asset = shelf.find(id).expect("placeholder");
        assert!(matches!(asset.state, AssetState::PlaceholderPending { preview: Some(_) }));
        assert!(uploads.is_uploading(&shelf));
        assert_eq!(uploads.previews().len(), 1);

        settle(&mut uploads, &mut shelf).await;
        assert!(shelf.find(id).expect("asset").committed().is_some());
        assert!(uploads.previews().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_transfer_errors_while_others_commit() {
        let mut uploads = orchestrator(Arc::new(ScriptedStorage::default()));
        let mut shelf = AssetShelf::default();
        let a = uploads.enqueue(&mut shelf, AssetKind::Media, blob("a.jpg"));
        let stalled = uploads.enqueue(&mut shelf, AssetKind::Media, blob("stall.jpg"));
        let c = uploads.enqueue(&mut shelf, AssetKind::Document, blob("c.pdf"));

        settle(&mut uploads, &mut shelf).await;

        assert!(shelf.find(a).expect("a").committed().is_some());
        assert!(shelf.find(c).expect("c").committed().is_some());
        match &shelf.find(stalled).expect("stalled").state {
            AssetState::Error { message } => assert!(message.contains("stalled")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(shelf.in_flight(), 0);
        assert!(uploads.previews().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_reuses_the_asset_id_and_position() {
        let mut uploads = orchestrator(Arc::new(ScriptedStorage::default()));
        let mut shelf = AssetShelf::default();
        uploads.enqueue(&mut shelf, AssetKind::Media, blob("first.jpg"));
        let failed = uploads.enqueue(&mut shelf, AssetKind::Media, blob("fail.jpg"));
        uploads.enqueue(&mut shelf, AssetKind::Media, blob("third.jpg"));
        settle(&mut uploads, &mut shelf).await;
        assert!(shelf.find(failed).expect("asset").state.needs_attention());

        uploads
            .retry(&mut shelf, failed, Some(blob("fixed.jpg")))
            .expect("retry");
        settle(&mut uploads, &mut shelf).await;

        assert_eq!(shelf.media.len(), 3);
        assert_eq!(shelf.media[1].id, failed);
        assert_eq!(shelf.media[1].attempt, 2);
        assert_eq!(shelf.media[1].file_name, "fixed.jpg");
        assert!(shelf.media[1].committed().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_of_an_orphan_needs_a_new_file() {
        let mut uploads = orchestrator(Arc::new(ScriptedStorage::default()));
        let mut shelf = AssetShelf::restore(
            vec![PersistedAsset {
                id: AssetId::new(),
                kind: AssetKind::Media,
                file_name: "old.jpg".into(),
                content_type: None,
                size_bytes: 3,
                durable_ref: None,
                url: None,
                existing: false,
            }],
            Vec::new(),
            None,
        );
        let orphan = shelf.media[0].id;
        assert_eq!(
            uploads.retry(&mut shelf, orphan, None),
            Err(UploadError::BlobUnavailable(orphan))
        );
        uploads.retry(&mut shelf, orphan, Some(blob("old.jpg"))).expect("retry");
        settle(&mut uploads, &mut shelf).await;
        assert!(shelf.media[0].committed().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_attempt_events_are_ignored() {
        let mut uploads = orchestrator(Arc::new(ScriptedStorage::default()));
        let mut shelf = AssetShelf::default();
        let id = uploads.enqueue(&mut shelf, AssetKind::Media, blob("fail.jpg"));
        settle(&mut uploads, &mut shelf).await;
        uploads.retry(&mut shelf, id, None).expect("retry with retained file");

        let stale = UploadEvent {
            asset: id,
            attempt: 1,
            kind: UploadEventKind::Finished(Err("late failure".into())),
        };
        assert!(!uploads.apply(&mut shelf, stale));
        assert!(shelf.find(id).expect("asset").state.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn removing_committed_asset_succeeds_even_if_delete_fails() {
        let storage = Arc::new(ScriptedStorage {
            fail_deletes: true,
            ..ScriptedStorage::default()
        });
        let mut uploads = orchestrator(storage.clone());
        let mut shelf = AssetShelf::default();
        let id = uploads.enqueue(&mut shelf, AssetKind::Media, blob("front.jpg"));
        settle(&mut uploads, &mut shelf).await;

        let removed = uploads.remove(&mut shelf, id).expect("removed");
        assert!(removed.committed().is_some());
        assert!(shelf.find(id).is_none());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            storage.deletes.lock().expect("lock").as_slice(),
            ["objects/front.jpg".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn removing_an_upload_in_flight_cancels_and_releases_preview() {
        let storage = Arc::new(ScriptedStorage::default());
        let mut uploads = orchestrator(storage.clone());
        let mut shelf = AssetShelf::default();
        let id = uploads.enqueue(&mut shelf, AssetKind::Media, blob("slow.jpg"));
        tokio::time::sleep(Duration::from_millis(250)).await;
        uploads.drain(&mut shelf);
        assert!(matches!(
            shelf.find(id).expect("asset").state,
            AssetState::Uploading { .. }
        ));

        uploads.remove(&mut shelf, id).expect("removed");
        assert!(uploads.previews().is_empty());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(uploads.drain(&mut shelf), 0);
        assert!(storage.deletes.lock().expect("lock").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pre_existing_assets_are_not_deleted_directly() {
        let storage = Arc::new(ScriptedStorage::default());
        let mut uploads = orchestrator(storage.clone());
        let mut shelf = AssetShelf::restore(
            vec![PersistedAsset {
                id: AssetId::new(),
                kind: AssetKind::Media,
                file_name: "listed.jpg".into(),
                content_type: None,
                size_bytes: 3,
                durable_ref: Some("objects/listed.jpg".into()),
                url: Some("https://cdn.test/objects/listed.jpg".into()),
                existing: true,
            }],
            Vec::new(),
            Some(0),
        );
        let id = shelf.media[0].id;
        let removed = uploads.remove(&mut shelf, id).expect("removed");
        assert!(removed.existing);
        assert_eq!(shelf.featured_media, None);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(storage.deletes.lock().expect("lock").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn uploading_flag_lingers_briefly_after_the_last_transfer() {
        let mut uploads = orchestrator(Arc::new(ScriptedStorage::default()));
        let mut shelf = AssetShelf::default();
        uploads.enqueue(&mut shelf, AssetKind::Media, blob("a.jpg"));
        settle(&mut uploads, &mut shelf).await;

        assert_eq!(shelf.in_flight(), 0);
        assert!(uploads.is_uploading(&shelf));
        tokio::time::sleep(Duration::from_millis(301)).await;
        assert!(!uploads.is_uploading(&shelf));
    }
}
