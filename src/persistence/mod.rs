pub mod backends;
pub mod snapshot;

pub use backends::{FileBackend, MemoryBackend, RedisBackend, SnapshotBackend, StoreError};
pub use snapshot::{EditingSnapshot, SessionSnapshot, SnapshotKey, SnapshotKeys};

use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::config::{StoreBackendKind, WizardConfig};
use crate::metrics;
use snapshot::{RecordEnvelope, SNAPSHOT_VERSION, encode};

pub fn build_backend(config: &WizardConfig) -> Result<Arc<dyn SnapshotBackend>, StoreError> {
    let backend: Arc<dyn SnapshotBackend> = match &config.store {
        StoreBackendKind::Memory => Arc::new(MemoryBackend::default()),
        StoreBackendKind::File(dir) => Arc::new(FileBackend::new(dir.clone())),
        StoreBackendKind::Redis(url) => Arc::new(RedisBackend::open(url, config.store_ttl_secs)?),
    };
    Ok(backend)
}

enum StoreCommand {
    Save(Box<SessionSnapshot>),
    Pointer {
        active_step: usize,
        visited_steps: BTreeSet<usize>,
        ack: oneshot::Sender<()>,
    },
    Featured {
        featured_media: Option<usize>,
        ack: oneshot::Sender<()>,
    },
    Flush(oneshot::Sender<()>),
    Clear(oneshot::Sender<()>),
}

/// Session snapshot store. Full snapshots are debounced and coalesced; the
/// step and featured pointers are written through immediately, and a step
/// pointer takes any pending snapshot along with it. One worker
/// task owns every write so `clear()` can never be overtaken by a late
/// debounced write.
#[derive(Clone)]
pub struct PersistenceStore {
    tx: mpsc::UnboundedSender<StoreCommand>,
    backend: Arc<dyn SnapshotBackend>,
    keys: SnapshotKeys,
}

impl PersistenceStore {
    pub fn spawn(backend: Arc<dyn SnapshotBackend>, keys: SnapshotKeys, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = StoreWorker {
            backend: backend.clone(),
            keys: keys.clone(),
            debounce,
        };
        tokio::spawn(worker.run(rx));
        Self { tx, backend, keys }
    }

    pub fn keys(&self) -> &SnapshotKeys {
        &self.keys
    }

    /// Schedules a write of `snapshot`, replacing any pending one.
    pub fn save(&self, snapshot: SessionSnapshot) {
        if self.tx.send(StoreCommand::Save(Box::new(snapshot))).is_err() {
            warn!(
                target = "hermes.persistence",
                namespace = self.keys.namespace(),
                "store worker gone, snapshot dropped"
            );
        }
    }

    pub async fn write_pointer(&self, active_step: usize, visited_steps: &BTreeSet<usize>) {
        self.request(|ack| StoreCommand::Pointer {
            active_step,
            visited_steps: visited_steps.clone(),
            ack,
        })
        .await;
    }

    /// Same as `write_pointer` for synchronous callers. Queued in order with
    /// every other command; the ack is not awaited.
    pub fn queue_pointer(&self, active_step: usize, visited_steps: &BTreeSet<usize>) {
        let (ack, _) = oneshot::channel();
        let command = StoreCommand::Pointer {
            active_step,
            visited_steps: visited_steps.clone(),
            ack,
        };
        if self.tx.send(command).is_err() {
            warn!(
                target = "hermes.persistence",
                namespace = self.keys.namespace(),
                "store worker gone, pointer dropped"
            );
        }
    }

    pub async fn write_featured(&self, featured_media: Option<usize>) {
        self.request(|ack| StoreCommand::Featured {
            featured_media,
            ack,
        })
        .await;
    }

    pub async fn flush(&self) {
        self.request(StoreCommand::Flush).await;
    }

    /// Cancels any pending write and removes every key this session owns.
    pub async fn clear(&self) {
        if !self.request(StoreCommand::Clear).await {
            remove_all(self.backend.as_ref(), &self.keys).await;
        }
    }

    async fn request<F>(&self, build: F) -> bool
    where
        F: FnOnce(oneshot::Sender<()>) -> StoreCommand,
    {
        let (ack, done) = oneshot::channel();
        if self.tx.send(build(ack)).is_err() {
            return false;
        }
        done.await.is_ok()
    }

    /// Reads the last snapshot. A record that fails the shape check discards
    /// the whole snapshot; other keys fall back to defaults one by one.
    pub async fn load(&self) -> Option<SessionSnapshot> {
        let record_key = self.keys.key(SnapshotKey::Record);
        let raw = match self.backend.read(&record_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(
                    target = "hermes.persistence",
                    namespace = self.keys.namespace(),
                    error = %err,
                    "snapshot read failed"
                );
                return None;
            }
        };

        let envelope = match serde_json::from_str::<RecordEnvelope>(&raw) {
            Ok(envelope) if envelope.version == SNAPSHOT_VERSION => envelope,
            Ok(envelope) => {
                warn!(
                    target = "hermes.persistence",
                    namespace = self.keys.namespace(),
                    version = envelope.version,
                    "discarding snapshot with unknown version"
                );
                self.clear().await;
                return None;
            }
            Err(err) => {
                warn!(
                    target = "hermes.persistence",
                    namespace = self.keys.namespace(),
                    error = %err,
                    "discarding corrupt snapshot"
                );
                self.clear().await;
                return None;
            }
        };

        let snapshot = SessionSnapshot {
            record: envelope.record,
            active_step: self.read_aux(SnapshotKey::ActiveStep).await.unwrap_or(0),
            visited_steps: self.read_aux(SnapshotKey::VisitedSteps).await.unwrap_or_default(),
            featured_media: self
                .read_aux::<Option<usize>>(SnapshotKey::FeaturedMedia)
                .await
                .flatten(),
            media: self.read_aux(SnapshotKey::Media).await.unwrap_or_default(),
            documents: self.read_aux(SnapshotKey::Documents).await.unwrap_or_default(),
            editing: self
                .read_aux::<Option<EditingSnapshot>>(SnapshotKey::Editing)
                .await
                .flatten(),
            saved_at: Some(envelope.saved_at),
        };
        debug!(
            target = "hermes.persistence",
            namespace = self.keys.namespace(),
            active_step = snapshot.active_step,
            "snapshot loaded"
        );
        Some(snapshot.sanitised())
    }

    async fn read_aux<T: DeserializeOwned>(&self, key: SnapshotKey) -> Option<T> {
        let full_key = self.keys.key(key);
        match self.backend.read(&full_key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(
                        target = "hermes.persistence",
                        key = %full_key,
                        error = %err,
                        "dropping unreadable snapshot key"
                    );
                    if let Err(err) = self.backend.remove(&full_key).await {
                        warn!(target = "hermes.persistence", key = %full_key, error = %err, "remove failed");
                    }
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(target = "hermes.persistence", key = %full_key, error = %err, "read failed");
                None
            }
        }
    }
}

struct StoreWorker {
    backend: Arc<dyn SnapshotBackend>,
    keys: SnapshotKeys,
    debounce: Duration,
}

impl StoreWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<StoreCommand>) {
        let mut pending: Option<SessionSnapshot> = None;
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(StoreCommand::Save(snapshot)) => {
                        pending = Some(*snapshot);
                        deadline = Some(Instant::now() + self.debounce);
                    }
                    Some(StoreCommand::Pointer { active_step, visited_steps, ack }) => {
                        // A pointer must never land without the record it points into.
                        match pending.take() {
                            Some(mut snapshot) => {
                                deadline = None;
                                snapshot.active_step = active_step;
                                snapshot.visited_steps = visited_steps;
                                self.write_snapshot(&snapshot).await;
                            }
                            None => {
                                self.write_value(SnapshotKey::ActiveStep, &active_step).await;
                                self.write_value(SnapshotKey::VisitedSteps, &visited_steps).await;
                            }
                        }
                        let _ = ack.send(());
                    }
                    Some(StoreCommand::Featured { featured_media, ack }) => {
                        if let Some(snapshot) = pending.as_mut() {
                            snapshot.featured_media = featured_media;
                        }
                        self.write_value(SnapshotKey::FeaturedMedia, &featured_media).await;
                        let _ = ack.send(());
                    }
                    Some(StoreCommand::Flush(ack)) => {
                        deadline = None;
                        if let Some(snapshot) = pending.take() {
                            self.write_snapshot(&snapshot).await;
                        }
                        let _ = ack.send(());
                    }
                    Some(StoreCommand::Clear(ack)) => {
                        pending = None;
                        deadline = None;
                        remove_all(self.backend.as_ref(), &self.keys).await;
                        let _ = ack.send(());
                    }
                    None => {
                        if let Some(snapshot) = pending.take() {
                            self.write_snapshot(&snapshot).await;
                        }
                        break;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    if let Some(snapshot) = pending.take() {
                        self.write_snapshot(&snapshot).await;
                    }
                }
            }
        }
    }

    async fn write_snapshot(&self, snapshot: &SessionSnapshot) {
        let started = Instant::now();
        let entries = match encode(snapshot) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    target = "hermes.persistence",
                    namespace = self.keys.namespace(),
                    error = %err,
                    "snapshot encode failed, skipping write"
                );
                return;
            }
        };
        let mut failed = 0usize;
        for (key, value) in entries {
            if let Err(err) = self.backend.write(&self.keys.key(key), &value).await {
                failed += 1;
                warn!(
                    target = "hermes.persistence",
                    key = key.as_str(),
                    error = %err,
                    "snapshot key write failed"
                );
            }
        }
        metrics::persistence_write(failed == 0, started.elapsed().as_millis());
    }

    async fn write_value<T: serde::Serialize>(&self, key: SnapshotKey, value: &T) {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(target = "hermes.persistence", key = key.as_str(), error = %err, "encode failed");
                return;
            }
        };
        if let Err(err) = self.backend.write(&self.keys.key(key), &encoded).await {
            warn!(
                target = "hermes.persistence",
                key = key.as_str(),
                error = %err,
                "pointer write failed"
            );
        }
    }
}

async fn remove_all(backend: &dyn SnapshotBackend, keys: &SnapshotKeys) {
    for key in keys.all() {
        if let Err(err) = backend.remove(&key).await {
            warn!(target = "hermes.persistence", key = %key, error = %err, "remove failed");
        }
    }
}
