use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::WizardConfig;
use crate::session::{Collaborators, SessionError, WizardSession};

pub type SharedSession = Arc<Mutex<WizardSession>>;

struct LiveSession {
    session: SharedSession,
    pump: JoinHandle<()>,
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Live sessions keyed by seller and session id. Each one gets a pump task
/// that folds finished uploads and option checks in between requests.
#[derive(Clone)]
pub struct SessionRegistry {
    live: Arc<Mutex<HashMap<(String, String), LiveSession>>>,
    deps: Collaborators,
    config: Arc<WizardConfig>,
}

impl SessionRegistry {
    pub fn new(deps: Collaborators, config: WizardConfig) -> Self {
        Self {
            live: Arc::new(Mutex::new(HashMap::new())),
            deps,
            config: Arc::new(config),
        }
    }

    /// Drafts of different sellers never share storage keys.
    fn seller_config(&self, seller: &str) -> WizardConfig {
        WizardConfig {
            namespace: format!("{}:{}", self.config.namespace, seller),
            ..(*self.config).clone()
        }
    }

    /// Returns the live session, or starts one: an edit session when
    /// `record_id` is given, otherwise a fresh or restored draft.
    pub async fn open(
        &self,
        seller: &str,
        session_id: Option<String>,
        record_id: Option<&str>,
    ) -> Result<SharedSession, SessionError> {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let key = (seller.to_string(), session_id.clone());
        if let Some(live) = self.live.lock().await.get(&key) {
            return Ok(live.session.clone());
        }

        let config = self.seller_config(seller);
        let session = match record_id {
            Some(record_id) => WizardSession::edit(&session_id, record_id, &self.deps, &config).await?,
            None => WizardSession::start(&session_id, &self.deps, &config).await,
        };
        let session = Arc::new(Mutex::new(session));

        let mut guard = self.live.lock().await;
        if let Some(live) = guard.get(&key) {
            return Ok(live.session.clone());
        }
        let pump = spawn_pump(Arc::downgrade(&session), self.config.pump_interval);
        guard.insert(
            key,
            LiveSession {
                session: session.clone(),
                pump,
            },
        );
        info!(
            target = "hermes.api",
            seller,
            session = %session_id,
            live = guard.len(),
            "session opened"
        );
        Ok(session)
    }

    pub async fn get(&self, seller: &str, session_id: &str) -> Option<SharedSession> {
        self.live
            .lock()
            .await
            .get(&(seller.to_string(), session_id.to_string()))
            .map(|live| live.session.clone())
    }

    /// Forgets a session after it finished or was abandoned.
    pub async fn close(&self, seller: &str, session_id: &str) {
        let removed = self
            .live
            .lock()
            .await
            .remove(&(seller.to_string(), session_id.to_string()));
        if removed.is_some() {
            debug!(target = "hermes.api", seller, session = session_id, "session closed");
        }
    }

    pub async fn live_count(&self) -> usize {
        self.live.lock().await.len()
    }

    /// Writes every pending draft; used on shutdown.
    pub async fn flush_all(&self) {
        let sessions: Vec<SharedSession> = self
            .live
            .lock()
            .await
            .values()
            .map(|live| live.session.clone())
            .collect();
        for session in sessions {
            let mut session = session.lock().await;
            session.pump();
            session.flush().await;
        }
    }

    pub fn deps(&self) -> &Collaborators {
        &self.deps
    }
}

fn spawn_pump(session: Weak<Mutex<WizardSession>>, interval: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(session) = session.upgrade() else {
                break;
            };
            session.lock().await.pump();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryBackend;
    use crate::record::FieldValue;
    use crate::remote::InMemoryRecordService;
    use crate::taxonomy::StaticTaxonomy;
    use crate::uploads::{AssetKind, AssetState, MemoryStorage, UploadBlob};
    use std::time::Duration;

    fn registry(backend: MemoryBackend) -> SessionRegistry {
        SessionRegistry::new(
            Collaborators {
                backend: Arc::new(backend),
                storage: Arc::new(MemoryStorage::new("https://cdn.test", Duration::from_millis(10))),
                records: Arc::new(InMemoryRecordService::default()),
                taxonomy: Arc::new(StaticTaxonomy::default()),
            },
            WizardConfig {
                pump_interval: Duration::from_millis(20),
                ..WizardConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn open_returns_the_live_session_for_the_same_seller() {
        let registry = registry(MemoryBackend::default());
        let first = registry
            .open("acme", Some("s1".into()), None)
            .await
            .expect("open");
        let again = registry
            .open("acme", Some("s1".into()), None)
            .await
            .expect("open");
        assert!(Arc::ptr_eq(&first, &again));

        let other = registry
            .open("globex", Some("s1".into()), None)
            .await
            .expect("open");
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.live_count().await, 2);
        assert!(registry.get("globex", "s2").await.is_none());

        registry.close("acme", "s1").await;
        assert!(registry.get("acme", "s1").await.is_none());
    }

    #[tokio::test]
    async fn drafts_are_namespaced_per_seller() {
        let backend = MemoryBackend::default();
        let registry = registry(backend.clone());
        let session = registry
            .open("acme", Some("s1".into()), None)
            .await
            .expect("open");
        session
            .lock()
            .await
            .set_field("title", FieldValue::text("Corner cafe"))
            .expect("set");
        registry.flush_all().await;

        let keys = backend.keys().await;
        assert!(!keys.is_empty());
        assert!(keys.iter().all(|key| key.starts_with("hermes.wizard:acme:s1:")));
    }

    #[tokio::test]
    async fn pump_task_folds_in_finished_uploads() {
        let registry = registry(MemoryBackend::default());
        let session = registry.open("acme", None, None).await.expect("open");
        session
            .lock()
            .await
            .enqueue_upload(AssetKind::Media, UploadBlob::new("a.jpg", None, vec![0; 32]))
            .expect("queued");

        tokio::time::sleep(Duration::from_millis(300)).await;
        let guard = session.lock().await;
        assert!(matches!(
            guard.state().assets.media[0].state,
            AssetState::Committed { .. }
        ));
    }
}
