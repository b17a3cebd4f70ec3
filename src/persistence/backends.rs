use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use urlencoding::encode;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(String),
    #[error("redis error: {0}")]
    Redis(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Redis(err.to_string())
    }
}

/// Durable key/value medium behind the persistence store.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryBackend {
    pub async fn keys(&self) -> Vec<String> {
        let guard = self.entries.lock().await;
        let mut keys: Vec<String> = guard.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl SnapshotBackend for MemoryBackend {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// One JSON file per key. Writes go to a temp file first and are renamed
/// into place so a crash never leaves a half-written value.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_safe_key(key)))
    }
}

/// Percent-encodes everything outside `[A-Za-z0-9._~-]`, so distinct keys
/// always map to distinct file names.
pub fn file_safe_key(key: &str) -> String {
    encode(key).into_owned()
}

#[async_trait]
impl SnapshotBackend for FileBackend {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisBackend {
    client: redis::Client,
    ttl_secs: Option<u64>,
}

impl RedisBackend {
    pub fn open(url: &str, ttl_secs: Option<u64>) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            ttl_secs,
        })
    }
}

#[async_trait]
impl SnapshotBackend for RedisBackend {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        match self.ttl_secs {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_become_distinct_safe_file_names() {
        assert_eq!(
            file_safe_key("hermes.wizard:abc/../x:record"),
            "hermes.wizard%3Aabc%2F..%2Fx%3Arecord"
        );
        assert_ne!(file_safe_key("a:b"), file_safe_key("a_b"));
    }

    #[tokio::test]
    async fn file_backend_keeps_lookalike_keys_apart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path());
        backend.write("ns:a:b:record", "colon").await.expect("write");
        backend.write("ns:a_b:record", "underscore").await.expect("write");
        assert_eq!(
            backend.read("ns:a:b:record").await.expect("read").as_deref(),
            Some("colon")
        );
        assert_eq!(
            backend.read("ns:a_b:record").await.expect("read").as_deref(),
            Some("underscore")
        );
    }

    #[tokio::test]
    async fn file_backend_round_trips_and_removes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path().join("drafts"));

        assert_eq!(backend.read("s:record").await.expect("read"), None);
        backend.write("s:record", "{\"v\":1}").await.expect("write");
        backend.write("s:record", "{\"v\":2}").await.expect("overwrite");
        assert_eq!(
            backend.read("s:record").await.expect("read").as_deref(),
            Some("{\"v\":2}")
        );

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("drafts"))
            .expect("dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        backend.remove("s:record").await.expect("remove");
        backend.remove("s:record").await.expect("remove twice");
        assert_eq!(backend.read("s:record").await.expect("read"), None);
    }

    #[tokio::test]
    async fn memory_backend_lists_keys() {
        let backend = MemoryBackend::default();
        backend.write("b", "1").await.expect("write");
        backend.write("a", "2").await.expect("write");
        assert_eq!(backend.keys().await, vec!["a".to_string(), "b".to_string()]);
        backend.remove("a").await.expect("remove");
        assert_eq!(backend.keys().await, vec!["b".to_string()]);
    }
}
