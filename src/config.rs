use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "hermes.wizard";
const SAVE_DEBOUNCE_MIN_MS: u64 = 500;
const SAVE_DEBOUNCE_MAX_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackendKind {
    Memory,
    File(PathBuf),
    Redis(String),
}

/// Runtime knobs for sessions. Every value has a default so an empty
/// environment still yields a working in-memory setup.
#[derive(Debug, Clone)]
pub struct WizardConfig {
    pub namespace: String,
    pub save_debounce: Duration,
    pub upload_stall_timeout: Duration,
    pub upload_idle_debounce: Duration,
    pub store: StoreBackendKind,
    pub store_ttl_secs: Option<u64>,
    pub pump_interval: Duration,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl WizardConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let save_debounce_ms = number("WIZARD_SAVE_DEBOUNCE_MS")
            .unwrap_or(750)
            .clamp(SAVE_DEBOUNCE_MIN_MS, SAVE_DEBOUNCE_MAX_MS);

        let store = if let Some(url) = lookup("WIZARD_REDIS_URL").or_else(|| lookup("REDIS_URL")) {
            StoreBackendKind::Redis(url)
        } else if let Some(dir) = lookup("WIZARD_DRAFT_DIR") {
            StoreBackendKind::File(PathBuf::from(dir))
        } else {
            StoreBackendKind::Memory
        };

        Self {
            namespace: lookup("WIZARD_NAMESPACE")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            save_debounce: Duration::from_millis(save_debounce_ms),
            upload_stall_timeout: Duration::from_secs(
                number("UPLOAD_STALL_TIMEOUT_SECS")
                    .filter(|v| *v > 0)
                    .unwrap_or(30),
            ),
            upload_idle_debounce: Duration::from_millis(
                number("UPLOAD_IDLE_DEBOUNCE_MS").unwrap_or(300),
            ),
            store,
            store_ttl_secs: number("WIZARD_DRAFT_TTL_SECS").filter(|v| *v > 0),
            pump_interval: Duration::from_millis(
                number("WIZARD_PUMP_INTERVAL_MS")
                    .filter(|v| *v > 0)
                    .unwrap_or(200),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(pairs: &[(&str, &str)]) -> WizardConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WizardConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = WizardConfig::default();
        assert_eq!(config.namespace, "hermes.wizard");
        assert_eq!(config.save_debounce, Duration::from_millis(750));
        assert_eq!(config.upload_stall_timeout, Duration::from_secs(30));
        assert_eq!(config.upload_idle_debounce, Duration::from_millis(300));
        assert_eq!(config.store, StoreBackendKind::Memory);
    }

    #[test]
    fn save_debounce_is_clamped() {
        assert_eq!(
            config_with(&[("WIZARD_SAVE_DEBOUNCE_MS", "50")]).save_debounce,
            Duration::from_millis(500)
        );
        assert_eq!(
            config_with(&[("WIZARD_SAVE_DEBOUNCE_MS", "5000")]).save_debounce,
            Duration::from_millis(1000)
        );
        assert_eq!(
            config_with(&[("WIZARD_SAVE_DEBOUNCE_MS", "soon")]).save_debounce,
            Duration::from_millis(750)
        );
    }

    #[test]
    fn backend_selection_prefers_redis() {
        let config = config_with(&[
            ("WIZARD_DRAFT_DIR", "/tmp/drafts"),
            ("REDIS_URL", "redis://localhost"),
        ]);
        assert_eq!(config.store, StoreBackendKind::Redis("redis://localhost".into()));
        let config = config_with(&[("WIZARD_DRAFT_DIR", "/tmp/drafts")]);
        assert_eq!(config.store, StoreBackendKind::File("/tmp/drafts".into()));
    }
}
