use reqwest::Client;
use std::time::Duration;

fn secs_from_env(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

/// Client for JSON calls to collaborators (record service, taxonomy).
pub fn build_client() -> Client {
    let timeout = secs_from_env("HTTP_TIMEOUT_SECS", 15);
    let connect = secs_from_env("HTTP_CONNECT_TIMEOUT_SECS", 5);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Client for object uploads. No overall timeout; stalled transfers are cut
/// by the upload watchdog instead.
pub fn build_upload_client() -> Client {
    let connect = secs_from_env("HTTP_CONNECT_TIMEOUT_SECS", 5);
    Client::builder()
        .connect_timeout(Duration::from_secs(connect))
        .build()
        .unwrap_or_else(|_| Client::new())
}
