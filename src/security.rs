use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, sync::Arc};
use tracing::{info, warn};

/// Seller API keys accepted by the session routes.
#[derive(Clone)]
pub struct AuthState {
    sellers: Arc<HashMap<String, SellerContext>>,
}

/// Who is driving a wizard session. Session ids are scoped per seller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SellerContext {
    pub seller_id: String,
    pub key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        Self::from_keys(&std::env::var("WIZARD_API_KEYS").unwrap_or_default())
    }

    /// Parses `seller:key` pairs separated by commas.
    pub fn from_keys(raw: &str) -> Self {
        Self {
            sellers: Arc::new(parse_keys(raw)),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<SellerContext> {
        self.sellers.get(presented).cloned()
    }
}

pub async fn require_seller(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(unauthorized(
            "missing_api_key",
            "Provide X-Wizard-Key or a Bearer token",
        ));
    };
    let Some(context) = state.authenticate(&presented) else {
        return Ok(unauthorized("invalid_api_key", "Key not recognized"));
    };
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

/// `X-Wizard-Key` first, then a Bearer token.
fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(key) = headers
        .get("X-Wizard-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    {
        return Some(key);
    }
    let raw = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    if raw.len() >= 7 && raw[..6].eq_ignore_ascii_case("bearer") {
        return Some(raw[6..].trim().to_string()).filter(|value| !value.is_empty());
    }
    None
}

fn unauthorized(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

fn parse_keys(raw: &str) -> HashMap<String, SellerContext> {
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let seller = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (seller, key) {
            (Some(seller), Some(secret)) => {
                entries.insert(
                    secret.to_string(),
                    SellerContext {
                        seller_id: seller.to_string(),
                        key_id: format!("key-{:02}", idx + 1),
                    },
                );
            }
            _ => warn!(
                target = "hermes.api",
                "ignored malformed WIZARD_API_KEYS entry: {trimmed}"
            ),
        }
    }

    if entries.is_empty() {
        warn!(
            target = "hermes.api",
            "WIZARD_API_KEYS produced no keys; falling back to demo credentials"
        );
        entries.insert(
            "demo-key".to_string(),
            SellerContext {
                seller_id: "demo-seller".to_string(),
                key_id: "key-01".to_string(),
            },
        );
    } else {
        info!(
            target = "hermes.api",
            key_count = entries.len(),
            "loaded seller API keys"
        );
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_seller_key_pairs_and_skips_garbage() {
        let state = AuthState::from_keys("acme:k1, broken, globex : k2 ,");
        assert_eq!(
            state.authenticate("k1"),
            Some(SellerContext {
                seller_id: "acme".into(),
                key_id: "key-01".into(),
            })
        );
        assert_eq!(
            state.authenticate("k2").map(|c| c.seller_id),
            Some("globex".to_string())
        );
        assert!(state.authenticate("broken").is_none());
    }

    #[test]
    fn empty_configuration_falls_back_to_demo_key() {
        let state = AuthState::from_keys("");
        assert_eq!(
            state.authenticate("demo-key").map(|c| c.seller_id),
            Some("demo-seller".to_string())
        );
    }

    #[test]
    fn wizard_key_header_wins_over_bearer_token() {
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer  abc "));
        headers.insert("X-Wizard-Key", HeaderValue::from_static("other"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("other"));

        headers.remove("X-Wizard-Key");
        assert_eq!(extract_api_key(&headers).as_deref(), Some("abc"));

        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_api_key(&headers), None);
    }
}
