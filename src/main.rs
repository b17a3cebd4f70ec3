mod config;
mod http;
mod metrics;
mod models;
mod persistence;
mod record;
mod remote;
mod schema;
mod security;
mod session;
mod taxonomy;
mod uploads;
mod validation;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, Path, State},
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use config::WizardConfig;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ApiError, FeaturedRequest, FieldResponse, JumpRequest, OptionsResponse, RetryRequest,
    SessionResponse, SetFieldRequest, StartSessionRequest, SubmitResponse, UploadRequest,
    UploadResponse,
};
use remote::{HttpRecordService, InMemoryRecordService, RecordService};
use security::{AuthState, SellerContext, require_seller};
use serde_json::json;
use session::{
    Collaborators, SessionError, SessionRegistry, SharedSession, SubmitError, WizardSession,
};
use std::{net::SocketAddr, sync::Arc};
use taxonomy::{HttpTaxonomy, StaticTaxonomy, TaxonomyError, TaxonomyProvider};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use uploads::{AssetId, AssetKind, MemoryStorage, ObjectStorage, SupabaseStorage, UploadBlob};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "hermes.api", "server crashed: {err:#}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WizardConfig::from_env();
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let deps = collaborators_from_env(&config)?;
    let registry = SessionRegistry::new(deps, config);
    let state = AppState {
        registry: registry.clone(),
        prometheus_handle,
    };
    let app = router(state, AuthState::from_env());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "hermes.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    registry.flush_all().await;
    info!(target = "hermes.api", "drafts flushed, bye");
    Ok(())
}

/// Real collaborators when their environment is present, in-process
/// stand-ins otherwise.
fn collaborators_from_env(config: &WizardConfig) -> eyre::Result<Collaborators> {
    let backend = persistence::build_backend(config)?;
    let storage: Arc<dyn ObjectStorage> = match SupabaseStorage::from_env() {
        Some(storage) => Arc::new(storage),
        None => {
            warn!(
                target = "hermes.api",
                "SUPABASE_URL not set; attachments stay in memory and will not survive a restart"
            );
            Arc::new(MemoryStorage::default())
        }
    };
    let records: Arc<dyn RecordService> = match HttpRecordService::from_env() {
        Some(service) => Arc::new(service),
        None => {
            warn!(
                target = "hermes.api",
                "LISTINGS_API_URL not set; published listings are kept in memory"
            );
            Arc::new(InMemoryRecordService::default())
        }
    };
    let taxonomy: Arc<dyn TaxonomyProvider> = match HttpTaxonomy::from_env() {
        Some(taxonomy) => Arc::new(taxonomy),
        None => Arc::new(StaticTaxonomy::default()),
    };
    Ok(Collaborators {
        backend,
        storage,
        records,
        taxonomy,
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target = "hermes.api", error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}

#[derive(Clone)]
struct AppState {
    registry: SessionRegistry,
    prometheus_handle: PrometheusHandle,
}

fn router(state: AppState, auth: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let seller_routes = Router::new()
        .route("/sessions", post(open_session))
        .route("/sessions/{id}", get(get_session).delete(abandon_session))
        .route("/sessions/{id}/fields", put(set_field))
        .route("/sessions/{id}/classifications", post(add_classification))
        .route(
            "/sessions/{id}/classifications/{index}",
            delete(remove_classification),
        )
        .route("/sessions/{id}/advance", post(advance))
        .route("/sessions/{id}/retreat", post(retreat))
        .route("/sessions/{id}/jump", post(jump))
        .route("/sessions/{id}/submit", post(submit))
        .route("/sessions/{id}/start-over", post(start_over))
        .route("/sessions/{id}/assets/{kind}", post(upload_asset))
        .route("/sessions/{id}/assets/{kind}/{asset}", delete(remove_asset))
        .route("/sessions/{id}/assets/{kind}/{asset}/retry", post(retry_asset))
        .route("/sessions/{id}/featured", put(set_featured))
        .route("/taxonomy/industries", get(list_industries))
        .route("/taxonomy/industries/{industry}", get(list_categories))
        .route(
            "/taxonomy/industries/{industry}/{category}",
            get(list_subcategories),
        )
        .route_layer(middleware::from_fn_with_state(auth, require_seller));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .merge(seller_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "hermes-wizard-rs",
        "live_sessions": state.registry.live_count().await,
    }))
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(16 * 1024 * 1024)
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

async fn live(state: &AppState, seller: &SellerContext, id: &str) -> Result<SharedSession, AppError> {
    state
        .registry
        .get(&seller.seller_id, id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("session {id} is not open")))
}

fn respond(session: &mut WizardSession) -> Json<SessionResponse> {
    Json(SessionResponse {
        view: session.view(),
        notices: session.take_notices(),
    })
}

/// Start a wizard session, resume a draft, or open a published listing for
/// editing.
///
/// - Method: `POST`
/// - Path: `/sessions`
/// - Auth: `Authorization: Bearer <key>` or `X-Wizard-Key: <key>`
/// - Body: `StartSessionRequest`
/// - Response: `SessionResponse`
async fn open_session(
    State(state): State<AppState>,
    Extension(seller): Extension<SellerContext>,
    Json(payload): Json<StartSessionRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    crate::metrics::inc_requests("/sessions");
    let session = state
        .registry
        .open(
            &seller.seller_id,
            payload.session_id,
            payload.record_id.as_deref(),
        )
        .await?;
    let mut session = session.lock().await;
    session.pump();
    Ok(respond(&mut session))
}

async fn get_session(
    State(state): State<AppState>,
    Extension(seller): Extension<SellerContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = live(&state, &seller, &id).await?;
    let mut session = session.lock().await;
    session.pump();
    Ok(respond(&mut session))
}

async fn abandon_session(
    State(state): State<AppState>,
    Extension(seller): Extension<SellerContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    crate::metrics::inc_requests("/sessions/abandon");
    let session = live(&state, &seller, &id).await?;
    session.lock().await.abandon().await;
    state.registry.close(&seller.seller_id, &id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Write one field. The response carries that field's error, if any, and the
/// refreshed view.
async fn set_field(
    State(state): State<AppState>,
    Extension(seller): Extension<SellerContext>,
    Path(id): Path<String>,
    Json(payload): Json<SetFieldRequest>,
) -> Result<Json<FieldResponse>, AppError> {
    crate::metrics::inc_requests("/sessions/fields");
    let session = live(&state, &seller, &id).await?;
    let mut session = session.lock().await;
    session.pump();
    let error = session.set_field(payload.path, payload.value)?;
    Ok(Json(FieldResponse {
        error,
        view: session.view(),
    }))
}

async fn add_classification(
    State(state): State<AppState>,
    Extension(seller): Extension<SellerContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = live(&state, &seller, &id).await?;
    let mut session = session.lock().await;
    session.add_classification()?;
    Ok(respond(&mut session))
}

async fn remove_classification(
    State(state): State<AppState>,
    Extension(seller): Extension<SellerContext>,
    Path((id, index)): Path<(String, usize)>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = live(&state, &seller, &id).await?;
    let mut session = session.lock().await;
    session.remove_classification(index)?;
    Ok(respond(&mut session))
}

/// Blocked transitions answer 422 with the view, whose `errors` and
/// `first_error` say what to fix.
fn blocked_or(result: Result<usize, SessionError>) -> Result<StatusCode, AppError> {
    match result {
        Ok(_) => Ok(StatusCode::OK),
        Err(SessionError::Gate(_)) => Ok(StatusCode::UNPROCESSABLE_ENTITY),
        Err(err) => Err(err.into()),
    }
}

async fn advance(
    State(state): State<AppState>,
    Extension(seller): Extension<SellerContext>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    crate::metrics::inc_requests("/sessions/advance");
    let session = live(&state, &seller, &id).await?;
    let mut session = session.lock().await;
    session.pump();
    let status = blocked_or(session.advance().await)?;
    Ok((status, respond(&mut session)))
}

async fn retreat(
    State(state): State<AppState>,
    Extension(seller): Extension<SellerContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    crate::metrics::inc_requests("/sessions/retreat");
    let session = live(&state, &seller, &id).await?;
    let mut session = session.lock().await;
    session.retreat().await?;
    Ok(respond(&mut session))
}

async fn jump(
    State(state): State<AppState>,
    Extension(seller): Extension<SellerContext>,
    Path(id): Path<String>,
    Json(payload): Json<JumpRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    crate::metrics::inc_requests("/sessions/jump");
    let session = live(&state, &seller, &id).await?;
    let mut session = session.lock().await;
    session.pump();
    let status = blocked_or(session.jump_to(payload.index).await)?;
    Ok((status, respond(&mut session)))
}

/// Validate everything and publish.
///
/// - Method: `POST`
/// - Path: `/sessions/{id}/submit`
/// - Response: `SubmitResponse`, or 422 with the view moved to the first
///   step that needs fixing
async fn submit(
    State(state): State<AppState>,
    Extension(seller): Extension<SellerContext>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    crate::metrics::inc_requests("/sessions/submit");
    let shared = live(&state, &seller, &id).await?;
    let mut session = shared.lock().await;
    session.pump();
    match session.submit().await {
        Ok(record_id) => {
            let notices = session.take_notices();
            drop(session);
            state.registry.close(&seller.seller_id, &id).await;
            Ok(Json(SubmitResponse { record_id, notices }).into_response())
        }
        Err(SubmitError::Invalid { .. }) => {
            Ok((StatusCode::UNPROCESSABLE_ENTITY, respond(&mut session)).into_response())
        }
        Err(err) => Err(err.into()),
    }
}

async fn start_over(
    State(state): State<AppState>,
    Extension(seller): Extension<SellerContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    crate::metrics::inc_requests("/sessions/start-over");
    let session = live(&state, &seller, &id).await?;
    let mut session = session.lock().await;
    session.start_over().await;
    Ok(respond(&mut session))
}

fn parse_kind(raw: &str) -> Result<AssetKind, AppError> {
    AssetKind::from_str(raw)
        .ok_or_else(|| AppError::BadRequest(format!("unknown attachment kind `{raw}`")))
}

fn parse_asset(raw: &str) -> Result<AssetId, AppError> {
    Uuid::parse_str(raw)
        .map(AssetId::from)
        .map_err(|_| AppError::BadRequest(format!("invalid asset id `{raw}`")))
}

fn decode_upload(upload: UploadRequest) -> Result<UploadBlob, AppError> {
    let bytes = STANDARD
        .decode(upload.data_base64.trim())
        .map_err(|err| AppError::BadRequest(format!("data_base64: {err}")))?;
    if bytes.is_empty() {
        return Err(AppError::BadRequest("empty file".to_string()));
    }
    Ok(UploadBlob::new(upload.file_name, upload.content_type, bytes))
}

/// Queue an attachment. The placeholder shows up in the view right away; the
/// transfer finishes in the background.
async fn upload_asset(
    State(state): State<AppState>,
    Extension(seller): Extension<SellerContext>,
    Path((id, kind)): Path<(String, String)>,
    Json(payload): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, AppError> {
    crate::metrics::inc_requests("/sessions/assets");
    let kind = parse_kind(&kind)?;
    let blob = decode_upload(payload)?;
    let session = live(&state, &seller, &id).await?;
    let mut session = session.lock().await;
    let asset_id = session.enqueue_upload(kind, blob)?;
    Ok(Json(UploadResponse {
        asset_id: asset_id.to_string(),
        view: session.view(),
    }))
}

async fn retry_asset(
    State(state): State<AppState>,
    Extension(seller): Extension<SellerContext>,
    Path((id, kind, asset)): Path<(String, String, String)>,
    Json(payload): Json<RetryRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    parse_kind(&kind)?;
    let asset = parse_asset(&asset)?;
    let blob = payload.upload.map(decode_upload).transpose()?;
    let session = live(&state, &seller, &id).await?;
    let mut session = session.lock().await;
    session.pump();
    session.retry_upload(asset, blob)?;
    Ok(respond(&mut session))
}

async fn remove_asset(
    State(state): State<AppState>,
    Extension(seller): Extension<SellerContext>,
    Path((id, kind, asset)): Path<(String, String, String)>,
) -> Result<Json<SessionResponse>, AppError> {
    parse_kind(&kind)?;
    let asset = parse_asset(&asset)?;
    let session = live(&state, &seller, &id).await?;
    let mut session = session.lock().await;
    session.pump();
    session.remove_asset(asset).await?;
    Ok(respond(&mut session))
}

async fn set_featured(
    State(state): State<AppState>,
    Extension(seller): Extension<SellerContext>,
    Path(id): Path<String>,
    Json(payload): Json<FeaturedRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = live(&state, &seller, &id).await?;
    let mut session = session.lock().await;
    session.pump();
    session.set_featured_media(payload.index).await?;
    Ok(respond(&mut session))
}

async fn list_industries(State(state): State<AppState>) -> Result<Json<OptionsResponse>, AppError> {
    let options = state.registry.deps().taxonomy.industries().await?;
    Ok(Json(OptionsResponse { options }))
}

async fn list_categories(
    State(state): State<AppState>,
    Path(industry): Path<String>,
) -> Result<Json<OptionsResponse>, AppError> {
    let options = state.registry.deps().taxonomy.categories(&industry).await?;
    Ok(Json(OptionsResponse { options }))
}

async fn list_subcategories(
    State(state): State<AppState>,
    Path((industry, category)): Path<(String, String)>,
) -> Result<Json<OptionsResponse>, AppError> {
    let options = state
        .registry
        .deps()
        .taxonomy
        .subcategories(&industry, &category)
        .await?;
    Ok(Json(OptionsResponse { options }))
}

#[derive(Debug)]
enum AppError {
    Session(SessionError),
    Submit(SubmitError),
    Taxonomy(TaxonomyError),
    NotFound(String),
    BadRequest(String),
}

impl From<SessionError> for AppError {
    fn from(value: SessionError) -> Self {
        Self::Session(value)
    }
}

impl From<SubmitError> for AppError {
    fn from(value: SubmitError) -> Self {
        Self::Submit(value)
    }
}

impl From<TaxonomyError> for AppError {
    fn from(value: TaxonomyError) -> Self {
        Self::Taxonomy(value)
    }
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::Session(err) => err.kind(),
            AppError::Submit(err) => err.kind(),
            AppError::Taxonomy(err) => err.kind(),
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "invalid",
        }
    }

    fn detail(&self) -> String {
        match self {
            AppError::Session(err) => err.to_string(),
            AppError::Submit(err) => err.to_string(),
            AppError::Taxonomy(err) => err.to_string(),
            AppError::NotFound(detail) | AppError::BadRequest(detail) => detail.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = match kind {
            "invalid" => StatusCode::BAD_REQUEST,
            "not_found" => StatusCode::NOT_FOUND,
            "conflict" => StatusCode::CONFLICT,
            "validation" => StatusCode::UNPROCESSABLE_ENTITY,
            "upstream" | "rejected" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(target = "hermes.api", kind, detail = %self.detail(), "request failed");
        }
        let payload = ApiError {
            error: kind.to_string(),
            detail: Some(self.detail()),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
