// Statement Ingest - Web Server
// REST API with Axum: parse preview, import, entity and field mappings

use anyhow::Context;
use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use statement_ingest::{
    get_mapping, import_records, list_canonical_transactions, logging::init_tracing, open_database,
    parse_preview, reset_mapping, set_mapping, CanonicalizationService, EntityType, IngestConfig,
    IngestError, LocalExtractor, MappingScope, NormalizerSettings, ParseContext,
    ParsedTransactionRecord, ParserRegistry, RawDocument, SqliteMappingStore, TextExtractor,
};

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
const DEFAULT_PAGE: usize = 200;

/// Shared application state. Connections are opened per request.
#[derive(Clone)]
struct AppState {
    config: Arc<IngestConfig>,
    registry: Arc<ParserRegistry>,
    settings: Arc<NormalizerSettings>,
    extractor: Arc<dyn TextExtractor>,
}

impl AppState {
    fn new(config: IngestConfig) -> Self {
        let settings = config.normalizer_settings();
        AppState {
            config: Arc::new(config),
            registry: Arc::new(ParserRegistry::with_defaults()),
            settings: Arc::new(settings),
            extractor: Arc::new(LocalExtractor),
        }
    }

    fn connect(&self) -> statement_ingest::Result<Connection> {
        open_database(&self.config.database_path)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
enum AppError {
    Ingest(IngestError),
    MissingUser,
    BadRequest(String),
    Internal(String),
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        AppError::Ingest(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            AppError::MissingUser => (StatusCode::UNAUTHORIZED, "missing X-User-ID header".to_string(), None),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message, None),
            AppError::Internal(message) => {
                tracing::error!(error = %message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string(), None)
            }
            AppError::Ingest(err) => {
                let message = err.to_string();
                match err {
                    IngestError::UnsupportedFormat(_) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, message, None),
                    IngestError::ExtractionFailure(_) => (StatusCode::UNPROCESSABLE_ENTITY, message, None),
                    IngestError::NoTransactionsFound { dropped, filtered } => (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        message,
                        Some(json!({ "droppedCount": dropped, "filteredCount": filtered })),
                    ),
                    IngestError::MappingConflict { names } => (
                        StatusCode::CONFLICT,
                        message,
                        Some(json!({ "names": names })),
                    ),
                    IngestError::Validation(_) => (StatusCode::BAD_REQUEST, message, None),
                    IngestError::NotFound(_) => (StatusCode::NOT_FOUND, message, None),
                    other => {
                        tracing::error!(error = %other, "request failed");
                        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string(), None)
                    }
                }
            }
        };
        (status, Json(ErrorBody { error, details })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

/// Run storage or parsing work off the async runtime
async fn blocking<T, F>(work: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> statement_ingest::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Internal(format!("worker task failed: {}", e)))?
        .map_err(AppError::from)
}

// ============================================================================
// User identity
// ============================================================================

/// Caller identity from the X-User-ID header
struct UserId(String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or(AppError::MissingUser)
    }
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Deserialize)]
struct ImportRequest {
    records: Vec<ParsedTransactionRecord>,
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MappingListQuery {
    entity_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateMappingRequest {
    canonical_name: String,
    mapped_names: Vec<String>,
    entity_type: EntityType,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateMappingRequest {
    canonical_name: Option<String>,
    mapped_names: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveRequest {
    names: Vec<String>,
    #[serde(default)]
    entity_types: Vec<EntityType>,
}

#[derive(Deserialize)]
struct ScopeQuery {
    scope: Option<String>,
}

#[derive(Deserialize)]
struct FieldMappingRequest {
    mapping: HashMap<String, String>,
}

fn scope_for(user: &UserId, query: &ScopeQuery) -> Result<MappingScope, AppError> {
    match query.scope.as_deref() {
        None | Some("user") => Ok(MappingScope::User(user.0.clone())),
        Some("global") => Ok(MappingScope::Global),
        Some(other) => Err(AppError::BadRequest(format!("unknown scope '{}'", other))),
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": statement_ingest::VERSION }))
}

/// GET /api/banks - Registered strategies in detection order
async fn list_banks(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.banks())
}

/// POST /api/statements/parse - Multipart `file` plus optional `bank_code`
async fn parse_statement(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    mut multipart: Multipart,
) -> ApiResult<statement_ingest::PreviewResult> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut bank_code: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("could not read upload: {}", e)))?;
                upload = Some((filename, bytes.to_vec()));
            }
            Some("bank_code") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("invalid bank_code: {}", e)))?;
                if !value.trim().is_empty() {
                    bank_code = Some(value.trim().to_string());
                }
            }
            _ => {}
        }
    }

    let (filename, bytes) = upload.ok_or_else(|| AppError::BadRequest("missing 'file' field".to_string()))?;
    tracing::info!(user_id = %user_id, filename = %filename, size = bytes.len(), "statement uploaded");

    let preview = blocking(move || {
        let ctx = ParseContext {
            extractor: Arc::clone(&state.extractor),
            timeout: state.config.extraction_timeout(),
            registry: &state.registry,
            settings: &state.settings,
        };
        let document = RawDocument::new(bytes, &filename, bank_code)?;
        parse_preview(&document, &ctx)
    })
    .await?;

    Ok(Json(preview))
}

/// POST /api/statements/import - Persist reviewed records
async fn import_statement(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<ImportRequest>,
) -> ApiResult<statement_ingest::ImportSummary> {
    let summary = blocking(move || {
        let conn = state.connect()?;
        import_records(&conn, &user_id, &request.records)
    })
    .await?;
    Ok(Json(summary))
}

/// GET /api/transactions - Stored rows with canonical names applied
async fn get_transactions(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<statement_ingest::StoredTransaction>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE);
    let transactions = blocking(move || {
        let conn = state.connect()?;
        list_canonical_transactions(&conn, &user_id, limit)
    })
    .await?;
    Ok(Json(transactions))
}

/// GET /api/entity-mappings
async fn list_entity_mappings(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(query): Query<MappingListQuery>,
) -> ApiResult<Vec<statement_ingest::EntityMapping>> {
    let entity_type = match query.entity_type.as_deref() {
        Some(raw) => Some(
            EntityType::parse(raw).ok_or_else(|| AppError::BadRequest(format!("unknown entity type '{}'", raw)))?,
        ),
        None => None,
    };
    let mappings = blocking(move || {
        let conn = state.connect()?;
        CanonicalizationService::new(SqliteMappingStore::new(&conn)).list_mappings(&user_id, entity_type)
    })
    .await?;
    Ok(Json(mappings))
}

/// POST /api/entity-mappings
async fn create_entity_mapping(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<CreateMappingRequest>,
) -> Result<(StatusCode, Json<statement_ingest::EntityMapping>), AppError> {
    let mapping = blocking(move || {
        let conn = state.connect()?;
        CanonicalizationService::new(SqliteMappingStore::new(&conn)).create_mapping(
            &user_id,
            &request.canonical_name,
            &request.mapped_names,
            request.entity_type,
        )
    })
    .await?;
    Ok((StatusCode::CREATED, Json(mapping)))
}

/// PUT /api/entity-mappings/:id
async fn update_entity_mapping(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
    Json(request): Json<UpdateMappingRequest>,
) -> ApiResult<statement_ingest::EntityMapping> {
    let mapping = blocking(move || {
        let conn = state.connect()?;
        CanonicalizationService::new(SqliteMappingStore::new(&conn)).update_mapping(
            &user_id,
            &id,
            request.canonical_name.as_deref(),
            request.mapped_names.as_deref(),
        )
    })
    .await?;
    Ok(Json(mapping))
}

/// DELETE /api/entity-mappings/:id
async fn delete_entity_mapping(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    blocking(move || {
        let conn = state.connect()?;
        CanonicalizationService::new(SqliteMappingStore::new(&conn)).delete_mapping(&user_id, &id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/entity-mappings/resolve
async fn resolve_names(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<HashMap<String, String>> {
    let resolved = blocking(move || {
        let conn = state.connect()?;
        Ok(CanonicalizationService::new(SqliteMappingStore::new(&conn)).resolve_batch(
            &user_id,
            &request.names,
            &request.entity_types,
        ))
    })
    .await?;
    Ok(Json(resolved))
}

/// GET /api/field-mappings/:bank_code
async fn get_field_mapping(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(bank_code): Path<String>,
) -> ApiResult<statement_ingest::FieldMappingConfig> {
    let config = blocking(move || {
        let conn = state.connect()?;
        get_mapping(&conn, &user_id, &bank_code)
    })
    .await?;
    Ok(Json(config))
}

/// PUT /api/field-mappings/:bank_code[?scope=global]
async fn put_field_mapping(
    State(state): State<AppState>,
    user: UserId,
    Path(bank_code): Path<String>,
    Query(query): Query<ScopeQuery>,
    Json(request): Json<FieldMappingRequest>,
) -> ApiResult<statement_ingest::FieldMappingConfig> {
    let scope = scope_for(&user, &query)?;
    let config = blocking(move || {
        let conn = state.connect()?;
        set_mapping(&conn, &scope, &bank_code, &request.mapping)
    })
    .await?;
    Ok(Json(config))
}

/// DELETE /api/field-mappings/:bank_code[?scope=global]
async fn delete_field_mapping(
    State(state): State<AppState>,
    user: UserId,
    Path(bank_code): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Result<StatusCode, AppError> {
    let scope = scope_for(&user, &query)?;
    let removed = blocking(move || {
        let conn = state.connect()?;
        reset_mapping(&conn, &scope, &bank_code)
    })
    .await?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::Ingest(IngestError::NotFound("field mapping".to_string())))
    }
}

// ============================================================================
// Router
// ============================================================================

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/banks", get(list_banks))
        .route("/statements/parse", post(parse_statement))
        .route("/statements/import", post(import_statement))
        .route("/transactions", get(get_transactions))
        .route("/entity-mappings", get(list_entity_mappings).post(create_entity_mapping))
        .route("/entity-mappings/resolve", post(resolve_names))
        .route(
            "/entity-mappings/:id",
            put(update_entity_mapping).delete(delete_entity_mapping),
        )
        .route(
            "/field-mappings/:bank_code",
            get(get_field_mapping).put(put_field_mapping).delete(delete_field_mapping),
        )
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
    )
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = IngestConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.log_level, config.log_json);

    // Provision the schema once so request handlers only open connections
    open_database(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;

    let addr = config.bind_addr.clone();
    let app = build_router(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    tracing::info!(addr = %addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Server error")?;

    Ok(())
}
