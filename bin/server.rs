// Claimdesk - REST API server
// Cookie-authenticated JSON API over the reimbursement core.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use claimdesk::{
    approve, create_designation, create_employee, extract_or_placeholder, get_employee,
    limits::list_limits, limits::set_limit, list_designations, list_employees, login, reject,
    render_claim_pdf, save_document, session_from_cookie_header, setup_database, submit,
    AppError, AppResult, AuthConfig, DocumentStorage, ExpenseDraft, ExtractedExpense,
    LocalStorage, NewEmployee, ReceiptExtractor, SessionClaims, DEFAULT_CURRENCY, TOKEN_COOKIE,
};

// ============================================================================
// State & error mapping
// ============================================================================

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    auth: AuthConfig,
    storage: Arc<dyn DocumentStorage + Send + Sync>,
    extractor: Arc<dyn ReceiptExtractor + Send + Sync>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Authorization(_) => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            AppError::NotFound { .. } => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Upstream(msg) => {
                tracing::error!(error = %msg, "upstream dependency failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            error: "Unauthorized".to_string(),
        }),
    )
        .into_response()
}

/// Resolve the session from the request's Cookie header.
fn session(state: &AppState, headers: &HeaderMap) -> Option<SessionClaims> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    session_from_cookie_header(cookie_header, &state.auth)
}

fn require_session(state: &AppState, headers: &HeaderMap) -> Result<SessionClaims, Response> {
    session(state, headers).ok_or_else(unauthorized)
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<SessionClaims, Response> {
    let claims = require_session(state, headers)?;
    if !claims.role.is_admin() {
        return Err(ApiError(AppError::Authorization("admin only".to_string())).into_response());
    }
    Ok(claims)
}

// ============================================================================
// Auth handlers
// ============================================================================

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn auth_login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Response {
    if body.email.is_empty() || body.password.is_empty() {
        return ApiError(AppError::validation("Email and password required")).into_response();
    }

    let conn = state.db.lock().unwrap();
    match login(&conn, &body.email, &body.password, &state.auth) {
        Ok((token, claims)) => {
            let employee = match get_employee(&conn, claims.employee_id()) {
                Ok(e) => e,
                Err(e) => return ApiError(e).into_response(),
            };

            let cookie = format!(
                "{}={}; HttpOnly; Path=/; Max-Age={}; SameSite=Lax",
                TOKEN_COOKIE, token, state.auth.token_lifetime_secs
            );

            (
                StatusCode::OK,
                [(header::SET_COOKIE, cookie)],
                Json(serde_json::json!({ "employee": employee })),
            )
                .into_response()
        }
        Err(AppError::Authorization(_)) => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody {
                error: "Invalid credentials".to_string(),
            }),
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn auth_logout() -> impl IntoResponse {
    let cookie = format!("{}=; HttpOnly; Path=/; Max-Age=0; SameSite=Lax", TOKEN_COOKIE);
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({ "success": true })),
    )
}

async fn auth_me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let claims = match require_session(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    match get_employee(&conn, claims.employee_id()) {
        Ok(employee) => Json(employee).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

// ============================================================================
// Reimbursement handlers
// ============================================================================

#[derive(Deserialize)]
struct SubmitRequest {
    #[serde(default)]
    expenses: Vec<ExpenseDraft>,
}

async fn list_reimbursements(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let claims = match require_session(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    match claimdesk::list(&conn, claims.employee_id(), claims.role) {
        Ok(claims_list) => Json(claims_list).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn create_reimbursement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubmitRequest>,
) -> Response {
    let claims = match require_session(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut conn = state.db.lock().unwrap();
    match submit(&mut conn, claims.employee_id(), &body.expenses) {
        Ok(claim) => {
            tracing::info!(
                claim_id = %claim.id,
                total = claim.total_amount,
                items = claim.expenses.len(),
                "claim submitted"
            );
            (StatusCode::CREATED, Json(claim)).into_response()
        }
        Err(e) => ApiError(e).into_response(),
    }
}

async fn approve_reimbursement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let claims = match require_session(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    match approve(&conn, &id, claims.role) {
        Ok(claim) => {
            tracing::info!(claim_id = %id, "claim approved");
            Json(claim).into_response()
        }
        Err(e) => ApiError(e).into_response(),
    }
}

async fn reject_reimbursement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let claims = match require_session(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    match reject(&conn, &id, claims.role) {
        Ok(claim) => {
            tracing::info!(claim_id = %id, "claim rejected");
            Json(claim).into_response()
        }
        Err(e) => ApiError(e).into_response(),
    }
}

#[derive(Deserialize)]
struct PdfQuery {
    currency: Option<String>,
}

async fn reimbursement_pdf(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<PdfQuery>,
) -> Response {
    let claims = match require_session(&state, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    let result: AppResult<Vec<u8>> = (|| {
        let claim = claimdesk::get(&conn, &id, claims.employee_id(), claims.role)?;
        let employee = get_employee(&conn, &claim.employee_id)?;
        let currency = query.currency.as_deref().unwrap_or(DEFAULT_CURRENCY);
        render_claim_pdf(&claim, &employee.name, employee.designation.as_deref(), currency)
    })();

    match result {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/pdf".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"reimbursement-{}.pdf\"", id),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

// ============================================================================
// Limit / designation / employee handlers
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetLimitRequest {
    designation_id: String,
    category: String,
    max_amount: f64,
    period: Option<String>,
}

async fn get_limits(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }

    let conn = state.db.lock().unwrap();
    match list_limits(&conn) {
        Ok(limits) => Json(limits).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn post_limit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SetLimitRequest>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }

    let conn = state.db.lock().unwrap();
    match set_limit(
        &conn,
        &body.designation_id,
        &body.category,
        body.max_amount,
        body.period.as_deref(),
    ) {
        Ok(limit) => (StatusCode::CREATED, Json(limit)).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

#[derive(Deserialize)]
struct CreateDesignationRequest {
    name: String,
}

async fn get_designations(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_session(&state, &headers) {
        return resp;
    }

    let conn = state.db.lock().unwrap();
    match list_designations(&conn) {
        Ok(designations) => Json(designations).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn post_designation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateDesignationRequest>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }

    let conn = state.db.lock().unwrap();
    match create_designation(&conn, &body.name) {
        Ok(designation) => (StatusCode::CREATED, Json(designation)).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn get_employees(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }

    let conn = state.db.lock().unwrap();
    match list_employees(&conn) {
        Ok(employees) => Json(employees).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn post_employee(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewEmployee>,
) -> Response {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }

    let conn = state.db.lock().unwrap();
    match create_employee(&conn, &body) {
        Ok(employee) => (StatusCode::CREATED, Json(employee)).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

// ============================================================================
// Document handlers
// ============================================================================

async fn upload_documents(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if let Err(resp) = require_session(&state, &headers) {
        return resp;
    }

    let mut documents = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return ApiError(AppError::validation(format!("bad multipart body: {}", e)))
                    .into_response()
            }
        };

        let file_name = field
            .file_name()
            .unwrap_or("document")
            .to_string();
        let file_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = match field.bytes().await {
            Ok(b) => b,
            Err(e) => {
                return ApiError(AppError::validation(format!("bad multipart body: {}", e)))
                    .into_response()
            }
        };

        let conn = state.db.lock().unwrap();
        match save_document(&conn, state.storage.as_ref(), &bytes, &file_name, &file_type) {
            Ok(doc) => documents.push(doc),
            Err(e) => return ApiError(e).into_response(),
        }
    }

    if documents.is_empty() {
        return ApiError(AppError::validation("No files provided")).into_response();
    }

    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "documents": documents })),
    )
        .into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OcrRequest {
    file_url: Option<String>,
}

#[derive(Serialize)]
struct OcrResponse {
    expenses: Vec<ExtractedExpense>,
}

async fn run_ocr(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<OcrRequest>,
) -> Response {
    if let Err(resp) = require_session(&state, &headers) {
        return resp;
    }

    let file_url = match body.file_url {
        Some(url) if !url.is_empty() => url,
        _ => return ApiError(AppError::validation("fileUrl is required")).into_response(),
    };

    // Failed extraction degrades to an all-null placeholder item
    let expenses = extract_or_placeholder(state.extractor.as_ref(), &file_url);
    Json(OcrResponse { expenses }).into_response()
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": claimdesk::VERSION }))
}

// ============================================================================
// Main Server
// ============================================================================

/// Extractor used until a vision backend is wired in. Always fails, which the
/// OCR endpoint degrades to placeholder items.
struct UnconfiguredExtractor;

impl ReceiptExtractor for UnconfiguredExtractor {
    fn extract(&self, _file_url: &str) -> AppResult<Vec<ExtractedExpense>> {
        Err(AppError::Upstream("no OCR backend configured".to_string()))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("claimdesk=info".parse().unwrap()),
        )
        .init();

    let db_path = std::env::var("CLAIMDESK_DB").unwrap_or_else(|_| "claimdesk.db".to_string());
    let uploads_dir =
        std::env::var("CLAIMDESK_UPLOADS").unwrap_or_else(|_| "uploads".to_string());

    let conn = Connection::open(&db_path).expect("Failed to open database");
    setup_database(&conn).expect("Failed to set up database schema");
    tracing::info!(db = %db_path, "database opened");

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        auth: AuthConfig::from_env(),
        storage: Arc::new(LocalStorage::new(uploads_dir)),
        extractor: Arc::new(UnconfiguredExtractor),
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/auth/login", post(auth_login))
        .route("/auth/logout", post(auth_logout))
        .route("/auth/me", get(auth_me))
        .route(
            "/reimbursements",
            get(list_reimbursements).post(create_reimbursement),
        )
        .route("/reimbursements/:id/approve", post(approve_reimbursement))
        .route("/reimbursements/:id/reject", post(reject_reimbursement))
        .route("/reimbursements/:id/pdf", get(reimbursement_pdf))
        .route("/limits", get(get_limits).post(post_limit))
        .route("/designations", get(get_designations).post(post_designation))
        .route("/employees", get(get_employees).post(post_employee))
        .route("/documents/upload", post(upload_documents))
        .route("/documents/ocr", post(run_ocr))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let addr = "0.0.0.0:3000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!(addr, "claimdesk server listening");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
