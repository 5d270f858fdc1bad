//! OAI-PMH HTTP endpoint.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/oai` | OAI-PMH request in the query string |
//! | `POST` | `/oai` | OAI-PMH request as `application/x-www-form-urlencoded` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Status codes
//!
//! Protocol responses are `application/xml`. A successful response is 200;
//! an OAI-PMH error of `noRecordsMatch` or `idDoesNotExist` is 404 and any
//! other protocol error 400. Failures that prevent building a protocol
//! response use the JSON error body:
//!
//! ```json
//! { "error": { "code": "upstream_unavailable", "message": "Unable to connect to Solr" } }
//! ```
//!
//! `upstream_unavailable` (503) when Solr or the repository fails,
//! `internal` (500) for provider faults.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{ErrorClass, OaiError};
use crate::oai::OaiRepository;
use crate::provider::{FcrepoDataProvider, ProviderContext};

#[derive(Clone)]
struct AppState {
    ctx: ProviderContext,
}

/// Builds the router over an already-wired provider context.
pub fn router(ctx: ProviderContext) -> Router {
    Router::new()
        .route("/oai", get(handle_oai_get).post(handle_oai_post))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { ctx })
}

/// Starts the server and runs until the process is terminated.
///
/// `listen` overrides `[server].listen`. Transforms are loaded before the
/// socket is bound, so an invalid definition prevents startup.
pub async fn run_server(config: &Config, listen: Option<&str>) -> anyhow::Result<()> {
    let ctx = ProviderContext::from_config(config)?;
    let listen = listen.unwrap_or(config.server.listen.as_str());

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(
        "Starting fcrepo-oaipmh/{} on http://{}/oai",
        env!("CARGO_PKG_VERSION"),
        listen
    );
    axum::serve(listener, router(ctx)).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Failure that prevented a protocol response from being built.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<OaiError> for AppError {
    fn from(err: OaiError) -> Self {
        let (status, code) = match err.class() {
            ErrorClass::Unavailable => {
                error!("Upstream error: {}", err);
                (StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable")
            }
            ErrorClass::Internal => {
                error!("Internal error: {}", err);
                return AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: "Internal server error".to_string(),
                };
            }
            ErrorClass::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ErrorClass::BadRequest => (StatusCode::BAD_REQUEST, "bad_request"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ /oai ============

async fn handle_oai_get(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, AppError> {
    respond(&state, &params).await
}

async fn handle_oai_post(
    State(state): State<AppState>,
    Form(params): Form<Vec<(String, String)>>,
) -> Result<Response, AppError> {
    respond(&state, &params).await
}

async fn respond(state: &AppState, params: &[(String, String)]) -> Result<Response, AppError> {
    // Provider and its listing cache are request-scoped.
    let provider = FcrepoDataProvider::new(state.ctx.clone());
    let response = OaiRepository::new(&provider).process(params).await?;

    let status = match response.error {
        None => StatusCode::OK,
        Some(code) if code.is_not_found() => StatusCode::NOT_FOUND,
        Some(_) => StatusCode::BAD_REQUEST,
    };
    Ok((
        status,
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        response.xml,
    )
        .into_response())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
