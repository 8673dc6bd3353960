//! API Service - HTTP front end for inventory reports
//!
//! Endpoints:
//! - GET /health - Health check
//! - POST /informe - Summary of an uploaded workbook for one gerencia
//! - POST /informe/csv - Filtered rows of an uploaded workbook as CSV
//! - POST /historico - Save the filtered rows into the history
//! - GET /historico - Saved reports, newest first
//! - GET /historico/archivo - Download one saved archive
//!
//! Uploads are sent as the raw request body; `archivo` carries the original
//! file name so the workbook format can be detected from its extension.

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, DefaultBodyLimit, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use informe_core::export::{csv_file_name, file_name_prefix};
use informe_core::filter::{distinct_values, COVERAGE_COLUMN, STATUS_COLUMN};
use informe_core::format::format_currency;
use informe_core::history::newest_first;
use informe_core::loader::stage_upload;
use informe_core::pipeline::PipelineOptions;
use informe_core::{
    explore, to_csv, Config, ExploreFilter, HistoryEntry, HistoryError, HistoryLog, LoadError,
    Period, Pipeline, Report,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

// ============================================================================
// State
// ============================================================================

struct AppState {
    config: Config,
    pipeline: Pipeline,
    history: HistoryLog,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct InformeResponse {
    gerencia: String,
    #[serde(flatten)]
    report: Report,
    total_value_formatted: String,
    /// Explorer choices for the filtered rows
    estados: Vec<String>,
    coberturas: Vec<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Errors
// ============================================================================

struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<LoadError> for ApiError {
    fn from(e: LoadError) -> Self {
        log::warn!("Load failed: {}", e);
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: e.to_string(),
        }
    }
}

impl From<HistoryError> for ApiError {
    fn from(e: HistoryError) -> Self {
        let status = match e {
            HistoryError::InvalidPeriod(_) => StatusCode::UNPROCESSABLE_ENTITY,
            HistoryError::UnknownArchive(_) => StatusCode::NOT_FOUND,
            _ => {
                log::error!("History failure: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: rejection.body_text(),
        }
    }
}

// ============================================================================
// Query params
// ============================================================================

#[derive(Deserialize)]
struct InformeQuery {
    archivo: String,
    gerencia: Option<String>,
}

#[derive(Deserialize)]
struct CsvQuery {
    archivo: String,
    gerencia: Option<String>,
    estado: Option<String>,
    cobertura: Option<String>,
    buscar: Option<String>,
}

#[derive(Deserialize)]
struct HistoricoQuery {
    archivo: String,
    gerencia: Option<String>,
    mes: Option<String>,
    anio: Option<i32>,
    usuario: Option<String>,
}

#[derive(Deserialize)]
struct ArchivoQuery {
    nombre: String,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Stage the body, run the pipeline, drop the staged file
async fn analyze_upload(
    state: &AppState,
    archivo: &str,
    gerencia: &str,
    body: &[u8],
) -> Result<Report, ApiError> {
    let staged = stage_upload(body, archivo)?;
    log::info!(
        "Upload '{}' ({} bytes, {}) for '{}'",
        archivo,
        body.len(),
        staged.format(),
        gerencia
    );
    Ok(state.pipeline.analyze(staged.path(), gerencia).await?)
}

fn gerencia_or_default(state: &AppState, gerencia: Option<String>) -> String {
    gerencia
        .filter(|g| !g.trim().is_empty())
        .unwrap_or_else(|| state.config.default_gerencia.clone())
}

async fn informe_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<InformeQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Json<InformeResponse>, ApiError> {
    let Query(params) = params?;
    let gerencia = gerencia_or_default(&state, params.gerencia);
    let report = analyze_upload(&state, &params.archivo, &gerencia, &body).await?;

    Ok(Json(InformeResponse {
        estados: distinct_values(&report.dataset, STATUS_COLUMN),
        coberturas: distinct_values(&report.dataset, COVERAGE_COLUMN),
        total_value_formatted: format_currency(report.summary.total_value),
        gerencia,
        report,
    }))
}

async fn csv_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<CsvQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let Query(params) = params?;
    let gerencia = gerencia_or_default(&state, params.gerencia);
    let report = analyze_upload(&state, &params.archivo, &gerencia, &body).await?;

    let filter = ExploreFilter {
        status: params.estado,
        coverage: params.cobertura,
        search: params.buscar,
    };
    let rows = explore(&report.dataset, &filter);
    let bytes = to_csv(&rows).map_err(|e| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: e.to_string(),
    })?;

    let period = Period::current();
    let file_name = csv_file_name(&file_name_prefix(&gerencia), period.month(), period.year());

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn save_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<HistoricoQuery>, QueryRejection>,
    body: Bytes,
) -> Result<(StatusCode, Json<HistoryEntry>), ApiError> {
    let Query(params) = params?;
    let current = Period::current();
    let period = Period::new(
        params.mes.as_deref().unwrap_or(current.month()),
        params.anio.unwrap_or(current.year()),
    )?;
    let user = params
        .usuario
        .unwrap_or_else(|| state.config.default_user.clone());
    let gerencia = gerencia_or_default(&state, params.gerencia);

    let report = analyze_upload(&state, &params.archivo, &gerencia, &body).await?;
    if let Some(warning) = report.warning {
        return Err(ApiError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: warning.to_string(),
        });
    }

    let entry = state.history.append(report.dataset, period, user).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let entries = state.history.list().await?;
    Ok(Json(newest_first(entries)))
}

async fn archive_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ArchivoQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params?;
    let bytes = state.history.archive(params.nombre.as_str()).await?;

    // Listed archive names are already plain, keep the header safe regardless
    let file_name: String = params
        .nombre
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();

    Ok((
        [
            (
                header::CONTENT_TYPE,
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    )
        .into_response())
}

// ============================================================================
// Router
// ============================================================================

fn build_app(config: Config) -> anyhow::Result<Router> {
    let history = HistoryLog::spawn(&config.history_dir).context("Failed to start history writer")?;
    let pipeline = Pipeline::new(PipelineOptions {
        sheet_name: config.sheet_name.clone(),
        loader: config.loader_options(),
    });
    let body_limit = config.max_upload_bytes;

    let state = Arc::new(AppState {
        config,
        pipeline,
        history,
    });

    // CORS for web frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Ok(Router::new()
        .route("/health", get(health_handler))
        .route("/informe", post(informe_handler))
        .route("/informe/csv", post(csv_handler))
        .route("/historico", get(history_handler).post(save_handler))
        .route("/historico/archivo", get(archive_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::from_env().context("Invalid configuration")?;
    let bind = config.api_bind.clone();

    println!("=== Informe API ===");
    println!("History dir: {}", config.history_dir.display());
    println!("Sheet: {}", config.sheet_name);

    let app = build_app(config)?;

    println!("API listening on http://{}", bind);
    println!("\nEndpoints:");
    println!("  GET  /health");
    println!("  POST /informe?archivo=&gerencia=");
    println!("  POST /informe/csv?archivo=&gerencia=&estado=&cobertura=&buscar=");
    println!("  POST /historico?archivo=&gerencia=&mes=&anio=&usuario=");
    println!("  GET  /historico");
    println!("  GET  /historico/archivo?nombre=");

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
