//! Handlers for legacy data migrations.
//!
//! Upload a file for preview, execute a reviewed preview, and browse the
//! run history. Every endpoint is scoped to the `x-tenant-id` tenant.

use std::collections::BTreeMap;

use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use quicksync_core::diff::{DiffCounts, DiffEntry};
use quicksync_core::format::SourceFormat;
use quicksync_core::profile::MappingProfile;
use quicksync_core::resolve::Decision;
use quicksync_core::run::{MigrationMode, MigrationRun, RunEntryLog, RunStatus};
use quicksync_core::types::RunId;
use quicksync_pipeline::{AnalyzeRequest, ExecuteRequest, HistoryQuery, Preview};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::tenant::TenantContext;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// Flat preview payload: the counts sit beside the entries.
#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub run_id: RunId,
    #[serde(flatten)]
    pub counts: DiffCounts,
    pub details: Vec<DiffEntry>,
    pub filename: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub source: String,
    pub format: SourceFormat,
}

impl From<Preview> for PreviewResponse {
    fn from(preview: Preview) -> Self {
        Self {
            run_id: preview.run_id,
            counts: preview.counts,
            details: preview.entries,
            filename: preview.filename,
            entity_type: preview.entity_type,
            source: preview.source_provider,
            format: preview.format,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteOptions {
    /// Operator decisions keyed by source row index.
    #[serde(default)]
    pub decisions: BTreeMap<usize, Decision>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExecuteBody {
    pub run_id: Option<RunId>,
    #[validate(length(min = 1, max = 64))]
    pub source: String,
    #[serde(default)]
    pub mode: MigrationMode,
    #[validate(length(min = 1))]
    pub data: Vec<DiffEntry>,
    #[serde(default)]
    pub options: ExecuteOptions,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub filename: String,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub run_id: RunId,
    pub status: RunStatus,
    pub summary: Option<String>,
    /// The run had already completed; nothing was written this time.
    pub replayed: bool,
}

/// Query parameters for `GET /migrations/history`.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub source: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ---------------------------------------------------------------------------
// Preview
// ---------------------------------------------------------------------------

/// POST /api/v1/migrations/preview
///
/// Multipart fields: `source` (provider id), `file`, and optionally
/// `format` (`csv`, `xlsx`, `json`) and `mode` (`migrate`, `link`).
pub async fn preview(
    State(state): State<AppState>,
    tenant: TenantContext,
    mut multipart: Multipart,
) -> AppResult<Json<PreviewResponse>> {
    let mut source: Option<String> = None;
    let mut format: Option<String> = None;
    let mut mode = MigrationMode::default();
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                file = Some((filename, content_type, data.to_vec()));
            }
            "source" | "format" | "mode" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                let value = value.trim().to_string();
                match name.as_str() {
                    "source" => source = Some(value),
                    "format" => format = Some(value).filter(|v| !v.is_empty()),
                    _ => mode = parse_mode(&value)?,
                }
            }
            _ => {}
        }
    }

    let source = source
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'source' field".to_string()))?;
    let (filename, content_type, bytes) =
        file.ok_or_else(|| AppError::BadRequest("Missing 'file' field".to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
    }

    tracing::debug!(
        tenant_id = %tenant.tenant_id,
        %source,
        %filename,
        size = bytes.len(),
        "Received migration upload"
    );

    let preview = state
        .pipeline
        .analyze(
            &tenant.tenant_id,
            AnalyzeRequest {
                provider: source,
                filename,
                format,
                content_type,
                bytes,
                mode,
            },
        )
        .await?;

    Ok(Json(preview.into()))
}

// ---------------------------------------------------------------------------
// Execute
// ---------------------------------------------------------------------------

/// POST /api/v1/migrations/execute
///
/// The pipeline runs on its own task so a client disconnect cannot cancel
/// a batch halfway through finalizing its run.
pub async fn execute(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(body): Json<ExecuteBody>,
) -> AppResult<Json<ExecuteResponse>> {
    body.validate()?;

    let request = ExecuteRequest {
        run_id: body.run_id,
        provider: body.source,
        mode: body.mode,
        filename: body.filename,
        entries: body.data,
        decisions: body.options.decisions,
    };

    let pipeline = state.pipeline.clone();
    let tenant_id = tenant.tenant_id;
    let report = tokio::spawn(async move { pipeline.execute(&tenant_id, request).await })
        .await
        .map_err(|e| AppError::InternalError(format!("execute task failed: {e}")))??;

    Ok(Json(ExecuteResponse {
        run_id: report.run.run_id,
        status: report.run.status,
        summary: report.run.summary_text,
        replayed: report.replayed,
    }))
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// GET /api/v1/migrations/history
pub async fn list_history(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<Vec<MigrationRun>>> {
    let status = match params.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(s) => Some(RunStatus::from_str(s).ok_or_else(|| {
            AppError::BadRequest(format!(
                "Invalid status '{s}'. Must be one of: {}",
                RunStatus::ALL.join(", ")
            ))
        })?),
    };

    let runs = state
        .pipeline
        .history(
            &tenant.tenant_id,
            HistoryQuery {
                provider: params.source,
                status,
                limit: params.limit,
                offset: params.offset,
            },
        )
        .await?;
    Ok(Json(runs))
}

/// GET /api/v1/migrations/history/{run_id}
pub async fn get_run(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(run_id): Path<RunId>,
) -> AppResult<Json<MigrationRun>> {
    let run = state.pipeline.run(&tenant.tenant_id, run_id).await?;
    Ok(Json(run))
}

/// GET /api/v1/migrations/history/{run_id}/entries
pub async fn list_run_entries(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(run_id): Path<RunId>,
) -> AppResult<Json<Vec<RunEntryLog>>> {
    let entries = state.pipeline.run_entries(&tenant.tenant_id, run_id).await?;
    Ok(Json(entries))
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// GET /api/v1/migrations/providers
pub async fn list_providers(
    State(state): State<AppState>,
    _tenant: TenantContext,
) -> Json<Vec<MappingProfile>> {
    Json(state.pipeline.profiles().iter().cloned().collect())
}

fn parse_mode(value: &str) -> AppResult<MigrationMode> {
    if value.is_empty() {
        return Ok(MigrationMode::default());
    }
    MigrationMode::from_str(value).ok_or_else(|| {
        AppError::BadRequest(format!(
            "Invalid mode '{value}'. Must be one of: {}",
            MigrationMode::ALL.join(", ")
        ))
    })
}
