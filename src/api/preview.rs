use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::response::Html;

use crate::artifact::SiteArtifact;
use crate::error::AppError;
use crate::preview;

/// POST /api/preview
///
/// Renders the posted artifact as a sandboxed preview document.
pub async fn render_preview(
    body: Result<Json<SiteArtifact>, JsonRejection>,
) -> Result<Html<String>, AppError> {
    let Json(artifact) = body?;
    Ok(Html(preview::render_document(&artifact)))
}
