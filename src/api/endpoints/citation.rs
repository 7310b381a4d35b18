//! `POST /api/format-citation`: cite an arbitrary web page.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, CitationBody};
use crate::pipeline::source_meta::FormattedCitation;

pub async fn format(
    State(ctx): State<ApiContext>,
    payload: Result<Json<CitationBody>, JsonRejection>,
) -> Result<Json<FormattedCitation>, ApiError> {
    let Json(body) = payload?;
    let citation = ctx
        .citations
        .format_from_url(&body.source_url, body.style, body.format)
        .await?;
    Ok(Json(citation))
}
