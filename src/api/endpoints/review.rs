//! `POST /api/review-document`: rank a long document's claims by risk.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, ReviewBody};
use crate::collaborators::{record_detached, HistoryEntry, HistoryKind};
use crate::pipeline::review::ReviewResult;

pub async fn review(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    payload: Result<Json<ReviewBody>, JsonRejection>,
) -> Result<Json<ReviewResult>, ApiError> {
    let Json(body) = payload?;
    let (text, max_risk_claims) = body.validated()?;
    ctx.screen(&text)?;
    let caller = ctx.caller(&headers).await;

    let result = ctx.reviewer.review(&text, max_risk_claims).await?;

    if let Some(identity) = caller {
        let entry = HistoryEntry::new(
            &identity.user_id,
            HistoryKind::Review,
            &text,
            serde_json::to_value(&result).unwrap_or_default(),
            result.total_claims_found,
        );
        record_detached(ctx.history.clone(), entry);
    }

    Ok(Json(result))
}
