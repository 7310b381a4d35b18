//! Claim analysis endpoints.
//!
//! - `POST /api/analyze-claims`: full result in one response, `x-cache`
//!   header says whether it came from the request-level cache
//! - `POST /api/analyze-claims/stream`: server-sent events as claims finish
//!
//! Both validate before any upstream call, so malformed input is a plain
//! 400 even on the streaming route.

use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream};
use tokio::sync::mpsc;

use crate::api::error::ApiError;
use crate::api::types::{AnalyzeBody, ApiContext};
use crate::collaborators::{record_detached, HistoryEntry, HistoryKind, Identity};
use crate::pipeline::types::{PipelineEvent, PipelineRequest, PipelineResult};

pub const CACHE_HEADER: &str = "x-cache";

async fn prepare(
    ctx: &ApiContext,
    headers: &HeaderMap,
    payload: Result<Json<AnalyzeBody>, JsonRejection>,
) -> Result<(PipelineRequest, Option<Identity>), ApiError> {
    let Json(body) = payload?;
    ctx.screen(&body.text)?;
    let caller = ctx.caller(headers).await;
    let request = body.into_request(caller.as_ref())?;
    Ok((request, caller))
}

fn record(ctx: &ApiContext, caller: Option<&Identity>, text: &str, result: &PipelineResult) {
    let Some(identity) = caller else {
        return;
    };
    let entry = HistoryEntry::new(
        &identity.user_id,
        HistoryKind::Analyze,
        text,
        serde_json::to_value(result).unwrap_or_default(),
        result.claims.len(),
    );
    record_detached(ctx.history.clone(), entry);
}

pub async fn analyze(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    payload: Result<Json<AnalyzeBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let (request, caller) = prepare(&ctx, &headers, payload).await?;
    let outcome = ctx.orchestrator.run(&request).await?;
    record(&ctx, caller.as_ref(), &request.text, &outcome.result);

    let mut response = Json(outcome.result).into_response();
    let cache = if outcome.cache_hit { "HIT" } else { "MISS" };
    response
        .headers_mut()
        .insert(CACHE_HEADER, HeaderValue::from_static(cache));
    Ok(response)
}

fn sse_event(event: &PipelineEvent) -> Event {
    Event::default()
        .event(event.name())
        .data(event.payload().to_string())
}

pub async fn analyze_stream(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    payload: Result<Json<AnalyzeBody>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (request, caller) = prepare(&ctx, &headers, payload).await?;
    let (tx, rx) = mpsc::unbounded_channel::<PipelineEvent>();

    // Dropping the response stream drops `rx`; the run stops at its next event.
    tokio::spawn(async move {
        if let Some(result) = ctx.orchestrator.run_streaming(&request, tx).await {
            record(&ctx, caller.as_ref(), &request.text, &result);
        }
    });

    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(sse_event(&event)), rx))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
