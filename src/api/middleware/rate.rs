//! Per-caller rate limiting middleware.
//!
//! Sliding one-minute window:
//! - 30 requests for callers the identity provider recognises
//! - 10 requests for anonymous callers, per client address
//!
//! The client address is the connected peer, or the forwarded client when
//! the peer is a configured trusted proxy.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::{client_addr, rate_buckets, ApiContext};

/// Per-caller rate limiting. Returns 429 if exceeded.
/// Accesses `ApiContext` from request extensions.
pub async fn limit(req: Request<axum::body::Body>, next: Next) -> Response {
    match limit_inner(req, next).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn limit_inner(req: Request<axum::body::Body>, next: Next) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let caller = ctx.caller(req.headers()).await;
    let client = client_addr(req.headers(), peer, &ctx.trusted_proxies);
    let buckets = rate_buckets(caller.as_ref(), client);

    // MutexGuard is !Send; drop it before .await via block scope
    {
        let mut limiter = ctx
            .rate_limiter
            .lock()
            .map_err(|_| ApiError::Internal("rate limiter lock".into()))?;

        limiter.check_all(&buckets).map_err(|retry_after| {
            tracing::info!(buckets = ?buckets, retry_after, "Rate limit exceeded");
            ApiError::RateLimited { retry_after }
        })?;
    }

    Ok(next.run(req).await)
}
