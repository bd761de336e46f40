//! Bearer-token authentication for the REST and SSE surfaces.
//!
//! `state.api_token_hash` is `None` when `config.api_token` was unset or
//! empty at startup (dev mode: unauthenticated access allowed). Otherwise
//! every protected request must carry `Authorization: Bearer <token>`
//! matching the configured token, compared in constant time so the token's
//! length and content never leak through timing.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub async fn require_bearer_token(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let Some(expected) = &state.api_token_hash else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if !token_matches(expected, provided) {
        return (StatusCode::UNAUTHORIZED, axum::Json(serde_json::json!({ "error": "invalid or missing token" })))
            .into_response();
    }

    next.run(req).await
}

/// Constant-time comparison of a candidate token against a pre-hashed
/// expected digest, used by both the middleware above and the WebSocket
/// upgrade handler (which authenticates via a query parameter instead of a
/// header).
pub fn token_matches(expected_hash: &[u8], candidate: &str) -> bool {
    let candidate_hash = Sha256::digest(candidate.as_bytes());
    bool::from(candidate_hash.ct_eq(expected_hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_token_passes() {
        let hash = Sha256::digest(b"secret");
        assert!(token_matches(&hash, "secret"));
    }

    #[test]
    fn wrong_token_fails() {
        let hash = Sha256::digest(b"secret");
        assert!(!token_matches(&hash, "wrong"));
    }
}
