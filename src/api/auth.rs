use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use log::warn;

use crate::api::models::error_response;
use crate::api::AppState;
use crate::errors::ErrorKind;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Gate for every non-health endpoint: the shared secret must arrive in
/// `X-API-Key`; absence or mismatch is a 401 with a JSON body.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(key) if key == state.config.api_key => next.run(request).await,
        _ => {
            warn!("Rejected request to {} with bad API key", request.uri().path());
            error_response(ErrorKind::Unauthorized)
        }
    }
}
