//! Authorization callout endpoint.
//!
//! The request body is the server-signed request envelope, the response body
//! the issuer-signed response envelope. Denials are regular 200 responses;
//! the decision lives inside the envelope.

use crate::errors::RcError;
use crate::routes::AppState;
use axum::extract::State;
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /internal/auth/callout
///
/// Each request gets its own cancellation token, a child of the process
/// shutdown token, so in-flight decisions stop when the service drains.
#[instrument(skip_all, name = "rc.callout.http")]
pub async fn auth_callout(
    State(state): State<Arc<AppState>>,
    envelope: String,
) -> Result<String, RcError> {
    let cancel = state.shutdown.child_token();
    let response = state.callout.handle(envelope.trim(), &cancel).await;

    if response.is_empty() {
        return Err(RcError::Crypto(
            "authorization response could not be signed".to_string(),
        ));
    }
    Ok(response)
}
