//! Authorization callout.
//!
//! One call per connecting client. The steps run strictly in order:
//! decode the request envelope, verify the access token, look up the
//! participant, assemble the allow-list, sign the grant. Whatever happens,
//! exactly one signed response envelope comes back: a grant, or an error
//! text explaining the denial. There is no path that produces a grant
//! after a failure.

use crate::auth::AccessTokenVerifier;
use crate::capabilities::{AssembleError, CapabilityAssembler};
use crate::crypto::{AuthorizationRequest, AuthorizationResponse, TokenCodec, UserClaims};
use crate::errors::CalloutError;
use crate::observability::metrics::record_auth_callout;
use crate::room_state::RoomStateStore;
use common::secret::ExposeSecret;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

impl From<AssembleError> for CalloutError {
    fn from(err: AssembleError) -> Self {
        match err {
            AssembleError::InvalidIdentifier(_) => CalloutError::Validation(err.to_string()),
            AssembleError::Provisioning { category, source } => CalloutError::Provisioning {
                category: category.as_str(),
                reason: source.to_string(),
            },
        }
    }
}

pub struct AuthCalloutService {
    codec: TokenCodec,
    verifier: Arc<dyn AccessTokenVerifier>,
    room_state: RoomStateStore,
    assembler: CapabilityAssembler,
    account_name: String,
}

impl AuthCalloutService {
    pub fn new(
        codec: TokenCodec,
        verifier: Arc<dyn AccessTokenVerifier>,
        room_state: RoomStateStore,
        assembler: CapabilityAssembler,
        account_name: String,
    ) -> Self {
        Self {
            codec,
            verifier,
            room_state,
            assembler,
            account_name,
        }
    }

    /// Decide one authorization request and return the signed response
    /// envelope.
    ///
    /// Cancelling `cancel` makes any outstanding step fail, which yields a
    /// denial like any other failure. The result is empty only if the
    /// response itself cannot be signed.
    #[instrument(skip_all, name = "rc.callout.handle")]
    pub async fn handle(&self, envelope: &str, cancel: &CancellationToken) -> String {
        let start = Instant::now();

        let request = match self.codec.decode_request(envelope) {
            Ok(request) => request,
            Err(failure) => {
                let user_nkey = failure.identity.user_nkey.unwrap_or_default();
                let server_id = failure.identity.server_id.unwrap_or_default();
                let outcome = Err(CalloutError::Validation(failure.error.to_string()));
                return self.respond(&user_nkey, &server_id, outcome, start);
            }
        };

        let outcome = self.authorize(&request, cancel).await;
        self.respond(&request.user_nkey, &request.server_id, outcome, start)
    }

    async fn authorize(
        &self,
        request: &AuthorizationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, CalloutError> {
        let access = cancellable(
            cancel,
            self.verifier.verify(request.access_token.expose_secret()),
        )
        .await?
        .map_err(|e| {
            debug!(target: "rc.callout", error = %e, "Access token rejected");
            CalloutError::Authentication
        })?;

        let room_id = access.room_id.as_str();
        let user_id = access.user_id.as_str();

        cancellable(cancel, self.room_state.get_user_info(room_id, user_id))
            .await?
            .map_err(|e| CalloutError::Lookup(e.to_string()))?
            .ok_or_else(|| CalloutError::UserNotFound {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
            })?;

        let allow = cancellable(cancel, self.assembler.assemble(room_id, user_id)).await??;

        let claims = UserClaims::new(
            &request.user_nkey,
            &self.account_name,
            UserClaims::display_name(room_id, user_id),
            allow.into_vec(),
        );
        let jwt = self.codec.sign_user_claims(claims)?;

        info!(target: "rc.callout", room_id = %room_id, "Capability grant issued");
        Ok(jwt)
    }

    fn respond(
        &self,
        user_nkey: &str,
        server_id: &str,
        outcome: Result<String, CalloutError>,
        start: Instant,
    ) -> String {
        let response = match outcome {
            Ok(jwt) => {
                record_auth_callout("granted", "none", start.elapsed());
                AuthorizationResponse::granted(jwt)
            }
            Err(e) => {
                warn!(
                    target: "rc.callout",
                    error = %e,
                    reason = e.metric_reason(),
                    "Authorization denied"
                );
                record_auth_callout("denied", e.metric_reason(), start.elapsed());
                AuthorizationResponse::denied(e.to_string())
            }
        };

        match self.codec.encode_response(user_nkey, server_id, response) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(target: "rc.callout", error = %e, "Failed to sign authorization response");
                String::new()
            }
        }
    }
}

/// Run `fut` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, CalloutError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CalloutError::Cancelled),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::capabilities::{FeatureCategory, ProvisionError};

    #[test]
    fn test_provisioning_failure_names_category() {
        let err: CalloutError = AssembleError::Provisioning {
            category: FeatureCategory::Whiteboard,
            source: ProvisionError::Backend("timeout".to_string()),
        }
        .into();

        assert_eq!(err.metric_reason(), "provisioning");
        assert!(err.to_string().contains("whiteboard"));
    }

    #[test]
    fn test_invalid_identifier_is_validation() {
        let err: CalloutError = AssembleError::InvalidIdentifier("room.>".to_string()).into();
        assert_eq!(err.metric_reason(), "validation");
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = cancellable(&cancel, async { 1 }).await;
        assert!(matches!(result, Err(CalloutError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellable_passes_through() {
        let cancel = CancellationToken::new();
        assert_eq!(cancellable(&cancel, async { 1 }).await.unwrap(), 1);
    }
}
