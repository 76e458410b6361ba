//! Authorization callout integration tests.
//!
//! Drives `AuthCalloutService::handle` end to end: signed request envelope
//! in, signed response envelope out, with in-memory room state and consumer
//! storage.

use rc_service::auth::AccessTokenVerifier;
use rc_service::capabilities::{CapabilityAssembler, ProvisionerSet, RetryPolicy};
use rc_service::config::{SubjectsConfig, DEFAULT_ACCOUNT_NAME};
use rc_service::crypto::{IssuerKeyPair, TokenCodec};
use rc_service::errors::INVALID_ACCESS_TOKEN_MESSAGE;
use rc_service::room_state::RoomStateStore;
use rc_service::services::AuthCalloutService;
use rc_test_utils::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ISSUER_SEED: u8 = 7;
const SERVER_SEED: u8 = 11;

struct Harness {
    service: AuthCalloutService,
    kv: Arc<MockKvStore>,
    consumers: Arc<MockConsumerBackend>,
    issuer: Arc<IssuerKeyPair>,
}

fn harness_with(
    verifier: Arc<dyn AccessTokenVerifier>,
    consumers: MockConsumerBackend,
    retry: RetryPolicy,
) -> Harness {
    let issuer = test_issuer(ISSUER_SEED);
    let kv = Arc::new(MockKvStore::new());
    let consumers = Arc::new(consumers);
    let subjects = SubjectsConfig::default();

    let assembler = CapabilityAssembler::new(
        ProvisionerSet::streams(consumers.clone(), &subjects),
        &subjects,
        retry,
    );
    let service = AuthCalloutService::new(
        TokenCodec::new(issuer.clone(), Duration::from_secs(300)),
        verifier,
        RoomStateStore::new(kv.clone()),
        assembler,
        DEFAULT_ACCOUNT_NAME.to_string(),
    );

    Harness {
        service,
        kv,
        consumers,
        issuer,
    }
}

fn harness() -> Harness {
    harness_with(
        Arc::new(access_token_verifier()),
        MockConsumerBackend::new(),
        RetryPolicy::none(),
    )
}

fn request_for(room_id: &str, user_id: &str) -> String {
    let token = AccessTokenBuilder::new(room_id, user_id).build();
    AuthRequestBuilder::new(&TestServerKey::new(SERVER_SEED))
        .with_access_token(&token)
        .build()
}

// ============================================================================
// Grants
// ============================================================================

/// A known participant gets a grant with the full allow-list, in order.
#[tokio::test]
async fn test_valid_request_grants_expected_allow_list() {
    let h = harness();
    h.kv.seed_user("room1", "user42");

    let envelope = h
        .service
        .handle(&request_for("room1", "user42"), &CancellationToken::new())
        .await;

    let response = decode_response(&envelope, &h.issuer);
    assert_eq!(response.sub, test_user_nkey(1));
    assert_eq!(response.aud, TEST_SERVER_ID);
    assert_eq!(response.iss, h.issuer.public_id());
    assert_eq!(response.nats.error(), None);

    let grant = decode_grant(response.nats.jwt().expect("grant present"), &h.issuer);
    assert_eq!(grant.sub, test_user_nkey(1));
    assert_eq!(grant.aud, DEFAULT_ACCOUNT_NAME);
    assert_eq!(grant.name, "room1:user42");
    assert_eq!(grant.iss, h.issuer.public_id());
    assert_eq!(
        grant.nats.publish.allow,
        vec![
            "$JS.API.INFO",
            "$JS.API.STREAM.INFO.room1",
            "sysJsWorker.room1.user42",
            "$JS.API.CONSUMER.INFO.room1.chat_user42",
            "$JS.API.CONSUMER.MSG.NEXT.room1.chat_user42",
            "$JS.ACK.room1.chat_user42.>",
            "chat.room1.user42",
            "$JS.API.CONSUMER.INFO.room1.sysPublic_user42",
            "$JS.API.CONSUMER.MSG.NEXT.room1.sysPublic_user42",
            "$JS.ACK.room1.sysPublic_user42.>",
            "$JS.API.CONSUMER.INFO.room1.sysPrivate_user42",
            "$JS.API.CONSUMER.MSG.NEXT.room1.sysPrivate_user42",
            "$JS.ACK.room1.sysPrivate_user42.>",
            "$JS.API.CONSUMER.INFO.room1.whiteboard_user42",
            "$JS.API.CONSUMER.MSG.NEXT.room1.whiteboard_user42",
            "$JS.ACK.room1.whiteboard_user42.>",
            "whiteboard.room1.user42",
            "$JS.API.CONSUMER.INFO.room1.dataChannel_user42",
            "$JS.API.CONSUMER.MSG.NEXT.room1.dataChannel_user42",
            "$JS.ACK.room1.dataChannel_user42.>",
            "dataChannel.room1.user42",
        ]
    );
    assert_eq!(h.consumers.consumer_count(), 5);
    assert!(h.consumers.has_consumer("room1", "chat_user42"));
}

/// Two simultaneous connects for the same participant converge on one
/// consumer per category, and both are granted.
#[tokio::test]
async fn test_concurrent_duplicate_requests_converge() {
    let h = harness_with(
        Arc::new(access_token_verifier()),
        MockConsumerBackend::new().with_delay(Duration::from_millis(10)),
        RetryPolicy::none(),
    );
    h.kv.seed_user("room1", "user42");
    let cancel = CancellationToken::new();
    let first = request_for("room1", "user42");
    let second = request_for("room1", "user42");

    let (a, b) = tokio::join!(
        h.service.handle(&first, &cancel),
        h.service.handle(&second, &cancel)
    );

    for envelope in [a, b] {
        let response = decode_response(&envelope, &h.issuer);
        assert!(response.nats.jwt().is_some(), "{:?}", response.nats.error());
    }
    assert_eq!(h.consumers.consumer_count(), 5);
    assert_eq!(h.consumers.creations(), 5);
    assert_eq!(h.consumers.calls(), 10);
}

/// A transient backend failure is retried when the policy allows it.
#[tokio::test]
async fn test_transient_provisioning_failure_is_retried() {
    let h = harness_with(
        Arc::new(access_token_verifier()),
        MockConsumerBackend::new().failing_times("dataChannel", 1),
        RetryPolicy::new(2).with_delays(Duration::from_millis(1), Duration::from_millis(1)),
    );
    h.kv.seed_user("room1", "user42");

    let envelope = h
        .service
        .handle(&request_for("room1", "user42"), &CancellationToken::new())
        .await;

    let response = decode_response(&envelope, &h.issuer);
    assert!(response.nats.jwt().is_some());
    assert_eq!(h.consumers.consumer_count(), 5);
}

// ============================================================================
// Denials
// ============================================================================

/// An envelope not signed by the key it names is denied, and the denial is
/// still signed and addressed.
#[tokio::test]
async fn test_forged_envelope_denied_with_signed_response() {
    let h = harness();
    h.kv.seed_user("room1", "user42");
    let token = AccessTokenBuilder::new("room1", "user42").build();
    let envelope = AuthRequestBuilder::new(&TestServerKey::new(SERVER_SEED))
        .with_access_token(&token)
        .build_signed_by(&TestServerKey::new(SERVER_SEED + 1));

    let reply = h.service.handle(&envelope, &CancellationToken::new()).await;

    let response = decode_response(&reply, &h.issuer);
    assert_eq!(response.nats.jwt(), None);
    assert!(response
        .nats
        .error()
        .expect("error present")
        .starts_with("invalid authorization request"));
    assert_eq!(response.sub, test_user_nkey(1));
    assert_eq!(response.aud, TEST_SERVER_ID);
    assert_eq!(h.consumers.calls(), 0);
}

/// Bytes that are not an envelope at all still get a signed denial.
#[tokio::test]
async fn test_garbage_envelope_denied() {
    let h = harness();

    let reply = h
        .service
        .handle("definitely-not-a-jwt", &CancellationToken::new())
        .await;

    let response = decode_response(&reply, &h.issuer);
    assert_eq!(response.nats.jwt(), None);
    assert!(response.nats.error().is_some());
    assert_eq!(response.sub, "");
    assert_eq!(response.aud, "");
}

#[tokio::test]
async fn test_missing_access_token_denied() {
    let h = harness();
    let envelope = AuthRequestBuilder::new(&TestServerKey::new(SERVER_SEED))
        .without_access_token()
        .build();

    let reply = h.service.handle(&envelope, &CancellationToken::new()).await;

    let response = decode_response(&reply, &h.issuer);
    assert_eq!(response.nats.jwt(), None);
    assert!(response.nats.error().is_some());
}

/// Bad access tokens all produce the same generic text.
#[tokio::test]
async fn test_invalid_access_token_denied_generically() {
    let h = harness();
    h.kv.seed_user("room1", "user42");

    for token in [
        AccessTokenBuilder::new("room1", "user42")
            .signed_with("some-other-secret-that-is-long-enough")
            .build(),
        AccessTokenBuilder::new("room1", "user42")
            .expires_in(-3600)
            .build(),
        AccessTokenBuilder::new("room1", "user42")
            .issued_by("someone-else")
            .build(),
    ] {
        let envelope = AuthRequestBuilder::new(&TestServerKey::new(SERVER_SEED))
            .with_access_token(&token)
            .build();

        let reply = h.service.handle(&envelope, &CancellationToken::new()).await;

        let response = decode_response(&reply, &h.issuer);
        assert_eq!(response.nats.error(), Some(INVALID_ACCESS_TOKEN_MESSAGE));
    }
    assert_eq!(h.consumers.calls(), 0);
}

/// A verified token for a participant the room state does not know.
#[tokio::test]
async fn test_unknown_user_denied() {
    let h = harness();

    let reply = h
        .service
        .handle(&request_for("room1", "user42"), &CancellationToken::new())
        .await;

    let response = decode_response(&reply, &h.issuer);
    assert_eq!(
        response.nats.error(),
        Some("User info not found for userId: user42, roomId: room1")
    );
    assert_eq!(h.consumers.calls(), 0);
}

#[tokio::test]
async fn test_room_state_failure_denied() {
    let h = harness();
    h.kv.seed_user("room1", "user42");
    h.kv.make_unavailable();

    let reply = h
        .service
        .handle(&request_for("room1", "user42"), &CancellationToken::new())
        .await;

    let response = decode_response(&reply, &h.issuer);
    assert!(response
        .nats
        .error()
        .expect("error present")
        .starts_with("room state lookup failed"));
}

/// One category failing denies the whole request.
#[tokio::test]
async fn test_single_category_failure_denies() {
    let h = harness_with(
        Arc::new(access_token_verifier()),
        MockConsumerBackend::new().failing_for("whiteboard"),
        RetryPolicy::none(),
    );
    h.kv.seed_user("room1", "user42");

    let reply = h
        .service
        .handle(&request_for("room1", "user42"), &CancellationToken::new())
        .await;

    let response = decode_response(&reply, &h.issuer);
    assert_eq!(response.nats.jwt(), None);
    let error = response.nats.error().expect("error present");
    assert!(error.contains("whiteboard"), "{error}");
}

/// Ids that would widen a subject are refused before provisioning.
#[tokio::test]
async fn test_wildcard_identifier_denied() {
    let verifier = MockAccessTokenVerifier::new().accepting("tok", "room1", "user.>");
    let h = harness_with(
        Arc::new(verifier),
        MockConsumerBackend::new(),
        RetryPolicy::none(),
    );
    h.kv.seed_user("room1", "user.>");
    let envelope = AuthRequestBuilder::new(&TestServerKey::new(SERVER_SEED))
        .with_access_token("tok")
        .build();

    let reply = h.service.handle(&envelope, &CancellationToken::new()).await;

    let response = decode_response(&reply, &h.issuer);
    assert_eq!(response.nats.jwt(), None);
    assert_eq!(h.consumers.calls(), 0);
}

/// Cancelling an in-flight request yields a signed denial.
#[tokio::test]
async fn test_cancelled_request_denied() {
    let verifier = Arc::new(MockAccessTokenVerifier::new().hanging());
    let h = harness_with(verifier.clone(), MockConsumerBackend::new(), RetryPolicy::none());
    let cancel = CancellationToken::new();
    let envelope = AuthRequestBuilder::new(&TestServerKey::new(SERVER_SEED)).build();

    let (reply, ()) = tokio::join!(h.service.handle(&envelope, &cancel), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let response = decode_response(&reply, &h.issuer);
    assert_eq!(
        response.nats.error(),
        Some("authorization request cancelled")
    );
    assert_eq!(verifier.calls(), 1);
}
