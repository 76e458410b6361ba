//! # RC Test Utilities
//!
//! Shared test utilities for the Room Controller (RC) service.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (issuer and server keys from fixed seeds)
//! - Envelope and access-token builders
//! - In-memory mocks for every collaborator trait (KV store, consumer
//!   backend, repositories, notification publisher, token verifier)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = TestServerKey::new(11);
//!     let envelope = AuthRequestBuilder::new(&server)
//!         .with_access_token("token-1")
//!         .build();
//!
//!     let kv = MockKvStore::new();
//!     kv.seed_user("room1", "user42");
//! }
//! ```

pub mod crypto_fixtures;
pub mod envelope_builders;
pub mod mocks;

pub use crypto_fixtures::*;
pub use envelope_builders::*;
pub use mocks::*;
