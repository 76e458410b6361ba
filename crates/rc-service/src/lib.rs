//! Room Controller (RC) Service Library
//!
//! Control plane of the meeting platform:
//!
//! - Authorization callout: turns a client's access token into a signed,
//!   room-scoped capability grant, or a signed denial
//! - Room state sync: keeps the relational room record, the room's KV
//!   namespace and connected clients in step, and writes recording audit
//!   files
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> {capabilities, crypto,
//!                                                     room_state, repositories}
//! ```
//!
//! # Modules
//!
//! - `auth` - Access-token verification
//! - `capabilities` - Allow-list assembly and per-category consumers
//! - `config` - Service configuration from environment
//! - `crypto` - Issuer keys, envelopes, grant validation
//! - `errors` - Error types with HTTP status code mapping
//! - `kv` - Bucketed key-value storage
//! - `room_state` - Room and participant namespaces
//! - `repositories` - Relational room and recording records
//! - `services` - Callout, state sync, notifications, audit files

pub mod auth;
pub mod capabilities;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod kv;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod room_state;
pub mod routes;
pub mod services;
