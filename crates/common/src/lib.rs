//! Common utilities shared across Room Controller crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT guards (size limits, clock skew, unverified inspection)
pub mod jwt;
