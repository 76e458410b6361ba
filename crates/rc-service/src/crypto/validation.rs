//! Semantic validation of capability grants before signing.
//!
//! Every check runs; faults are collected rather than returned on the first
//! failure, so an operator sees the whole picture in one error response.

use super::claims::UserClaims;
use super::keys::{decode_public_key, KeyKind};
use std::fmt;
use thiserror::Error;

/// A single reason a grant cannot be signed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFault {
    #[error("subject is not a valid user public key")]
    InvalidSubject,

    #[error("issuer is not a valid account public key")]
    InvalidIssuer,

    #[error("audience must not be empty")]
    MissingAudience,

    #[error("name must not be empty")]
    MissingName,

    #[error("publish permissions must allow at least one subject")]
    EmptyPublishAllow,

    #[error("publish allow subject {subject:?} is invalid: {reason}")]
    InvalidPublishSubject {
        subject: String,
        reason: SubjectFault,
    },
}

/// Why a subject string is not a valid subject pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubjectFault {
    #[error("empty subject")]
    Empty,
    #[error("contains whitespace")]
    Whitespace,
    #[error("empty token")]
    EmptyToken,
    #[error("'*' must be a whole token")]
    PartialWildcard,
    #[error("'>' must be the whole last token")]
    MisplacedFullWildcard,
}

/// Non-empty list of validation faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFaults(Vec<ValidationFault>);

impl ValidationFaults {
    pub fn faults(&self) -> &[ValidationFault] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ValidationFaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, fault) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{fault}")?;
        }
        Ok(())
    }
}

/// Check a subject pattern: dot-separated non-empty tokens, `*` only as a
/// whole token, `>` only as the whole last token.
pub fn validate_subject(subject: &str) -> Result<(), SubjectFault> {
    if subject.is_empty() {
        return Err(SubjectFault::Empty);
    }
    if subject.chars().any(char::is_whitespace) {
        return Err(SubjectFault::Whitespace);
    }

    let mut tokens = subject.split('.').peekable();
    while let Some(token) = tokens.next() {
        if token.is_empty() {
            return Err(SubjectFault::EmptyToken);
        }
        if token.contains('*') && token != "*" {
            return Err(SubjectFault::PartialWildcard);
        }
        if token.contains('>') && (token != ">" || tokens.peek().is_some()) {
            return Err(SubjectFault::MisplacedFullWildcard);
        }
    }
    Ok(())
}

/// Validate a grant. Returns every fault found.
///
/// # Errors
///
/// Returns `ValidationFaults` listing all problems when any check fails.
pub fn validate_user_claims(claims: &UserClaims) -> Result<(), ValidationFaults> {
    let mut faults = Vec::new();

    if decode_public_key(KeyKind::User, &claims.sub).is_err() {
        faults.push(ValidationFault::InvalidSubject);
    }
    if decode_public_key(KeyKind::Account, &claims.iss).is_err() {
        faults.push(ValidationFault::InvalidIssuer);
    }
    if claims.aud.trim().is_empty() {
        faults.push(ValidationFault::MissingAudience);
    }
    if claims.name.trim().is_empty() {
        faults.push(ValidationFault::MissingName);
    }

    let allow = &claims.nats.publish.allow;
    if allow.is_empty() {
        faults.push(ValidationFault::EmptyPublishAllow);
    }
    for subject in allow {
        if let Err(reason) = validate_subject(subject) {
            faults.push(ValidationFault::InvalidPublishSubject {
                subject: subject.clone(),
                reason,
            });
        }
    }

    if faults.is_empty() {
        Ok(())
    } else {
        Err(ValidationFaults(faults))
    }
}
