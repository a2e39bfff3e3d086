//! Identity verification.
//!
//! The hub does not issue tokens. It consumes a verifier that maps a bearer
//! token to an [`Identity`] or rejects it.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// An authenticated user reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Create an identity from a subject id.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    /// Get the subject id.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Verification errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token failed validation.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Token is valid but carries no subject.
    #[error("Token has no subject")]
    MissingSubject,

    /// No verifier is configured, so no token can be accepted.
    #[error("Token verification is not configured")]
    NotConfigured,
}

/// Resolves a bearer token to an identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify `token`.
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Rejects every token. Anonymous connections are still admitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

#[async_trait]
impl IdentityVerifier for RejectAll {
    async fn verify(&self, _token: &str) -> Result<Identity, AuthError> {
        Err(AuthError::NotConfigured)
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
}

/// Verifies JWTs signed with a shared secret and maps `sub` to the identity.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier for HS256 tokens.
    #[must_use]
    pub fn hs256(secret: &[u8]) -> Self {
        Self::new(secret, Algorithm::HS256)
    }

    /// Create a verifier for an HMAC algorithm.
    #[must_use]
    pub fn new(secret: &[u8], algorithm: Algorithm) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(algorithm),
        }
    }
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "JWT validation failed");
            AuthError::InvalidToken(e.to_string())
        })?;

        data.claims
            .sub
            .filter(|sub| !sub.is_empty())
            .map(Identity::new)
            .ok_or(AuthError::MissingSubject)
    }
}
