//! The failure taxonomy of the authorization pipeline
//!
//! Failures come in two classes: client errors (a bad or unwelcome
//! credential, reported uniformly as HTTP 401 so callers cannot probe
//! which check rejected them) and infrastructure errors (the gateway's own
//! dependencies are unhealthy, reported as HTTP 500).

use std::error::Error as StdError;

use http::StatusCode;
use thiserror::Error;

/// A computed signature did not match the token signature
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("signature mismatch")]
pub struct SignatureMismatch {
    _p: (),
}

pub(crate) const fn signature_mismatch() -> SignatureMismatch {
    SignatureMismatch { _p: () }
}

/// The key cannot be used with the requested algorithm
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("key incompatible with algorithm '{alg}'")]
pub struct IncompatibleAlgorithm {
    alg: crate::jwa::Algorithm,
}

#[inline]
pub(crate) const fn incompatible_algorithm(alg: crate::jwa::Algorithm) -> IncompatibleAlgorithm {
    IncompatibleAlgorithm { alg }
}

/// The key material was rejected
#[derive(Debug, Error)]
#[error("key rejected")]
pub struct KeyRejected {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn key_rejected(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> KeyRejected {
    KeyRejected {
        source: source.into(),
    }
}

/// An error occurring while producing a token signature
#[derive(Debug, Error)]
pub enum SigningError {
    /// The key holds no secret material usable for signing
    #[error("key cannot be used for signing")]
    NotASigningKey,

    /// The key cannot produce signatures with this algorithm
    #[error(transparent)]
    IncompatibleAlgorithm(#[from] IncompatibleAlgorithm),

    /// The header or payload could not be serialized
    #[error("unable to serialize token part")]
    Serialization(#[from] serde_json::Error),
}

/// A reason the claims policy rejected an otherwise authentic token
#[derive(Debug, Error)]
pub enum ClaimsRejected {
    /// The signing algorithm is not on the approved list
    #[error("algorithm not approved")]
    InvalidAlgorithm,

    /// The token is expired according to the `exp` claim
    #[error("token expired")]
    TokenExpired,

    /// The token is not yet valid according to the `nbf` claim
    #[error("token not yet valid")]
    TokenNotYetValid,

    /// The `iss` claim is not on the trusted-issuer allowlist
    #[error("issuer not trusted")]
    IssuerNotTrusted,

    /// No `aud` value names this service
    #[error("audience mismatch")]
    AudienceMismatch,

    /// The `tenant` claim is not on the trusted-tenant allowlist
    #[error("tenant not trusted")]
    TenantNotTrusted,

    /// A claim the policy requires is absent
    #[error("required `{0}` claim missing")]
    MissingRequiredClaim(&'static str),
}

/// A terminal pipeline failure
///
/// Every stage of the pipeline converts its own trouble into one of these
/// variants; nothing propagates past the pipeline boundary. The
/// [`status`][AuthFailure::status] mapping is the only part of a failure
/// callers are allowed to surface to the requester.
#[derive(Debug, Error)]
pub enum AuthFailure {
    /// The `Authorization` header is absent, empty, or not a bearer credential
    #[error("missing or malformed authorization credential")]
    MissingOrMalformedCredential,

    /// The token segments are not decodable as a JWT
    #[error("malformed token")]
    MalformedToken(#[source] Box<dyn StdError + Send + Sync + 'static>),

    /// A value needed to route the trust lookup is absent from the token
    #[error("required `{0}` value missing from token")]
    MissingRequiredClaim(&'static str),

    /// The trust registry does not recognize the `(issuer, key locator)` pair
    #[error("issuer is not known to the trust registry")]
    UntrustedIssuer,

    /// The trust registry could not be reached
    #[error("trust registry unavailable")]
    RegistryUnavailable(#[source] reqwest::Error),

    /// The key set could not be fetched or parsed
    #[error("key set unavailable")]
    KeySetUnavailable(#[source] Box<dyn StdError + Send + Sync + 'static>),

    /// No key in the resolved key set matches the token header
    #[error("no matching key found to validate token")]
    KeyNotFound,

    /// The token signature does not verify against the resolved key
    #[error("token signature invalid")]
    SignatureInvalid,

    /// The token is authentic but violates the claims policy
    #[error("token rejected by claims policy")]
    ClaimsRejected(#[from] ClaimsRejected),

    /// Replay protection is mandatory and the token carries no `jti`
    #[error("token carries no token identifier")]
    MissingTokenId,

    /// The token identifier was already accepted within the retention window
    #[error("token identifier has already been presented")]
    TokenReplayed,
}

impl AuthFailure {
    /// The HTTP status to surface for this failure
    ///
    /// Client errors all collapse to `401 Unauthorized` so the response
    /// does not reveal which check failed; infrastructure errors map to
    /// `500 Internal Server Error`.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        if self.is_infrastructure() {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::UNAUTHORIZED
        }
    }

    /// Whether the failure reflects an unhealthy dependency rather than a
    /// bad credential
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::RegistryUnavailable(_) | Self::KeySetUnavailable(_)
        )
    }

    pub(crate) fn malformed_token(
        source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self::MalformedToken(source.into())
    }

    pub(crate) fn key_set_unavailable(
        source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self::KeySetUnavailable(source.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_failures_map_to_401() {
        let failures = [
            AuthFailure::MissingOrMalformedCredential,
            AuthFailure::MissingRequiredClaim("iss"),
            AuthFailure::UntrustedIssuer,
            AuthFailure::KeyNotFound,
            AuthFailure::SignatureInvalid,
            AuthFailure::ClaimsRejected(ClaimsRejected::TokenExpired),
            AuthFailure::MissingTokenId,
            AuthFailure::TokenReplayed,
        ];

        for failure in failures {
            assert_eq!(failure.status(), StatusCode::UNAUTHORIZED, "{failure}");
        }
    }

    #[test]
    fn infrastructure_failures_map_to_500() {
        let failure = AuthFailure::key_set_unavailable("connection refused");
        assert_eq!(failure.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(failure.is_infrastructure());
    }
}
