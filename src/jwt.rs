//! Token decomposition, claim types, and the claims policy
//!
//! A bearer token moves through three levels of trust:
//!
//! 1. [`JwtRef`] — an opaque credential pulled from the `Authorization`
//!    header; nothing about it is known.
//! 2. [`Decomposed`] — the header and payload parsed *without* signature
//!    verification. Every accessor is prefixed `untrusted_`; these values
//!    exist only to route the trust lookup and must never be used to
//!    grant access.
//! 3. [`TrustedClaims`] — produced exclusively by
//!    [`Decomposed::verify`], after the signature has been checked
//!    against a registry-resolved key and the claims policy has passed.
//!
//! The key locator (`jku`) is deliberately read from the token *header*,
//! not the payload: it is routing metadata supplied by the sender's
//! infrastructure, while the issuer is an identity claim. Conflating the
//! two would let a sender redirect the trust lookup through a field meant
//! to express identity.

use std::{fmt, time::Duration};

use aliri_base64::Base64Url;
use aliri_braid::braid;
use aliri_clock::{Clock, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{
    error::{self, AuthFailure, ClaimsRejected},
    jwa::{Algorithm, Signer, Verifier},
    jwk::{KeyId, KeyIdRef},
    Jwk,
};

/// An issuer of tokens
#[braid(serde, ref_doc = "A borrowed reference to an [`Issuer`]")]
pub struct Issuer;

/// An audience a token is intended for
#[braid(serde, ref_doc = "A borrowed reference to an [`Audience`]")]
pub struct Audience;

/// A tenant on whose behalf a token was issued
#[braid(serde, ref_doc = "A borrowed reference to a [`Tenant`]")]
pub struct Tenant;

/// A unique token identifier (the `jti` claim)
#[braid(serde, ref_doc = "A borrowed reference to a [`TokenId`]")]
pub struct TokenId;

/// The location of a published key set (the `jku` header parameter)
#[braid(serde, ref_doc = "A borrowed reference to a [`KeySetUrl`]")]
pub struct KeySetUrl;

/// A JSON Web Token
///
/// This type redacts itself in [`Debug`][JwtRef#impl-Debug] and
/// [`Display`][JwtRef#impl-Display] output to prevent credentials from
/// leaking into logs.
#[braid(
    serde,
    debug = "owned",
    display = "owned",
    ord = "omit",
    ref_doc = "\
    A borrowed reference to a JSON Web Token ([`Jwt`])\n\
    \n\
    This type redacts itself in `Debug` and `Display` output to prevent \
    credentials from leaking into logs.
    "
)]
#[must_use]
pub struct Jwt;

/// Prints a redaction placeholder unless the alternate form (`{:#?}`) is
/// requested, and even then omits the signature.
impl fmt::Debug for JwtRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            match self.0.rfind('.') {
                Some(last_dot) => write!(f, "\"{}…\"", &self.0[..=last_dot]),
                None => f.write_str("\"…\""),
            }
        } else {
            f.write_str("***JWT***")
        }
    }
}

/// Prints a redaction placeholder unless the alternate form (`{:#}`) is
/// requested, and even then omits the signature.
impl fmt::Display for JwtRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            match self.0.rfind('.') {
                Some(last_dot) => write!(f, "{}…", &self.0[..=last_dot]),
                None => f.write_str("…"),
            }
        } else {
            f.write_str("***JWT***")
        }
    }
}

impl JwtRef {
    /// Extracts the bearer credential from an `Authorization` header value
    ///
    /// The `Bearer ` prefix is matched exactly and case-sensitively; a
    /// header without it, or with nothing after it, yields `None`.
    #[must_use]
    pub fn from_bearer(header: &str) -> Option<&Self> {
        header
            .strip_prefix("Bearer ")
            .filter(|token| !token.is_empty())
            .map(Self::from_str)
    }

    /// Decomposes the token into its parts without verifying anything
    ///
    /// # Errors
    ///
    /// Returns an error if the token does not have three dot-separated,
    /// base64url-decodable, JSON-parseable segments.
    pub fn decompose(&self) -> Result<Decomposed<'_>, AuthFailure> {
        let mut segments = self.as_str().splitn(3, '.');
        let (h_str, p_str, s_str) = match (
            segments.next(),
            segments.next(),
            segments.next(),
        ) {
            (Some(h), Some(p), Some(s)) => (h, p, s),
            _ => return Err(AuthFailure::malformed_token("expected three token segments")),
        };

        let h_raw = Base64Url::from_encoded(h_str).map_err(AuthFailure::malformed_token)?;
        let p_raw = Base64Url::from_encoded(p_str).map_err(AuthFailure::malformed_token)?;
        let signature = Base64Url::from_encoded(s_str).map_err(AuthFailure::malformed_token)?;

        let header: Headers =
            serde_json::from_slice(h_raw.as_slice()).map_err(AuthFailure::malformed_token)?;
        let claims: Claims =
            serde_json::from_slice(p_raw.as_slice()).map_err(AuthFailure::malformed_token)?;

        let message_len = h_str.len() + p_str.len() + 1;
        Ok(Decomposed {
            header,
            claims,
            message: &self.as_str()[..message_len],
            signature,
        })
    }
}

impl Jwt {
    /// Constructs a signed token from a header and claims
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot sign with the algorithm named
    /// in the header.
    pub fn try_from_parts(
        header: &Headers,
        claims: &Claims,
        key: &Jwk,
    ) -> Result<Self, error::SigningError> {
        let h_raw = Base64Url::from_raw(serde_json::to_vec(header)?);
        let p_raw = Base64Url::from_raw(serde_json::to_vec(claims)?);

        let mut message = format!("{h_raw}.{p_raw}");
        let signature = Base64Url::from_raw(key.sign(header.alg(), message.as_bytes())?);
        message.push('.');
        message.push_str(&signature.to_string());

        Ok(Self::new(message))
    }
}

/// The parsed token header
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct Headers {
    alg: Algorithm,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<KeyId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    jku: Option<KeySetUrl>,
}

impl Headers {
    /// Constructs a header naming only a signing algorithm
    pub const fn new(alg: Algorithm) -> Self {
        Self {
            alg,
            kid: None,
            jku: None,
        }
    }

    /// Sets the key identifier
    pub fn with_key_id(self, kid: impl Into<KeyId>) -> Self {
        Self {
            kid: Some(kid.into()),
            ..self
        }
    }

    /// Sets the key-set locator
    pub fn with_key_set_url(self, jku: impl Into<KeySetUrl>) -> Self {
        Self {
            jku: Some(jku.into()),
            ..self
        }
    }

    /// The algorithm asserted by the header
    #[must_use]
    pub fn alg(&self) -> Algorithm {
        self.alg
    }

    /// The key identifier, if present
    #[must_use]
    pub fn kid(&self) -> Option<&KeyIdRef> {
        self.kid.as_deref()
    }

    /// The key-set locator, if present
    #[must_use]
    pub fn jku(&self) -> Option<&KeySetUrlRef> {
        self.jku.as_deref()
    }
}

/// A set of zero or more [`Audience`]s
///
/// The `aud` claim may be a single string or an array; both forms
/// deserialize into this set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OneOrMany<Audience>", into = "OneOrMany<Audience>")]
#[must_use]
pub struct Audiences(Vec<Audience>);

impl Audiences {
    /// An empty audience set
    #[inline]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// An audience set with a single audience
    #[inline]
    pub fn single(aud: impl Into<Audience>) -> Self {
        Self(vec![aud.into()])
    }

    /// Whether the audience set is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the audiences in the set
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &AudienceRef> {
        self.0.iter().map(AsRef::as_ref)
    }

    /// Whether the set names the given audience
    #[must_use]
    pub fn contains(&self, aud: &AudienceRef) -> bool {
        self.iter().any(|a| a == aud)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl From<OneOrMany<Audience>> for Audiences {
    #[inline]
    fn from(vals: OneOrMany<Audience>) -> Self {
        match vals {
            OneOrMany::One(x) => Self(vec![x]),
            OneOrMany::Many(v) => Self(v),
        }
    }
}

impl From<Audiences> for OneOrMany<Audience> {
    #[inline]
    fn from(mut set: Audiences) -> Self {
        if set.0.len() == 1 {
            match set.0.pop() {
                Some(aud) => Self::One(aud),
                None => Self::Many(Vec::new()),
            }
        } else {
            Self::Many(set.0)
        }
    }
}

impl From<Vec<Audience>> for Audiences {
    #[inline]
    fn from(vals: Vec<Audience>) -> Self {
        Self(vals)
    }
}

/// The token payload
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Audiences::is_empty")]
    aud: Audiences,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    iss: Option<Issuer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    jti: Option<TokenId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    tenant: Option<Tenant>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<UnixTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    nbf: Option<UnixTime>,
}

impl Claims {
    /// Constructs an empty payload
    pub const fn new() -> Self {
        Self {
            aud: Audiences::empty(),
            iss: None,
            jti: None,
            tenant: None,
            exp: None,
            nbf: None,
        }
    }

    /// Sets the `iss` claim
    pub fn with_issuer(mut self, iss: impl Into<Issuer>) -> Self {
        self.iss = Some(iss.into());
        self
    }

    /// Sets the `aud` claim to a single audience
    pub fn with_audience(mut self, aud: impl Into<Audience>) -> Self {
        self.aud = Audiences::single(aud);
        self
    }

    /// Sets the `jti` claim
    pub fn with_token_id(mut self, jti: impl Into<TokenId>) -> Self {
        self.jti = Some(jti.into());
        self
    }

    /// Sets the `tenant` claim
    pub fn with_tenant(mut self, tenant: impl Into<Tenant>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Sets the `exp` claim
    pub fn with_expiration(mut self, time: UnixTime) -> Self {
        self.exp = Some(time);
        self
    }

    /// Sets the `exp` claim relative to the given clock
    pub fn with_future_expiration<C: Clock>(mut self, secs: u64, clock: &C) -> Self {
        self.exp = Some(UnixTime(clock.now().0 + secs));
        self
    }

    /// Sets the `nbf` claim
    pub fn with_not_before(mut self, time: UnixTime) -> Self {
        self.nbf = Some(time);
        self
    }

    /// The issuer, if present
    #[must_use]
    pub fn iss(&self) -> Option<&IssuerRef> {
        self.iss.as_deref()
    }

    /// The audiences
    #[must_use]
    pub fn aud(&self) -> &Audiences {
        &self.aud
    }

    /// The token identifier, if present
    #[must_use]
    pub fn jti(&self) -> Option<&TokenIdRef> {
        self.jti.as_deref()
    }

    /// The tenant, if present
    #[must_use]
    pub fn tenant(&self) -> Option<&TenantRef> {
        self.tenant.as_deref()
    }

    /// The expiration time, if present
    #[must_use]
    pub fn exp(&self) -> Option<UnixTime> {
        self.exp
    }

    /// The not-before time, if present
    #[must_use]
    pub fn nbf(&self) -> Option<UnixTime> {
        self.nbf
    }
}

/// A structurally parsed token whose signature has not been verified
///
/// **WARNING:** nothing in this structure can be trusted. An adversary
/// controls every byte of the header and payload. The only legitimate
/// uses are routing the trust lookup ([`trust_hints`][Self::trust_hints])
/// and selecting a verification key.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct Decomposed<'a> {
    header: Headers,
    claims: Claims,
    message: &'a str,
    signature: Base64Url,
}

impl<'a> Decomposed<'a> {
    /// The unverified token header
    pub fn untrusted_header(&self) -> &Headers {
        &self.header
    }

    /// The unverified token payload
    pub fn untrusted_claims(&self) -> &Claims {
        &self.claims
    }

    /// The values needed to route the trust lookup
    ///
    /// The issuer comes from the payload; the key locator comes from the
    /// header. Both must be present and non-empty before any network
    /// traffic is worth spending on this token.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is absent or empty.
    pub fn trust_hints(&self) -> Result<(&IssuerRef, &KeySetUrlRef), AuthFailure> {
        let issuer = self
            .claims
            .iss()
            .filter(|iss| !iss.as_str().is_empty())
            .ok_or(AuthFailure::MissingRequiredClaim("iss"))?;

        let key_locator = self
            .header
            .jku()
            .filter(|jku| !jku.as_str().is_empty())
            .ok_or(AuthFailure::MissingRequiredClaim("jku"))?;

        Ok((issuer, key_locator))
    }

    /// Verifies the token signature and claims against a resolved key
    ///
    /// The signature is checked first, using the algorithm the key
    /// declares, then the claims policy is evaluated. Success is the only
    /// way to obtain a [`TrustedClaims`].
    ///
    /// # Errors
    ///
    /// Returns an error if the signature does not verify or the policy
    /// rejects the claims.
    pub fn verify(self, key: &Jwk, policy: &ClaimsPolicy) -> Result<TrustedClaims, AuthFailure> {
        self.verify_with_clock(key, policy, &System)
    }

    /// Verifies as [`verify`][Self::verify], against the provided clock
    ///
    /// # Errors
    ///
    /// Returns an error if the signature does not verify or the policy
    /// rejects the claims.
    pub fn verify_with_clock<C: Clock>(
        self,
        key: &Jwk,
        policy: &ClaimsPolicy,
        clock: &C,
    ) -> Result<TrustedClaims, AuthFailure> {
        let alg = key
            .verification_algorithm(self.header.alg())
            .ok_or(AuthFailure::SignatureInvalid)?;

        key.verify(alg, self.message.as_bytes(), self.signature.as_slice())
            .map_err(|_| AuthFailure::SignatureInvalid)?;

        policy.validate_with_clock(&self.header, &self.claims, clock)?;

        Ok(TrustedClaims {
            header: self.header,
            claims: self.claims,
        })
    }
}

/// The header and claims of a verified, policy-approved token
///
/// This type can only be constructed by [`Decomposed::verify`], so
/// holding one is proof the token's signature checked out against a
/// registry-resolved key and its claims passed policy.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct TrustedClaims {
    header: Headers,
    claims: Claims,
}

impl TrustedClaims {
    /// The verified token header
    #[must_use]
    pub fn header(&self) -> &Headers {
        &self.header
    }

    /// The verified token claims
    #[must_use]
    pub fn claims(&self) -> &Claims {
        &self.claims
    }
}

/// The policy a verified token's claims must satisfy
///
/// Checks whose configuration is left empty are skipped: an empty issuer
/// allowlist admits any issuer, no expected audience skips the audience
/// check, and an empty tenant allowlist skips the tenant check. Temporal
/// claims are validated whenever the token carries them.
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct ClaimsPolicy {
    approved_algorithms: Vec<Algorithm>,
    trusted_issuers: Vec<Issuer>,
    trusted_audience: Option<Audience>,
    trusted_tenants: Vec<Tenant>,
    leeway: Duration,
}

impl ClaimsPolicy {
    /// Allows a grace period on either side of `exp` and `nbf`
    #[inline]
    pub fn with_leeway(self, leeway: Duration) -> Self {
        Self { leeway, ..self }
    }

    /// Approves a signing algorithm
    ///
    /// With no approved algorithms configured, any supported algorithm
    /// is accepted.
    #[inline]
    pub fn add_approved_algorithm(mut self, alg: Algorithm) -> Self {
        self.approved_algorithms.push(alg);
        self
    }

    /// Adds an issuer to the trusted-issuer allowlist
    #[inline]
    pub fn add_trusted_issuer(mut self, iss: Issuer) -> Self {
        self.trusted_issuers.push(iss);
        self
    }

    /// Requires the token audience to name this service
    #[inline]
    pub fn require_audience(self, aud: Audience) -> Self {
        Self {
            trusted_audience: Some(aud),
            ..self
        }
    }

    /// Adds a tenant to the trusted-tenant allowlist
    ///
    /// Configuring any tenant makes the `tenant` claim mandatory.
    #[inline]
    pub fn add_trusted_tenant(mut self, tenant: Tenant) -> Self {
        self.trusted_tenants.push(tenant);
        self
    }

    pub(crate) fn validate_with_clock<C: Clock>(
        &self,
        header: &Headers,
        claims: &Claims,
        clock: &C,
    ) -> Result<(), ClaimsRejected> {
        let now = clock.now();

        if !self.approved_algorithms.is_empty()
            && !self.approved_algorithms.contains(&header.alg())
        {
            return Err(ClaimsRejected::InvalidAlgorithm);
        }

        if let Some(exp) = claims.exp() {
            if exp.0 < now.0.saturating_sub(self.leeway.as_secs()) {
                return Err(ClaimsRejected::TokenExpired);
            }
        }

        if let Some(nbf) = claims.nbf() {
            if nbf.0 > now.0.saturating_add(self.leeway.as_secs()) {
                return Err(ClaimsRejected::TokenNotYetValid);
            }
        }

        if !self.trusted_issuers.is_empty() {
            let iss = claims
                .iss()
                .ok_or(ClaimsRejected::MissingRequiredClaim("iss"))?;
            if !self.trusted_issuers.iter().any(|t| t == iss) {
                return Err(ClaimsRejected::IssuerNotTrusted);
            }
        }

        if let Some(expected) = &self.trusted_audience {
            if claims.aud().is_empty() {
                return Err(ClaimsRejected::MissingRequiredClaim("aud"));
            }
            if !claims.aud().contains(expected) {
                return Err(ClaimsRejected::AudienceMismatch);
            }
        }

        if !self.trusted_tenants.is_empty() {
            let tenant = claims
                .tenant()
                .ok_or(ClaimsRejected::MissingRequiredClaim("tenant"))?;
            if !self.trusted_tenants.iter().any(|t| t == tenant) {
                return Err(ClaimsRejected::TenantNotTrusted);
            }
        }

        Ok(())
    }
}
