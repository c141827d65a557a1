//! The authorization authority
//!
//! [`Authority`] strings the pipeline stages together: extract the
//! credential, read its routing hints without trusting them, ask the
//! trust registry for a verdict, resolve key material, verify the
//! signature and claims, and guard against replay. Any stage that cannot
//! positively succeed denies the request.

use std::{sync::Arc, time::Duration};

use aliri_clock::{Clock, System};
use http::StatusCode;

use crate::{
    cache::KeySetCache,
    error::AuthFailure,
    jwt::{ClaimsPolicy, JwtRef, TrustedClaims},
    registry::TrustRegistry,
    replay::ReplayGuard,
};

/// The outcome of authorizing a request
#[derive(Debug)]
#[must_use]
pub enum Decision {
    /// The credential verified; the claims may be trusted
    Allow(Box<TrustedClaims>),

    /// The request must be refused with the given status
    Deny(StatusCode),
}

impl Decision {
    /// Whether the request was allowed
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

#[derive(Debug)]
struct Inner {
    registry: TrustRegistry,
    key_sets: KeySetCache,
    policy: ClaimsPolicy,
    replay: Option<ReplayGuard>,
}

/// An authority that renders authorization decisions for bearer tokens
///
/// Cheap to clone; clones share the key-set cache and replay guard.
#[derive(Clone, Debug)]
pub struct Authority {
    inner: Arc<Inner>,
}

impl Authority {
    /// Begins building an authority against the given registry base URL
    pub fn builder(registry_base_url: impl Into<String>) -> AuthorityBuilder {
        AuthorityBuilder::new(registry_base_url)
    }

    /// Renders an authorization decision for an `Authorization` header
    ///
    /// Denials are logged with the failing stage; token contents and
    /// signatures never appear in the log.
    pub async fn authorize(&self, authorization: Option<&str>) -> Decision {
        match self.check(authorization).await {
            Ok(claims) => {
                tracing::debug!(
                    issuer = claims.claims().iss().map(|i| i.as_str()),
                    "request authorized"
                );
                Decision::Allow(Box::new(claims))
            }
            Err(failure) => {
                let status = failure.status();
                if failure.is_infrastructure() {
                    tracing::error!(error = %failure, "authorization dependency unavailable");
                } else {
                    tracing::info!(error = %failure, "request denied");
                }
                Decision::Deny(status)
            }
        }
    }

    async fn check(&self, authorization: Option<&str>) -> Result<TrustedClaims, AuthFailure> {
        let token = authorization
            .and_then(JwtRef::from_bearer)
            .ok_or(AuthFailure::MissingOrMalformedCredential)?;

        let decomposed = token.decompose()?;
        let (issuer, key_locator) = decomposed.trust_hints()?;

        let record = self.inner.registry.resolve(issuer, key_locator).await?;
        let jwks = self.inner.key_sets.get(record.key_set_url()).await?;

        let key = jwks
            .get_key(
                decomposed.untrusted_header().kid(),
                decomposed.untrusted_header().alg(),
            )
            .ok_or(AuthFailure::KeyNotFound)?;

        let claims = decomposed.verify(key, &self.inner.policy)?;

        if let Some(guard) = &self.inner.replay {
            let token_id = claims
                .claims()
                .jti()
                .ok_or(AuthFailure::MissingTokenId)?;
            guard.check_and_insert(token_id, System.now())?;
        }

        Ok(claims)
    }
}

/// A builder for an [`Authority`]
#[derive(Debug)]
#[must_use]
pub struct AuthorityBuilder {
    registry_base_url: String,
    policy: ClaimsPolicy,
    upstream_timeout: Duration,
    cache_ttl: Duration,
    serve_stale: bool,
    replay_retention: Option<Duration>,
}

impl AuthorityBuilder {
    fn new(registry_base_url: impl Into<String>) -> Self {
        Self {
            registry_base_url: registry_base_url.into(),
            policy: ClaimsPolicy::default(),
            upstream_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(300),
            serve_stale: false,
            replay_retention: Some(Duration::from_secs(600)),
        }
    }

    /// The claims policy verified tokens must satisfy
    pub fn policy(mut self, policy: ClaimsPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The timeout applied to registry and key-set requests
    pub fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    /// How long a fetched key set stays fresh
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Serves the last good key set when a refresh fails
    pub fn serve_stale_key_sets(mut self) -> Self {
        self.serve_stale = true;
        self
    }

    /// How long admitted token identifiers are remembered
    pub fn replay_retention(mut self, retention: Duration) -> Self {
        self.replay_retention = Some(retention);
        self
    }

    /// Disables replay protection
    ///
    /// Without the guard, a captured token replays freely until it
    /// expires. Only appropriate when something upstream already provides
    /// this protection.
    pub fn without_replay_protection(mut self) -> Self {
        self.replay_retention = None;
        self
    }

    /// Builds the authority
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be
    /// constructed.
    pub fn build(self) -> Result<Authority, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(self.upstream_timeout)
            .build()?;

        Ok(Authority {
            inner: Arc::new(Inner {
                registry: TrustRegistry::new(self.registry_base_url, client.clone()),
                key_sets: KeySetCache::new(client, self.cache_ttl, self.serve_stale),
                policy: self.policy,
                replay: self.replay_retention.map(ReplayGuard::new),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{
        jwa::Algorithm,
        jwt::{Audience, Claims, Headers, Issuer},
        test,
    };

    const ISSUER: &str = "https://idp.example.com";

    async fn trusting_registry(server: &MockServer, jwks_url: &str) {
        Mock::given(method("GET"))
            .and(path("/registry"))
            .and(query_param("iss", ISSUER))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "clientId": "client-1",
                "jku": jwks_url,
            })))
            .mount(server)
            .await;
    }

    async fn key_set_endpoint(server: &MockServer) -> String {
        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test::jwks_json()))
            .mount(server)
            .await;
        format!("{}/jwks.json", server.uri())
    }

    fn bearer(header: &Headers, claims: &Claims) -> String {
        format!("Bearer {}", test::mint_token(header, claims).as_str())
    }

    fn token_parts(jwks_url: &str, jti: &str) -> (Headers, Claims) {
        let header = Headers::new(Algorithm::HS256)
            .with_key_id(test::KEY_ID)
            .with_key_set_url(jwks_url);
        let claims = Claims::new()
            .with_issuer(ISSUER)
            .with_audience("this-service")
            .with_token_id(jti);
        (header, claims)
    }

    fn policy() -> ClaimsPolicy {
        ClaimsPolicy::default()
            .add_trusted_issuer(Issuer::from_static(ISSUER))
            .require_audience(Audience::from_static("this-service"))
    }

    #[tokio::test]
    async fn valid_token_is_allowed() -> Result<()> {
        let server = MockServer::start().await;
        let jwks_url = key_set_endpoint(&server).await;
        trusting_registry(&server, &jwks_url).await;

        let authority = Authority::builder(server.uri()).policy(policy()).build()?;

        let (header, claims) = token_parts(&jwks_url, "jti-1");
        let decision = authority.authorize(Some(&bearer(&header, &claims))).await;

        match decision {
            Decision::Allow(trusted) => {
                assert_eq!(trusted.claims().iss().map(|i| i.as_str()), Some(ISSUER));
            }
            Decision::Deny(status) => panic!("expected allow, denied with {status}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn replayed_token_is_denied() -> Result<()> {
        let server = MockServer::start().await;
        let jwks_url = key_set_endpoint(&server).await;
        trusting_registry(&server, &jwks_url).await;

        let authority = Authority::builder(server.uri()).policy(policy()).build()?;

        let (header, claims) = token_parts(&jwks_url, "jti-replayed");
        let credential = bearer(&header, &claims);

        assert!(authority.authorize(Some(&credential)).await.is_allowed());

        match authority.authorize(Some(&credential)).await {
            Decision::Deny(status) => assert_eq!(status, StatusCode::UNAUTHORIZED),
            Decision::Allow(_) => panic!("replayed token must be denied"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn token_without_id_is_denied_when_replay_guard_is_active() -> Result<()> {
        let server = MockServer::start().await;
        let jwks_url = key_set_endpoint(&server).await;
        trusting_registry(&server, &jwks_url).await;

        let authority = Authority::builder(server.uri()).policy(policy()).build()?;

        let header = Headers::new(Algorithm::HS256)
            .with_key_id(test::KEY_ID)
            .with_key_set_url(jwks_url.as_str());
        let claims = Claims::new()
            .with_issuer(ISSUER)
            .with_audience("this-service");

        match authority.authorize(Some(&bearer(&header, &claims))).await {
            Decision::Deny(status) => assert_eq!(status, StatusCode::UNAUTHORIZED),
            Decision::Allow(_) => panic!("token without an identifier must be denied"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn unregistered_issuer_is_denied_with_401() -> Result<()> {
        let server = MockServer::start().await;
        let jwks_url = key_set_endpoint(&server).await;

        Mock::given(method("GET"))
            .and(path("/registry"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let authority = Authority::builder(server.uri()).policy(policy()).build()?;

        let (header, claims) = token_parts(&jwks_url, "jti-2");
        match authority.authorize(Some(&bearer(&header, &claims))).await {
            Decision::Deny(status) => assert_eq!(status, StatusCode::UNAUTHORIZED),
            Decision::Allow(_) => panic!("unregistered issuer must be denied"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_registry_is_denied_with_500() -> Result<()> {
        let authority = Authority::builder("http://127.0.0.1:1")
            .policy(policy())
            .upstream_timeout(Duration::from_millis(500))
            .build()?;

        let (header, claims) = token_parts("http://127.0.0.1:1/jwks.json", "jti-3");
        match authority.authorize(Some(&bearer(&header, &claims))).await {
            Decision::Deny(status) => assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR),
            Decision::Allow(_) => panic!("unreachable registry must deny"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_key_set_is_denied_with_500() -> Result<()> {
        let server = MockServer::start().await;
        let jwks_url = "http://127.0.0.1:1/jwks.json";
        trusting_registry(&server, jwks_url).await;

        let authority = Authority::builder(server.uri())
            .policy(policy())
            .upstream_timeout(Duration::from_millis(500))
            .build()?;

        let (header, claims) = token_parts(jwks_url, "jti-4");
        match authority.authorize(Some(&bearer(&header, &claims))).await {
            Decision::Deny(status) => assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR),
            Decision::Allow(_) => panic!("unreachable key set must deny"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn tampered_token_is_denied() -> Result<()> {
        let server = MockServer::start().await;
        let jwks_url = key_set_endpoint(&server).await;
        trusting_registry(&server, &jwks_url).await;

        let authority = Authority::builder(server.uri()).policy(policy()).build()?;

        let (header, claims) = token_parts(&jwks_url, "jti-5");
        let mut credential = bearer(&header, &claims);
        let sig_start = credential.rfind('.').map(|i| i + 1).unwrap();
        let replacement = if credential.as_bytes()[sig_start] == b'A' { "B" } else { "A" };
        credential.replace_range(sig_start..=sig_start, replacement);

        match authority.authorize(Some(&credential)).await {
            Decision::Deny(status) => assert_eq!(status, StatusCode::UNAUTHORIZED),
            Decision::Allow(_) => panic!("tampered token must be denied"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn malformed_token_is_denied_before_any_lookup() -> Result<()> {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let authority = Authority::builder(server.uri()).policy(policy()).build()?;

        match authority.authorize(Some("Bearer not.a.jwt")).await {
            Decision::Deny(status) => assert_eq!(status, StatusCode::UNAUTHORIZED),
            Decision::Allow(_) => panic!("malformed token must be denied"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn missing_credential_makes_no_upstream_calls() -> Result<()> {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let authority = Authority::builder(server.uri()).policy(policy()).build()?;

        for credential in [None, Some(""), Some("Basic dXNlcjpwYXNz"), Some("Bearer ")] {
            match authority.authorize(credential).await {
                Decision::Deny(status) => assert_eq!(status, StatusCode::UNAUTHORIZED),
                Decision::Allow(_) => panic!("missing credential must be denied"),
            }
        }
        Ok(())
    }
}
