//! Adapting the authority to an embedding server
//!
//! The gateway does not own a listener; whatever server embeds it exposes
//! a request through [`RequestContext`], and [`enforce`] either hands back
//! the verified claims or short-circuits the request with the appropriate
//! refusal.

use http::StatusCode;

use crate::{authority::Decision, jwt::TrustedClaims, Authority};

/// The body sent with a `401 Unauthorized` refusal
///
/// Deliberately uniform: the refusal never reveals which check failed.
pub const UNAUTHORIZED_BODY: &str = "Unauthorized";

/// The body sent with a `500 Internal Server Error` refusal
pub const INTERNAL_ERROR_BODY: &str = "Internal Server Error";

/// A request as seen by the embedding server
pub trait RequestContext {
    /// The raw `Authorization` header value, if the request carries one
    fn authorization(&self) -> Option<&str>;

    /// Terminates the request with the given status and body
    ///
    /// After this is called the request must not reach the upstream
    /// service.
    fn short_circuit(&mut self, status: StatusCode, body: &'static str);
}

/// Enforces the authority's decision on a request
///
/// On success the verified claims are returned for the embedding server
/// to forward or inspect; on failure the request has already been
/// short-circuited and `None` is returned.
pub async fn enforce<C: RequestContext>(
    authority: &Authority,
    ctx: &mut C,
) -> Option<TrustedClaims> {
    match authority.authorize(ctx.authorization()).await {
        Decision::Allow(claims) => Some(*claims),
        Decision::Deny(status) => {
            let body = if status.is_server_error() {
                INTERNAL_ERROR_BODY
            } else {
                UNAUTHORIZED_BODY
            };
            ctx.short_circuit(status, body);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{
        jwa::Algorithm,
        jwt::{Claims, Headers},
        test,
    };

    #[derive(Default)]
    struct FakeRequest {
        authorization: Option<String>,
        refusal: Option<(StatusCode, &'static str)>,
    }

    impl RequestContext for FakeRequest {
        fn authorization(&self) -> Option<&str> {
            self.authorization.as_deref()
        }

        fn short_circuit(&mut self, status: StatusCode, body: &'static str) {
            self.refusal = Some((status, body));
        }
    }

    #[tokio::test]
    async fn missing_credential_short_circuits_with_401() -> Result<()> {
        let authority = Authority::builder("http://127.0.0.1:1").build()?;
        let mut request = FakeRequest::default();

        let claims = enforce(&authority, &mut request).await;

        assert!(claims.is_none());
        assert_eq!(
            request.refusal,
            Some((StatusCode::UNAUTHORIZED, UNAUTHORIZED_BODY))
        );
        Ok(())
    }

    #[tokio::test]
    async fn infrastructure_failure_short_circuits_with_500() -> Result<()> {
        let authority = Authority::builder("http://127.0.0.1:1")
            .upstream_timeout(std::time::Duration::from_millis(500))
            .build()?;

        let header = Headers::new(Algorithm::HS256)
            .with_key_id(test::KEY_ID)
            .with_key_set_url("http://127.0.0.1:1/jwks.json");
        let claims = Claims::new().with_issuer("issuer-A").with_token_id("jti-1");

        let mut request = FakeRequest {
            authorization: Some(format!("Bearer {}", test::mint_token(&header, &claims).as_str())),
            refusal: None,
        };

        let outcome = enforce(&authority, &mut request).await;

        assert!(outcome.is_none());
        assert_eq!(
            request.refusal,
            Some((StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY))
        );
        Ok(())
    }

    #[tokio::test]
    async fn allowed_request_is_not_short_circuited() -> Result<()> {
        let server = MockServer::start().await;
        let jwks_url = format!("{}/jwks.json", server.uri());

        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test::jwks_json()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/registry"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "clientId": "client-1",
                "jku": jwks_url,
            })))
            .mount(&server)
            .await;

        let authority = Authority::builder(server.uri()).build()?;

        let header = Headers::new(Algorithm::HS256)
            .with_key_id(test::KEY_ID)
            .with_key_set_url(jwks_url.as_str());
        let claims = Claims::new().with_issuer("issuer-A").with_token_id("jti-2");

        let mut request = FakeRequest {
            authorization: Some(format!("Bearer {}", test::mint_token(&header, &claims).as_str())),
            refusal: None,
        };

        let outcome = enforce(&authority, &mut request).await;

        assert!(outcome.is_some());
        assert!(request.refusal.is_none());
        Ok(())
    }
}
