//! Request-time JWT authorization with per-request trust discovery.
//!
//! This crate implements the access-control pipeline used by a CDS Hooks
//! gateway: inbound requests carry a bearer JSON Web Token whose signing
//! keys are not statically configured. Instead, the token's issuer and
//! key-set locator are resolved through an external trust registry, the
//! referenced key set is fetched (and cached), and only then is the token
//! cryptographically verified and checked against policy.
//!
//! The pipeline runs front to back, and every stage fails closed:
//!
//! 1. bearer credential extraction
//! 2. structural (unverified) decomposition of the token
//! 3. trust registry resolution of `(iss, jku)`
//! 4. key-set acquisition through a rotating TTL cache
//! 5. signature and claims verification
//! 6. replay suppression on the token identifier
//! 7. a terminal allow/deny decision
//!
//! ```no_run
//! use fhirgate::{Authority, ClaimsPolicy, Decision};
//! use fhirgate::jwt::{Audience, Issuer};
//!
//! # async fn example() -> Result<(), reqwest::Error> {
//! let policy = ClaimsPolicy::default()
//!     .add_trusted_issuer(Issuer::from_static("https://ehr.example.com"))
//!     .require_audience(Audience::from_static("https://cds.example.com/hooks"));
//!
//! let authority = Authority::builder("http://registry-service:8081")
//!     .policy(policy)
//!     .build()?;
//!
//! match authority.authorize(Some("Bearer eyJhbGciOi…")).await {
//!     Decision::Allow(claims) => println!("allowed: {:?}", claims.claims().iss()),
//!     Decision::Deny(status) => println!("denied: {}", status),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Authentication failures are surfaced to callers as a uniform `401`
//! regardless of which check rejected the token; infrastructure failures
//! (registry or key set unreachable) are surfaced as `500`.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod authority;
mod cache;
pub mod context;
pub mod error;
pub mod jwa;
pub mod jwk;
mod jwks;
pub mod jwt;
mod registry;
mod replay;


pub use authority::{Authority, AuthorityBuilder, Decision};
pub use cache::KeySetCache;
pub use context::RequestContext;
pub use error::AuthFailure;
#[doc(inline)]
pub use jwk::Jwk;
#[doc(inline)]
pub use jwks::Jwks;
#[doc(inline)]
pub use jwt::{ClaimsPolicy, Jwt, JwtRef, TrustedClaims};
pub use registry::{ClientId, ClientIdRef, RegistryRecord, TrustRegistry};
pub use replay::ReplayGuard;
