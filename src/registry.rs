//! The trust registry client
//!
//! The registry is the per-request source of truth for which
//! `(issuer, key locator)` pairs are trusted. Consulting it on every
//! request means a revocation takes effect immediately; only key material
//! itself is cached.

use aliri_braid::braid;
use serde::Deserialize;

use crate::{
    error::AuthFailure,
    jwt::{IssuerRef, KeySetUrl, KeySetUrlRef},
};

/// The registry's identifier for a registered client
#[braid(serde, ref_doc = "A borrowed reference to a [`ClientId`]")]
pub struct ClientId;

/// A client for a remote trust registry
///
/// Failures split along the 401/500 boundary: a reachable registry that
/// answers anything but 200 means the pair is not trusted (the caller's
/// problem), while an unreachable registry means the gateway cannot
/// render a verdict at all (our problem).
#[derive(Clone, Debug)]
pub struct TrustRegistry {
    base_url: String,
    client: reqwest::Client,
}

/// The registry's verdict for a trusted `(issuer, key locator)` pair
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct RegistryRecord {
    client_id: ClientId,
    key_set_url: KeySetUrl,
}

impl RegistryRecord {
    /// The registered client the issuer belongs to
    #[must_use]
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }

    /// The key-set location the registry endorses for this issuer
    ///
    /// This value, not the token's own locator, is where key material is
    /// fetched from. The registry may answer with an empty location, in
    /// which case no key set can be resolved.
    #[must_use]
    pub fn key_set_url(&self) -> &KeySetUrlRef {
        &self.key_set_url
    }
}

#[derive(Debug, Default, Deserialize)]
struct RecordDto {
    #[serde(rename = "clientId", default)]
    client_id: Option<String>,

    #[serde(default)]
    jku: Option<String>,
}

impl From<RecordDto> for RegistryRecord {
    fn from(dto: RecordDto) -> Self {
        Self {
            client_id: ClientId::new(dto.client_id.unwrap_or_default()),
            key_set_url: KeySetUrl::new(dto.jku.unwrap_or_default()),
        }
    }
}

impl TrustRegistry {
    /// Constructs a registry client against the given base URL
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// Asks the registry whether it trusts the `(issuer, key locator)` pair
    ///
    /// # Errors
    ///
    /// Returns [`AuthFailure::UntrustedIssuer`] if the registry answers
    /// with any non-200 status, and [`AuthFailure::RegistryUnavailable`]
    /// if it cannot be reached.
    pub async fn resolve(
        &self,
        issuer: &IssuerRef,
        key_locator: &KeySetUrlRef,
    ) -> Result<RegistryRecord, AuthFailure> {
        let response = self
            .client
            .get(format!("{}/registry", self.base_url))
            .query(&[("iss", issuer.as_str()), ("jku", key_locator.as_str())])
            .send()
            .await
            .map_err(AuthFailure::RegistryUnavailable)?;

        if response.status() != reqwest::StatusCode::OK {
            tracing::debug!(
                status = response.status().as_u16(),
                issuer = issuer.as_str(),
                "registry declined issuer"
            );
            return Err(AuthFailure::UntrustedIssuer);
        }

        // A 200 is already an affirmative verdict; a body that does not
        // decode is treated as a verdict with no usable fields rather
        // than a denial.
        let dto = match response.json::<RecordDto>().await {
            Ok(dto) => dto,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    issuer = issuer.as_str(),
                    "registry verdict body was undecodable"
                );
                RecordDto::default()
            }
        };

        let record = RegistryRecord::from(dto);
        tracing::debug!(
            client_id = record.client_id().as_str(),
            issuer = issuer.as_str(),
            "issuer resolved by trust registry"
        );

        Ok(record)
    }
}
