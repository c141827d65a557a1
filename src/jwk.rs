//! JSON Web Keys, as published by token signers

use aliri_braid::braid;
use serde::{Deserialize, Serialize};

use crate::{
    error,
    jwa::{self, Algorithm, Signer, Verifier},
};

/// An identifier for a key within a key set
#[braid(serde, ref_doc = "A borrowed reference to a key identifier ([`KeyId`])")]
pub struct KeyId;

/// An identified key from a key set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct Jwk {
    #[serde(rename = "kid", default, skip_serializing_if = "Option::is_none")]
    key_id: Option<KeyId>,

    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    usage: Option<jwa::Usage>,

    #[serde(rename = "alg", default, skip_serializing_if = "Option::is_none")]
    algorithm: Option<Algorithm>,

    #[serde(flatten)]
    key: Key,
}

/// The underlying key material, discriminated by the JWK `kty` parameter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
enum Key {
    /// An RSA public key
    #[serde(rename = "RSA")]
    Rsa(jwa::Rsa),

    /// An HMAC shared secret
    #[serde(rename = "oct")]
    Hmac(jwa::Hmac),
}

impl Key {
    fn can_verify(&self, alg: Algorithm) -> bool {
        match self {
            Self::Rsa(k) => k.can_verify(alg),
            Self::Hmac(k) => k.can_verify(alg),
        }
    }
}

impl Jwk {
    /// The key's identifier
    #[must_use]
    pub fn key_id(&self) -> Option<&KeyIdRef> {
        self.key_id.as_deref()
    }

    /// The algorithm this key declares for itself, if any
    #[must_use]
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// The key's declared usage, if any
    #[must_use]
    pub fn usage(&self) -> Option<jwa::Usage> {
        self.usage
    }

    /// Sets the key identifier
    pub fn with_key_id(self, kid: impl Into<KeyId>) -> Self {
        Self {
            key_id: Some(kid.into()),
            ..self
        }
    }

    /// Sets the key's algorithm and the usage that algorithm implies
    pub fn with_algorithm(self, alg: Algorithm) -> Self {
        Self {
            algorithm: Some(alg),
            usage: Some(jwa::Usage::Signing),
            ..self
        }
    }

    /// Whether this key can take part in signature verification at all
    #[must_use]
    pub fn is_signing_key(&self) -> bool {
        !matches!(self.usage, Some(jwa::Usage::Encryption))
    }

    /// The algorithm to verify a token with
    ///
    /// The key's own declared algorithm always wins; the algorithm
    /// asserted by the token header is consulted only when the key
    /// declares none, and then only if the key material can actually use
    /// it. This is what prevents algorithm-substitution attacks.
    #[must_use]
    pub fn verification_algorithm(&self, header_alg: Algorithm) -> Option<Algorithm> {
        match self.algorithm {
            Some(alg) => Some(alg),
            None if self.key.can_verify(header_alg) => Some(header_alg),
            None => None,
        }
    }
}

impl From<jwa::Hmac> for Jwk {
    fn from(key: jwa::Hmac) -> Self {
        Self {
            key_id: None,
            usage: None,
            algorithm: None,
            key: Key::Hmac(key),
        }
    }
}

impl From<jwa::Rsa> for Jwk {
    fn from(key: jwa::Rsa) -> Self {
        Self {
            key_id: None,
            usage: None,
            algorithm: None,
            key: Key::Rsa(key),
        }
    }
}

impl Verifier for Jwk {
    fn can_verify(&self, alg: Algorithm) -> bool {
        self.is_signing_key() && self.key.can_verify(alg)
    }

    fn verify(
        &self,
        alg: Algorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), error::SignatureMismatch> {
        if !self.is_signing_key() {
            return Err(error::signature_mismatch());
        }

        match &self.key {
            Key::Rsa(k) => k.verify(alg, data, signature),
            Key::Hmac(k) => k.verify(alg, data, signature),
        }
    }
}

impl Signer for Jwk {
    fn can_sign(&self, alg: Algorithm) -> bool {
        match &self.key {
            Key::Rsa(k) => k.can_sign(alg),
            Key::Hmac(k) => k.can_sign(alg),
        }
    }

    fn sign(&self, alg: Algorithm, data: &[u8]) -> Result<Vec<u8>, error::SigningError> {
        match &self.key {
            Key::Rsa(k) => k.sign(alg, data),
            Key::Hmac(k) => k.sign(alg, data),
        }
    }
}

#[cfg(test)]
mod tests {
    use aliri_base64::Base64Url;

    use super::*;

    #[test]
    fn deserializes_hmac_jwk() {
        let jwk: Jwk = serde_json::from_str(
            r#"{ "kty": "oct", "kid": "test", "alg": "HS256", "use": "sig", "k": "dGVzdA" }"#,
        )
        .unwrap();

        assert_eq!(jwk.key_id().map(|k| k.as_str()), Some("test"));
        assert_eq!(jwk.algorithm(), Some(Algorithm::HS256));
        assert!(jwk.is_signing_key());
    }

    #[test]
    fn declared_key_algorithm_overrides_header() {
        let jwk = Jwk::from(jwa::Hmac::new(Base64Url::from_raw(vec![7; 32])))
            .with_algorithm(Algorithm::HS256);

        // A header asserting HS512 cannot override the key's declaration.
        assert_eq!(
            jwk.verification_algorithm(Algorithm::HS512),
            Some(Algorithm::HS256)
        );
    }

    #[test]
    fn undeclared_algorithm_falls_back_to_compatible_header() {
        let jwk = Jwk::from(jwa::Hmac::new(Base64Url::from_raw(vec![7; 32])));

        assert_eq!(
            jwk.verification_algorithm(Algorithm::HS384),
            Some(Algorithm::HS384)
        );
        assert_eq!(jwk.verification_algorithm(Algorithm::RS256), None);
    }

    #[test]
    fn encryption_keys_do_not_verify() {
        let jwk: Jwk = serde_json::from_str(
            r#"{ "kty": "oct", "kid": "enc-key", "use": "enc", "k": "dGVzdA" }"#,
        )
        .unwrap();

        assert!(!jwk.is_signing_key());
        assert!(jwk.verify(Algorithm::HS256, b"data", b"sig").is_err());
    }
}
