//! HMAC shared-secret keys

use std::fmt;

use aliri_base64::Base64Url;
use ring::rand::SecureRandom;
use serde::{Deserialize, Serialize};

use super::{Algorithm, Signer, Verifier};
use crate::error;

/// An HMAC shared secret
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct Hmac {
    #[serde(rename = "k")]
    secret: Base64Url,
}

impl fmt::Debug for Hmac {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Hmac { secret }")
    }
}

impl Hmac {
    /// HMAC using the provided secret
    pub fn new(secret: impl Into<Base64Url>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Generates a new HMAC secret sized for the given algorithm
    ///
    /// # Errors
    ///
    /// Returns an error if the system random number generator fails.
    pub fn generate(alg: Algorithm) -> Result<Self, error::KeyRejected> {
        let bytes = match alg {
            Algorithm::HS256 => 256 / 8,
            Algorithm::HS384 => 384 / 8,
            Algorithm::HS512 => 512 / 8,
            other => return Err(error::key_rejected(format!("not an HMAC algorithm: {other}"))),
        };

        let mut secret = Base64Url::from_raw(vec![0; bytes]);
        ring::rand::SystemRandom::new()
            .fill(secret.as_mut_slice())
            .map_err(|_| error::key_rejected("random number generator failure"))?;

        Ok(Self { secret })
    }

    fn ring_algorithm(alg: Algorithm) -> Option<ring::hmac::Algorithm> {
        match alg {
            Algorithm::HS256 => Some(ring::hmac::HMAC_SHA256),
            Algorithm::HS384 => Some(ring::hmac::HMAC_SHA384),
            Algorithm::HS512 => Some(ring::hmac::HMAC_SHA512),
            _ => None,
        }
    }
}

impl Verifier for Hmac {
    fn can_verify(&self, alg: Algorithm) -> bool {
        alg.is_hmac()
    }

    fn verify(
        &self,
        alg: Algorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), error::SignatureMismatch> {
        let alg = Self::ring_algorithm(alg).ok_or_else(error::signature_mismatch)?;
        let key = ring::hmac::Key::new(alg, self.secret.as_slice());
        ring::hmac::verify(&key, data, signature).map_err(|_| error::signature_mismatch())
    }
}

impl Signer for Hmac {
    fn can_sign(&self, alg: Algorithm) -> bool {
        alg.is_hmac()
    }

    fn sign(&self, alg: Algorithm, data: &[u8]) -> Result<Vec<u8>, error::SigningError> {
        let ring_alg = Self::ring_algorithm(alg).ok_or_else(|| error::incompatible_algorithm(alg))?;
        let key = ring::hmac::Key::new(ring_alg, self.secret.as_slice());
        let digest = ring::hmac::sign(&key, data);
        Ok(digest.as_ref().to_owned())
    }
}
