//! RSA public keys
//!
//! Only verification is supported. The gateway consumes externally
//! published keys; it never holds an RSA private key.

use aliri_base64::{Base64Url, Base64UrlRef};
use serde::{Deserialize, Serialize};

use super::{Algorithm, Signer, Verifier};
use crate::error;

/// An RSA public key, as published in a key set
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PublicKeyDto")]
#[must_use]
pub struct Rsa {
    #[serde(rename = "n")]
    modulus: Base64Url,

    #[serde(rename = "e")]
    exponent: Base64Url,
}

impl Rsa {
    /// Constructs a public key from the modulus and exponent
    ///
    /// # Errors
    ///
    /// Returns an error if the modulus is smaller than 2048 bits.
    pub fn from_components(
        modulus: impl Into<Base64Url>,
        exponent: impl Into<Base64Url>,
    ) -> Result<Self, error::KeyRejected> {
        let modulus = modulus.into();
        let exponent = exponent.into();
        if modulus.as_slice().len() < 256 {
            return Err(error::key_rejected("key modulus must be at least 2048 bits"));
        }

        Ok(Self { modulus, exponent })
    }

    /// The public key's modulus
    pub fn modulus(&self) -> &Base64UrlRef {
        &self.modulus
    }

    /// The public key's exponent
    pub fn exponent(&self) -> &Base64UrlRef {
        &self.exponent
    }

    fn verification_params(alg: Algorithm) -> Option<&'static ring::signature::RsaParameters> {
        match alg {
            Algorithm::RS256 => Some(&ring::signature::RSA_PKCS1_2048_8192_SHA256),
            Algorithm::RS384 => Some(&ring::signature::RSA_PKCS1_2048_8192_SHA384),
            Algorithm::RS512 => Some(&ring::signature::RSA_PKCS1_2048_8192_SHA512),
            _ => None,
        }
    }
}

impl Verifier for Rsa {
    fn can_verify(&self, alg: Algorithm) -> bool {
        alg.is_rsa()
    }

    fn verify(
        &self,
        alg: Algorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), error::SignatureMismatch> {
        let params = Self::verification_params(alg).ok_or_else(error::signature_mismatch)?;
        let pk = ring::signature::RsaPublicKeyComponents {
            n: self.modulus.as_slice(),
            e: self.exponent.as_slice(),
        };

        pk.verify(params, data, signature)
            .map_err(|_| error::signature_mismatch())
    }
}

impl Signer for Rsa {
    fn can_sign(&self, _alg: Algorithm) -> bool {
        false
    }

    fn sign(&self, _alg: Algorithm, _data: &[u8]) -> Result<Vec<u8>, error::SigningError> {
        Err(error::SigningError::NotASigningKey)
    }
}

impl TryFrom<PublicKeyDto> for Rsa {
    type Error = error::KeyRejected;

    fn try_from(dto: PublicKeyDto) -> Result<Self, Self::Error> {
        Self::from_components(dto.modulus, dto.exponent)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
struct PublicKeyDto {
    #[serde(rename = "n")]
    modulus: Base64Url,

    #[serde(rename = "e")]
    exponent: Base64Url,
}
