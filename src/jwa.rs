//! Signing algorithms and key material used to verify token signatures
//!
//! Only the algorithms a CDS Hooks gateway is expected to encounter are
//! supported: HMAC (HS256/384/512) for shared-secret signers and RSA
//! PKCS#1 v1.5 (RS256/384/512) for public-key signers. The verification
//! algorithm is always taken from the resolved key where the key declares
//! one; a token header can never talk a key into a different algorithm.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error;

pub mod hmac;
pub mod rsa;

#[doc(inline)]
pub use hmac::Hmac;
#[doc(inline)]
pub use rsa::Rsa;

/// A token signing algorithm
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
#[non_exhaustive]
pub enum Algorithm {
    /// HMAC using SHA-256
    HS256,
    /// HMAC using SHA-384
    HS384,
    /// HMAC using SHA-512
    HS512,
    /// RSA PKCS#1 v1.5 using SHA-256
    RS256,
    /// RSA PKCS#1 v1.5 using SHA-384
    RS384,
    /// RSA PKCS#1 v1.5 using SHA-512
    RS512,
}

impl Algorithm {
    /// Whether this is a symmetric HMAC algorithm
    #[must_use]
    pub const fn is_hmac(self) -> bool {
        matches!(self, Self::HS256 | Self::HS384 | Self::HS512)
    }

    /// Whether this is an RSA algorithm
    #[must_use]
    pub const fn is_rsa(self) -> bool {
        matches!(self, Self::RS256 | Self::RS384 | Self::RS512)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
        };

        f.write_str(s)
    }
}

impl FromStr for Algorithm {
    type Err = error::KeyRejected;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HS256" => Ok(Self::HS256),
            "HS384" => Ok(Self::HS384),
            "HS512" => Ok(Self::HS512),
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "RS512" => Ok(Self::RS512),
            _ => Err(error::key_rejected(format!("unsupported algorithm '{s}'"))),
        }
    }
}

/// The intended usage of a key, per the JWK `use` parameter
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Usage {
    /// The key is used for signing and signature verification
    #[serde(rename = "sig")]
    Signing,

    /// The key is used for encryption
    #[serde(rename = "enc")]
    Encryption,
}

/// Key material able to verify token signatures
pub trait Verifier {
    /// Whether the provided algorithm is usable with this key material
    fn can_verify(&self, alg: Algorithm) -> bool;

    /// Verifies the signature over `data` using the specified algorithm
    ///
    /// # Errors
    ///
    /// Returns an error if the signature does not match or the algorithm
    /// is not usable with this key material.
    fn verify(
        &self,
        alg: Algorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), error::SignatureMismatch>;
}

/// Key material able to produce token signatures
pub trait Signer {
    /// Whether the provided algorithm is usable with this key material
    fn can_sign(&self, alg: Algorithm) -> bool;

    /// Signs `data` using the specified algorithm
    ///
    /// # Errors
    ///
    /// Returns an error if this key material cannot sign with the
    /// specified algorithm.
    fn sign(&self, alg: Algorithm, data: &[u8]) -> Result<Vec<u8>, error::SigningError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_deserializes_from_header_name() {
        let alg: Algorithm = serde_json::from_str("\"RS256\"").unwrap();
        assert_eq!(alg, Algorithm::RS256);
        assert!(alg.is_rsa());
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let alg: Result<Algorithm, _> = serde_json::from_str("\"ES256\"");
        assert!(alg.is_err());
    }
}
