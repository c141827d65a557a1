use serde::{Deserialize, Serialize};

use crate::{
    jwa::Algorithm,
    jwk::{KeyId, KeyIdRef},
    Jwk,
};

/// A key set fetched from a key-set location
///
/// A set is immutable once fetched; the cache replaces whole sets rather
/// than mutating them, so a set handed to a request never changes
/// underneath it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    #[serde(deserialize_with = "deserialize_keys")]
    keys: Vec<Jwk>,
}

impl Jwks {
    /// Adds a key to the set
    pub fn add_key(&mut self, key: Jwk) {
        self.keys.push(key);
    }

    /// A view of the keys in this set
    #[must_use]
    pub fn keys(&self) -> &[Jwk] {
        &self.keys
    }

    /// Selects the key a token should be verified with
    ///
    /// When the token header names a `kid`, only a key with that exact
    /// identifier matches. Without a `kid`, the first signing key able to
    /// use the header's algorithm is selected.
    #[must_use]
    pub fn get_key(&self, kid: Option<&KeyIdRef>, header_alg: Algorithm) -> Option<&Jwk> {
        match kid {
            Some(kid) => self
                .keys
                .iter()
                .find(|k| k.is_signing_key() && k.key_id() == Some(kid)),
            None => self
                .keys
                .iter()
                .find(|k| k.is_signing_key() && k.verification_algorithm(header_alg).is_some()),
        }
    }
}

/// Deserializes the `keys` array leniently
///
/// Externally published key sets routinely carry keys this gateway cannot
/// use (encryption keys, unsupported algorithms). Those are skipped with a
/// warning rather than poisoning the whole set.
fn deserialize_keys<'de, D>(deserializer: D) -> Result<Vec<Jwk>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MaybeJwk {
        Jwk(Jwk),
        Unknown(JwkLike),
    }

    #[derive(Deserialize)]
    struct JwkLike {
        #[serde(default)]
        kid: Option<KeyId>,
        #[serde(default)]
        alg: Option<String>,
    }

    let raw = Vec::<MaybeJwk>::deserialize(deserializer)?;

    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(idx, key)| match key {
            MaybeJwk::Jwk(jwk) => Some(jwk),
            MaybeJwk::Unknown(like) => {
                tracing::warn!(
                    jwks.idx = idx,
                    jwk.kid = ?like.kid,
                    jwk.alg = ?like.alg,
                    "ignoring unusable JWK"
                );
                None
            }
        })
        .collect())
}
