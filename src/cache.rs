//! The key-set cache
//!
//! Key material is the one thing the pipeline is allowed to cache; trust
//! verdicts never are. Sets are cached per key-set location with a TTL,
//! and concurrent misses for the same location are coalesced so a cold
//! location costs one upstream fetch no matter how many requests arrive
//! at once.

use std::{collections::HashMap, sync::Arc, time::Duration};

use aliri_clock::{Clock, System, UnixTime};
use arc_swap::ArcSwap;
use tokio::sync::Mutex;

use crate::{
    error::AuthFailure,
    jwt::{KeySetUrl, KeySetUrlRef},
    Jwks,
};

#[derive(Clone)]
struct CacheEntry {
    jwks: Arc<Jwks>,
    fetched_at: UnixTime,
}

/// A TTL cache of key sets, indexed by key-set location
///
/// Lookups are lock-free against an [`ArcSwap`]-published map; only cache
/// misses contend, and then only with other misses for the same location.
pub struct KeySetCache {
    client: reqwest::Client,
    ttl: Duration,
    serve_stale: bool,
    entries: ArcSwap<HashMap<KeySetUrl, CacheEntry>>,
    fetch_locks: Mutex<HashMap<KeySetUrl, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for KeySetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("KeySetCache")
            .field("ttl", &self.ttl)
            .field("serve_stale", &self.serve_stale)
            .finish_non_exhaustive()
    }
}

impl KeySetCache {
    /// Constructs a cache that fetches with the given client
    ///
    /// With `serve_stale` set, a location whose refresh fails keeps
    /// serving its last good set in a degraded mode instead of failing
    /// requests.
    pub fn new(client: reqwest::Client, ttl: Duration, serve_stale: bool) -> Self {
        Self {
            client,
            ttl,
            serve_stale,
            entries: ArcSwap::from_pointee(HashMap::new()),
            fetch_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The key set for the given location, fetching it if necessary
    ///
    /// # Errors
    ///
    /// Returns [`AuthFailure::KeySetUnavailable`] if the location is empty
    /// or the set cannot be fetched and no stale copy may be served.
    pub async fn get(&self, location: &KeySetUrlRef) -> Result<Arc<Jwks>, AuthFailure> {
        self.get_with_clock(location, &System).await
    }

    pub(crate) async fn get_with_clock<C: Clock>(
        &self,
        location: &KeySetUrlRef,
        clock: &C,
    ) -> Result<Arc<Jwks>, AuthFailure> {
        if location.as_str().is_empty() {
            return Err(AuthFailure::key_set_unavailable("empty key set location"));
        }

        let now = clock.now();
        if let Some(jwks) = self.fresh_entry(location, now) {
            return Ok(jwks);
        }

        let fetch_lock = self.fetch_lock(location).await;
        let _guard = fetch_lock.lock().await;

        // Whoever held the lock ahead of us may have refreshed already.
        if let Some(jwks) = self.fresh_entry(location, now) {
            return Ok(jwks);
        }

        let result = self.fetch(location).await;
        let jwks = match result {
            Ok(jwks) => jwks,
            Err(err) => {
                if self.serve_stale {
                    if let Some(stale) = self.any_entry(location) {
                        tracing::warn!(
                            jwks.url = location.as_str(),
                            error = %err,
                            "key set refresh failed; serving stale set"
                        );
                        return Ok(stale);
                    }
                }
                return Err(AuthFailure::key_set_unavailable(err));
            }
        };

        let jwks = Arc::new(jwks);
        let entry = CacheEntry {
            jwks: Arc::clone(&jwks),
            fetched_at: clock.now(),
        };
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(location.to_owned(), entry.clone());
            next
        });

        self.release_fetch_lock(location).await;

        Ok(jwks)
    }

    fn fresh_entry(&self, location: &KeySetUrlRef, now: UnixTime) -> Option<Arc<Jwks>> {
        let entries = self.entries.load();
        let entry = entries.get(location)?;
        let age = now.0.saturating_sub(entry.fetched_at.0);
        (age < self.ttl.as_secs()).then(|| Arc::clone(&entry.jwks))
    }

    fn any_entry(&self, location: &KeySetUrlRef) -> Option<Arc<Jwks>> {
        self.entries
            .load()
            .get(location)
            .map(|entry| Arc::clone(&entry.jwks))
    }

    async fn fetch(&self, location: &KeySetUrlRef) -> Result<Jwks, reqwest::Error> {
        tracing::debug!(jwks.url = location.as_str(), "fetching key set");
        self.client
            .get(location.as_str())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    async fn fetch_lock(&self, location: &KeySetUrlRef) -> Arc<Mutex<()>> {
        let mut locks = self.fetch_locks.lock().await;
        Arc::clone(
            locks
                .entry(location.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn release_fetch_lock(&self, location: &KeySetUrlRef) {
        let mut locks = self.fetch_locks.lock().await;
        locks.remove(location);
    }
}
