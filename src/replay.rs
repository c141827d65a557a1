//! Replay protection for token identifiers
//!
//! A token identifier is admitted at most once within the retention
//! window. The check and the insert are a single operation under one
//! lock; two racing requests bearing the same token can never both pass.

use std::{collections::HashMap, sync::Mutex, time::Duration};

use aliri_clock::UnixTime;

use crate::{
    error::AuthFailure,
    jwt::{TokenId, TokenIdRef},
};

/// A first-use guard over token identifiers
#[derive(Debug)]
pub struct ReplayGuard {
    retention: Duration,
    seen: Mutex<HashMap<TokenId, UnixTime>>,
}

impl ReplayGuard {
    /// Constructs a guard that remembers identifiers for the given window
    ///
    /// The retention window should comfortably exceed the longest token
    /// lifetime the claims policy will admit; an identifier forgotten
    /// while its token is still valid is replayable.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Admits a token identifier if it has not been seen within the window
    ///
    /// # Errors
    ///
    /// Returns [`AuthFailure::TokenReplayed`] if the identifier was
    /// already admitted.
    pub fn check_and_insert(
        &self,
        token_id: &TokenIdRef,
        now: UnixTime,
    ) -> Result<(), AuthFailure> {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());

        let cutoff = now.0.saturating_sub(self.retention.as_secs());
        seen.retain(|_, admitted_at| admitted_at.0 > cutoff);

        if seen.contains_key(token_id) {
            return Err(AuthFailure::TokenReplayed);
        }

        seen.insert(token_id.to_owned(), now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_use_is_admitted() {
        let guard = ReplayGuard::new(Duration::from_secs(600));
        let id = TokenIdRef::from_str("abc123");

        assert!(guard.check_and_insert(id, UnixTime(1000)).is_ok());
    }

    #[test]
    fn second_use_within_window_is_replay() {
        let guard = ReplayGuard::new(Duration::from_secs(600));
        let id = TokenIdRef::from_str("abc123");

        guard.check_and_insert(id, UnixTime(1000)).unwrap();
        let err = guard.check_and_insert(id, UnixTime(1001));
        assert!(matches!(err, Err(AuthFailure::TokenReplayed)));
    }

    #[test]
    fn identifier_is_forgotten_after_retention() {
        let guard = ReplayGuard::new(Duration::from_secs(600));
        let id = TokenIdRef::from_str("abc123");

        guard.check_and_insert(id, UnixTime(1000)).unwrap();
        assert!(guard.check_and_insert(id, UnixTime(1601)).is_ok());
    }

    #[test]
    fn distinct_identifiers_do_not_interfere() {
        let guard = ReplayGuard::new(Duration::from_secs(600));

        guard
            .check_and_insert(TokenIdRef::from_str("token-1"), UnixTime(1000))
            .unwrap();
        assert!(guard
            .check_and_insert(TokenIdRef::from_str("token-2"), UnixTime(1000))
            .is_ok());
    }
}
