//! Volatile operator sessions.
//!
//! Sessions live for the lifetime of the process and never expire. The whole
//! token map sits behind one lock and is only reachable through the atomic
//! operations below.

use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, String>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh token bound to `identity`.
    pub fn open(&self, identity: &str) -> SessionToken {
        let mut sessions = self.sessions.lock();
        loop {
            let token = Uuid::new_v4().to_string();
            if let Entry::Vacant(slot) = sessions.entry(token.clone()) {
                slot.insert(identity.to_owned());
                return SessionToken(token);
            }
        }
    }

    /// Removes the token, returning the identity it was bound to. Closing an
    /// unknown token is not an error.
    pub fn close(&self, token: &str) -> Option<String> {
        self.sessions.lock().remove(token)
    }

    /// `None` means "not logged in".
    pub fn resolve(&self, token: &str) -> Option<String> {
        self.sessions
            .lock()
            .get(token)
            .filter(|identity| !identity.is_empty())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_resolve_yields_identity() {
        let registry = SessionRegistry::new();
        let token = registry.open("alice");
        assert_eq!(token.as_str().len(), 36);
        assert_eq!(registry.resolve(token.as_str()).as_deref(), Some("alice"));
    }

    #[test]
    fn unknown_token_is_unauthenticated() {
        let registry = SessionRegistry::new();
        registry.open("alice");
        assert_eq!(registry.resolve("not-a-token"), None);
        assert_eq!(registry.resolve(""), None);
    }

    #[test]
    fn empty_identity_counts_as_logged_out() {
        let registry = SessionRegistry::new();
        let token = registry.open("");
        assert_eq!(registry.resolve(token.as_str()), None);
    }

    #[test]
    fn close_is_idempotent() {
        let registry = SessionRegistry::new();
        let token = registry.open("bob");
        assert_eq!(registry.close(token.as_str()).as_deref(), Some("bob"));
        assert_eq!(registry.resolve(token.as_str()), None);
        assert_eq!(registry.close(token.as_str()), None);
        assert_eq!(registry.resolve(token.as_str()), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn tokens_are_unique_per_login() {
        let registry = SessionRegistry::new();
        let first = registry.open("carol");
        let second = registry.open("carol");
        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn concurrent_opens_lose_nothing() {
        let registry = SessionRegistry::new();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let identity = format!("user-{i}");
                    let token = registry.open(&identity);
                    (identity, token)
                })
            })
            .collect();
        for handle in handles {
            let (identity, token) = handle.join().unwrap();
            assert_eq!(registry.resolve(token.as_str()), Some(identity));
        }
        assert_eq!(registry.len(), 16);
    }
}
