//! In-memory sessions keyed by the `filegate_session` cookie.

use crate::mfa::SessionState;
use axum::http::{header::COOKIE, HeaderMap, HeaderValue};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::RngCore;
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

pub const SESSION_COOKIE: &str = "filegate_session";
const TOKEN_BYTES: usize = 32;

#[derive(Debug)]
struct Entry {
    state: SessionState,
    last_seen: Instant,
}

/// A loaded session; write it back with [`SessionStore::save`].
#[derive(Debug)]
pub struct Session {
    token: String,
    pub state: SessionState,
}

impl Session {
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl SessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Resume the session named by the request cookie, or start a new one.
    /// Idle sessions past the TTL are dropped first.
    pub fn load(&self, headers: &HeaderMap) -> Session {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, entry| now.duration_since(entry.last_seen) < self.ttl);

        if let Some(token) = cookie_token(headers) {
            if let Some(entry) = entries.get(&token) {
                return Session {
                    token,
                    state: entry.state.clone(),
                };
            }
        }
        Session {
            token: new_token(),
            state: SessionState::default(),
        }
    }

    /// Keep `session` if it carries a pass or a pending enrollment; a session
    /// with neither is forgotten. Returns whether it was kept.
    pub fn save(&self, session: &Session) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !carries_state(&session.state) {
            entries.remove(&session.token);
            return false;
        }
        entries.insert(
            session.token.clone(),
            Entry {
                state: session.state.clone(),
                last_seen: Instant::now(),
            },
        );
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Set-Cookie` value for `session`.
    #[must_use]
    pub fn cookie(&self, session: &Session) -> Option<HeaderValue> {
        HeaderValue::from_str(&format!(
            "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            session.token,
            self.ttl.as_secs()
        ))
        .ok()
    }
}

fn carries_state(state: &SessionState) -> bool {
    state.mfa_passed_at.is_some() || state.pending_secret.is_some()
}

fn new_token() -> String {
    let mut bytes = [0_u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.to_string())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn headers_with(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn new_sessions_get_random_tokens() {
        let store = SessionStore::new(Duration::from_secs(60));
        let a = store.load(&HeaderMap::new());
        let b = store.load(&HeaderMap::new());
        assert_ne!(a.token(), b.token());
        assert_eq!(a.token().len(), 43);
        assert!(store.is_empty());
    }

    #[test]
    fn saved_state_is_resumed_from_cookie() {
        let store = SessionStore::new(Duration::from_secs(60));
        let mut session = store.load(&HeaderMap::new());
        session.state.mfa_passed_at = Some(42);
        store.save(&session);

        let cookie = format!("theme=dark; {SESSION_COOKIE}={}", session.token());
        let resumed = store.load(&headers_with(&cookie));
        assert_eq!(resumed.token(), session.token());
        assert_eq!(resumed.state.mfa_passed_at, Some(42));
    }

    #[test]
    fn unknown_token_starts_fresh() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = store.load(&headers_with(&format!("{SESSION_COOKIE}=forged")));
        assert_ne!(session.token(), "forged");
        assert_eq!(session.state.mfa_passed_at, None);
    }

    #[test]
    fn stateless_sessions_are_not_kept() {
        let store = SessionStore::new(Duration::from_secs(60));
        for _ in 0..100 {
            let session = store.load(&HeaderMap::new());
            assert!(!store.save(&session));
        }
        assert!(store.is_empty());
    }

    #[test]
    fn clearing_state_forgets_the_session() {
        let store = SessionStore::new(Duration::from_secs(60));
        let mut session = store.load(&HeaderMap::new());
        session.state.pending_secret = Some("JBSWY3DPEHPK3PXP".to_string());
        assert!(store.save(&session));
        assert_eq!(store.len(), 1);

        session.state.pending_secret = None;
        assert!(!store.save(&session));
        assert!(store.is_empty());
    }

    #[test]
    fn idle_sessions_expire() {
        let store = SessionStore::new(Duration::ZERO);
        let mut session = store.load(&HeaderMap::new());
        session.state.mfa_passed_at = Some(42);
        store.save(&session);
        let cookie = format!("{SESSION_COOKIE}={}", session.token());
        let resumed = store.load(&headers_with(&cookie));
        assert_ne!(resumed.token(), session.token());
        assert!(store.is_empty());
    }

    #[test]
    fn cookie_attributes() {
        let store = SessionStore::new(Duration::from_secs(43200));
        let session = store.load(&HeaderMap::new());
        let cookie = store.cookie(&session).unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("filegate_session="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.ends_with("Max-Age=43200"));
    }
}
