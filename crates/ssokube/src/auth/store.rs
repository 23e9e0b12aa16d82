//! In-memory assumed-role sessions.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use ssokube_cloud::RoleCredentials;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identity::Identity;

/// Role credentials per assumed-role identity.
///
/// Writing a session here is the only way identity state changes during a
/// run.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, RoleCredentials>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Credentials for `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthExpired`] when no session exists or it expired.
    pub fn credentials_for(&self, identity: &Identity) -> Result<RoleCredentials> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        match sessions.get(&identity.name) {
            Some(creds) if !creds.is_expired_at(Utc::now()) => Ok(creds.clone()),
            Some(_) => {
                debug!(identity = %identity.name, "Role session expired");
                Err(Error::AuthExpired(identity.name.clone()))
            }
            None => Err(Error::AuthExpired(identity.name.clone())),
        }
    }

    /// Whether a usable session exists.
    #[must_use]
    pub fn has_valid(&self, identity: &Identity) -> bool {
        self.credentials_for(identity).is_ok()
    }

    /// Store a fresh session.
    pub fn store(&self, identity: &Identity, credentials: RoleCredentials) {
        debug!(
            identity = %identity.name,
            expires_at = %credentials.expires_at(),
            "Stored role session"
        );
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.name.clone(), credentials);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::ErrorKind;

    fn creds(expiration: i64) -> RoleCredentials {
        RoleCredentials {
            access_key_id: "ASIA".into(),
            secret_access_key: "secret".into(),
            session_token: "token".into(),
            expiration,
        }
    }

    fn identity() -> Identity {
        let source = Arc::new(Identity::federated("corp", "https://x", "eu-west-1"));
        Identity::assume(&source, "111111111111", "Admin")
    }

    #[test]
    fn test_missing_session_is_auth_expired() {
        let store = SessionStore::new();
        let err = store.credentials_for(&identity()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthExpired);
    }

    #[test]
    fn test_expired_session_is_auth_expired() {
        let store = SessionStore::new();
        store.store(&identity(), creds(1_000));
        assert!(!store.has_valid(&identity()));
    }

    #[test]
    fn test_store_replaces_previous_session() {
        let store = SessionStore::new();
        let future = (Utc::now() + chrono::Duration::hours(1)).timestamp_millis();
        store.store(&identity(), creds(1_000));
        store.store(&identity(), creds(future));
        assert!(store.has_valid(&identity()));
        assert_eq!(
            store.credentials_for(&identity()).unwrap().expiration,
            future
        );
    }
}
