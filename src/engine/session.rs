use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use data_encoding::BASE64URL_NOPAD;
use log::debug;
use rand::RngCore;
use rocket::tokio::sync::RwLock;

use crate::model::mongodb::Id;

const TOKEN_BYTES: usize = 32;

/// An opaque session token, as carried by the session cookies.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    fn random() -> Self {
        let mut bytes = [0; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(BASE64URL_NOPAD.encode(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials; keep them out of debug output.
impl Debug for SessionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

impl From<&str> for SessionToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl From<SessionToken> for String {
    fn from(token: SessionToken) -> Self {
        token.0
    }
}

/// Who a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Voter(Id),
    Admin,
}

#[derive(Debug, Clone)]
struct Session {
    principal: Principal,
    expire_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Sessions {
    by_token: HashMap<SessionToken, Session>,
    by_identity: HashMap<Id, SessionToken>,
}

impl Sessions {
    fn remove(&mut self, token: &SessionToken) -> Option<Session> {
        let session = self.by_token.remove(token)?;
        if let Principal::Voter(id) = session.principal {
            if self.by_identity.get(&id) == Some(token) {
                self.by_identity.remove(&id);
            }
        }
        Some(session)
    }
}

/// Binds opaque session tokens to verified identities, and separately to the
/// admin.
#[derive(Clone)]
pub struct SessionBinder {
    sessions: Arc<RwLock<Sessions>>,
    ttl: Duration,
}

impl SessionBinder {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::default(),
            ttl,
        }
    }

    /// How long a session lasts.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start a session for a verified identity, revoking any previous one.
    pub async fn create_session(&self, id: Id) -> SessionToken {
        self.create_session_at(id, Utc::now()).await
    }

    pub async fn create_session_at(&self, id: Id, now: DateTime<Utc>) -> SessionToken {
        let token = SessionToken::random();
        let mut sessions = self.sessions.write().await;
        if let Some(previous) = sessions.by_identity.insert(id, token.clone()) {
            sessions.by_token.remove(&previous);
            debug!("Revoked previous session of identity {id}");
        }
        sessions.by_token.insert(
            token.clone(),
            Session {
                principal: Principal::Voter(id),
                expire_at: now + self.ttl,
            },
        );
        token
    }

    /// Start an admin session. Several admin sessions may coexist.
    pub async fn create_admin_session(&self) -> SessionToken {
        let token = SessionToken::random();
        let session = Session {
            principal: Principal::Admin,
            expire_at: Utc::now() + self.ttl,
        };
        self.sessions
            .write()
            .await
            .by_token
            .insert(token.clone(), session);
        token
    }

    /// Who the token belongs to, if it is live.
    pub async fn principal(&self, token: &SessionToken) -> Option<Principal> {
        self.principal_at(token, Utc::now()).await
    }

    pub async fn principal_at(&self, token: &SessionToken, now: DateTime<Utc>) -> Option<Principal> {
        self.sessions
            .read()
            .await
            .by_token
            .get(token)
            .filter(|session| now <= session.expire_at)
            .map(|session| session.principal)
    }

    /// The identity a live voter session is bound to.
    pub async fn resolve(&self, token: &SessionToken) -> Option<Id> {
        match self.principal(token).await? {
            Principal::Voter(id) => Some(id),
            Principal::Admin => None,
        }
    }

    pub async fn is_admin(&self, token: &SessionToken) -> bool {
        self.principal(token).await == Some(Principal::Admin)
    }

    /// End a session. Returns false if there was no such session.
    pub async fn destroy(&self, token: &SessionToken) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    /// Remove every session that has expired by `now`, returning how many.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let expired = sessions
            .by_token
            .iter()
            .filter(|(_, session)| now > session.expire_at)
            .map(|(token, _)| token.clone())
            .collect::<Vec<_>>();
        for token in &expired {
            sessions.remove(token);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binder() -> SessionBinder {
        SessionBinder::new(Duration::hours(1))
    }

    #[rocket::async_test]
    async fn resolve_voter_session() {
        let binder = binder();
        let id = Id::new();
        let token = binder.create_session(id).await;

        assert_eq!(binder.resolve(&token).await, Some(id));
        assert!(!binder.is_admin(&token).await);
        assert_eq!(binder.resolve(&SessionToken::from("bogus")).await, None);
    }

    #[rocket::async_test]
    async fn tokens_are_opaque_and_distinct() {
        let binder = binder();
        let first = binder.create_session(Id::new()).await;
        let second = binder.create_session(Id::new()).await;
        assert_ne!(first, second);
        // 32 bytes, unpadded base64url.
        assert_eq!(first.as_str().len(), 43);
        assert!(first
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[rocket::async_test]
    async fn relogin_revokes_previous_token() {
        let binder = binder();
        let id = Id::new();
        let old = binder.create_session(id).await;
        let new = binder.create_session(id).await;

        assert_eq!(binder.resolve(&old).await, None);
        assert_eq!(binder.resolve(&new).await, Some(id));
    }

    #[rocket::async_test]
    async fn admin_sessions_are_separate() {
        let binder = binder();
        let admin = binder.create_admin_session().await;
        assert!(binder.is_admin(&admin).await);
        assert_eq!(binder.resolve(&admin).await, None);
        assert_eq!(binder.principal(&admin).await, Some(Principal::Admin));
    }

    #[rocket::async_test]
    async fn destroy() {
        let binder = binder();
        let id = Id::new();
        let token = binder.create_session(id).await;
        assert!(binder.destroy(&token).await);
        assert!(!binder.destroy(&token).await);
        assert_eq!(binder.resolve(&token).await, None);

        // Logging out must not disturb a later session.
        let token = binder.create_session(id).await;
        assert_eq!(binder.resolve(&token).await, Some(id));
    }

    #[rocket::async_test]
    async fn expiry_and_sweep() {
        let binder = binder();
        let now = Utc::now();
        let id = Id::new();
        let token = binder.create_session_at(id, now).await;
        let later = now + Duration::hours(1) + Duration::seconds(1);
        let fresh = binder.create_session_at(Id::new(), later).await;

        assert_eq!(
            binder.principal_at(&token, later - Duration::seconds(1)).await,
            Some(Principal::Voter(id))
        );
        assert_eq!(binder.principal_at(&token, later).await, None);

        assert_eq!(binder.sweep(later).await, 1);
        assert_eq!(binder.sweep(later).await, 0);
        assert!(binder.principal_at(&fresh, later).await.is_some());
    }
}
