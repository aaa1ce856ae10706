//! # Session Provider
//!
//! The push client authenticates with a token it does not mint itself.
//! A [`SessionProvider`] hands out the current `{token, uid}` pair; it
//! may fail when the user is logged out, which is a permanent auth
//! failure for the connection attempt (reconnect is suppressed once).

use async_trait::async_trait;
use beacon_core::Uid;

use crate::error::{ClientError, ClientResult};

/// A usable login session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque token presented to the broker's `Authenticate` call.
    pub token: String,

    /// The user this session belongs to. The broker must echo it back.
    pub uid: Uid,
}

/// Source of the current session.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Returns the current session, or an error when logged out.
    async fn current(&self) -> ClientResult<Session>;
}

/// Fixed-session provider for hosts with externally managed login state
/// and for tests.
#[derive(Debug, Clone)]
pub struct StaticSession {
    session: Session,
}

impl StaticSession {
    pub fn new(token: impl Into<String>, uid: Uid) -> Self {
        StaticSession {
            session: Session {
                token: token.into(),
                uid,
            },
        }
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn current(&self) -> ClientResult<Session> {
        if self.session.token.is_empty() {
            return Err(ClientError::NotLoggedIn);
        }
        Ok(self.session.clone())
    }
}
