use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::session::{ChannelIdentity, ConversationSession};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("session `{identity}` changed since version {expected}")]
    Stale { identity: String, expected: u64 },
    #[error("session storage failure: {0}")]
    Storage(String),
}

/// Durable conversation sessions keyed by channel identity.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stored session, or a fresh unsaved one (version 0) on first contact.
    async fn load(
        &self,
        identity: &ChannelIdentity,
        now: DateTime<Utc>,
    ) -> Result<ConversationSession, SessionStoreError>;

    /// Compare-and-swap on `session.version`. Returns the stored session with
    /// its version incremented, or `Stale` when another writer got there first.
    async fn save(
        &self,
        session: &ConversationSession,
    ) -> Result<ConversationSession, SessionStoreError>;
}

#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<ChannelIdentity, ConversationSession>>>,
}

impl InMemorySessionStore {
    pub async fn get(&self, identity: &ChannelIdentity) -> Option<ConversationSession> {
        self.sessions.read().await.get(identity).cloned()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(
        &self,
        identity: &ChannelIdentity,
        now: DateTime<Utc>,
    ) -> Result<ConversationSession, SessionStoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(identity)
            .cloned()
            .unwrap_or_else(|| ConversationSession::new(identity.clone(), now)))
    }

    async fn save(
        &self,
        session: &ConversationSession,
    ) -> Result<ConversationSession, SessionStoreError> {
        let mut sessions = self.sessions.write().await;
        let current = sessions.get(&session.identity).map_or(0, |stored| stored.version);
        if current != session.version {
            return Err(SessionStoreError::Stale {
                identity: session.identity.0.clone(),
                expected: session.version,
            });
        }

        let mut stored = session.clone();
        stored.version = session.version + 1;
        sessions.insert(stored.identity.clone(), stored.clone());
        Ok(stored)
    }
}
