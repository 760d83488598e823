use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use turnero_core::domain::client::ClientId;
use turnero_core::domain::session::{ChannelIdentity, ConversationSession, WorkingData};
use turnero_core::flows::ConversationState;
use turnero_core::sessions::{SessionStore, SessionStoreError};

use super::{column, parse_timestamp, RepositoryError};
use crate::DbPool;

/// Sessions persisted in `conversation_session`. Writes are conditional on
/// the version the caller loaded, so two processes racing on one identity
/// cannot overwrite each other.
pub struct SqlSessionStore {
    pool: DbPool,
}

impl SqlSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_session(row: &SqliteRow) -> Result<ConversationSession, RepositoryError> {
    let state_raw: String = column(row, "state")?;
    let state = ConversationState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown state `{state_raw}`")))?;
    let working_raw: String = column(row, "working_json")?;
    let working: WorkingData = serde_json::from_str(&working_raw)
        .map_err(|error| RepositoryError::Decode(format!("working data: {error}")))?;
    let version: i64 = column(row, "version")?;
    let client_id: Option<String> = column(row, "client_id")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(ConversationSession {
        identity: ChannelIdentity(column(row, "identity")?),
        state,
        client_id: client_id.map(ClientId),
        working,
        version: u64::try_from(version)
            .map_err(|_| RepositoryError::Decode(format!("negative version {version}")))?,
        last_message_id: column(row, "last_message_id")?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn load(
        &self,
        identity: &ChannelIdentity,
        now: DateTime<Utc>,
    ) -> Result<ConversationSession, SessionStoreError> {
        let row = sqlx::query(
            "SELECT identity, state, client_id, working_json, version, last_message_id, updated_at
             FROM conversation_session WHERE identity = ?",
        )
        .bind(&identity.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        match row {
            Some(ref row) => Ok(row_to_session(row)?),
            None => Ok(ConversationSession::new(identity.clone(), now)),
        }
    }

    async fn save(
        &self,
        session: &ConversationSession,
    ) -> Result<ConversationSession, SessionStoreError> {
        let working = serde_json::to_string(&session.working)
            .map_err(|error| SessionStoreError::Storage(format!("working data: {error}")))?;
        let expected = i64::try_from(session.version)
            .map_err(|_| SessionStoreError::Storage("session version overflow".to_string()))?;
        let next = expected + 1;
        let client_id = session.client_id.as_ref().map(|client| client.0.as_str());

        let result = if session.version == 0 {
            sqlx::query(
                "INSERT INTO conversation_session
                     (identity, state, client_id, working_json, version, last_message_id,
                      updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(identity) DO NOTHING",
            )
            .bind(&session.identity.0)
            .bind(session.state.as_str())
            .bind(client_id)
            .bind(&working)
            .bind(next)
            .bind(&session.last_message_id)
            .bind(session.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                "UPDATE conversation_session
                 SET state = ?, client_id = ?, working_json = ?, version = ?,
                     last_message_id = ?, updated_at = ?
                 WHERE identity = ? AND version = ?",
            )
            .bind(session.state.as_str())
            .bind(client_id)
            .bind(&working)
            .bind(next)
            .bind(&session.last_message_id)
            .bind(session.updated_at.to_rfc3339())
            .bind(&session.identity.0)
            .bind(expected)
            .execute(&self.pool)
            .await
        }
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return Err(SessionStoreError::Stale {
                identity: session.identity.0.clone(),
                expected: session.version,
            });
        }

        let mut stored = session.clone();
        stored.version = session.version + 1;
        Ok(stored)
    }
}
