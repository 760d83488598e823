use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::client::ClientId;
use crate::domain::reservation::ReservationCode;
use crate::flows::states::ConversationState;

/// Channel-level sender address (a WhatsApp phone number).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelIdentity(pub String);

impl ChannelIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: Option<String>,
    pub from: ChannelIdentity,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundReply {
    pub to: ChannelIdentity,
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingData {
    /// Identity number typed before the client finished registering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_client: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_code: Option<ReservationCode>,
}

impl WorkingData {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub identity: ChannelIdentity,
    pub state: ConversationState,
    pub client_id: Option<ClientId>,
    pub working: WorkingData,
    pub version: u64,
    pub last_message_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSession {
    /// Version 0 marks a session that has never been stored.
    pub fn new(identity: ChannelIdentity, now: DateTime<Utc>) -> Self {
        Self {
            identity,
            state: ConversationState::New,
            client_id: None,
            working: WorkingData::default(),
            version: 0,
            last_message_id: None,
            updated_at: now,
        }
    }

    pub fn is_replay(&self, message_id: Option<&str>) -> bool {
        match (message_id, self.last_message_id.as_deref()) {
            (Some(incoming), Some(last)) => incoming == last,
            _ => false,
        }
    }

    /// Drops a stale mid-flow conversation back to its resting state. Returns
    /// whether anything changed.
    pub fn expire_if_idle(&mut self, now: DateTime<Utc>, ttl: Duration) -> bool {
        if self.version == 0 || now - self.updated_at < ttl {
            return false;
        }
        if !self.state.is_mid_flow() && self.working.is_empty() {
            return false;
        }

        self.working = WorkingData::default();
        self.state = if self.client_id.is_some() {
            ConversationState::Menu
        } else {
            ConversationState::AwaitId
        };
        true
    }

    pub fn apply(&mut self, to: ConversationState, patch: &SessionPatch) {
        patch.apply(&mut self.working, &mut self.client_id);
        self.state = to;
    }
}

/// Change to the session's working data produced by one transition.
/// `clear_working` runs first, then any provided fields are set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub bind_client: Option<ClientId>,
    pub clear_working: bool,
    pub pending_client: Option<ClientId>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub party_size: Option<u32>,
    pub reservation_code: Option<ReservationCode>,
}

impl SessionPatch {
    pub fn keep() -> Self {
        Self::default()
    }

    pub fn clear() -> Self {
        Self { clear_working: true, ..Self::default() }
    }

    pub fn bind(client_id: ClientId) -> Self {
        Self { bind_client: Some(client_id), clear_working: true, ..Self::default() }
    }

    pub fn with_pending_client(mut self, client_id: ClientId) -> Self {
        self.pending_client = Some(client_id);
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_time(mut self, time: NaiveTime) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_party_size(mut self, party_size: u32) -> Self {
        self.party_size = Some(party_size);
        self
    }

    pub fn with_code(mut self, code: ReservationCode) -> Self {
        self.reservation_code = Some(code);
        self
    }

    fn apply(&self, working: &mut WorkingData, client_id: &mut Option<ClientId>) {
        if let Some(bound) = &self.bind_client {
            *client_id = Some(bound.clone());
        }
        if self.clear_working {
            *working = WorkingData::default();
        }
        if let Some(pending) = &self.pending_client {
            working.pending_client = Some(pending.clone());
        }
        if let Some(date) = self.date {
            working.date = Some(date);
        }
        if let Some(time) = self.time {
            working.time = Some(time);
        }
        if let Some(party_size) = self.party_size {
            working.party_size = Some(party_size);
        }
        if let Some(code) = &self.reservation_code {
            working.reservation_code = Some(code.clone());
        }
    }
}
