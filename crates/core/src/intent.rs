use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingIntent {
    CreateReservation,
    ModifyReservation,
    CancelReservation,
    ConsultReservation,
    Menu,
    Greeting,
    #[serde(other)]
    Unknown,
}

impl BookingIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateReservation => "create_reservation",
            Self::ModifyReservation => "modify_reservation",
            Self::CancelReservation => "cancel_reservation",
            Self::ConsultReservation => "consult_reservation",
            Self::Menu => "menu",
            Self::Greeting => "greeting",
            Self::Unknown => "unknown",
        }
    }
}

/// Structured reading of a free-form message. `date` and `time` are hints in
/// `YYYY-MM-DD` / `HH:MM` form and are re-validated before use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpretedMessage {
    pub intent: BookingIntent,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default, deserialize_with = "lenient_people")]
    pub people: Option<i64>,
}

impl InterpretedMessage {
    pub fn of(intent: BookingIntent) -> Self {
        Self { intent, date: None, time: None, people: None }
    }

    pub fn from_json(raw: &str) -> Result<Self, IntentResolutionError> {
        let trimmed = strip_code_fence(raw.trim());
        serde_json::from_str(trimmed)
            .map_err(|error| IntentResolutionError::Malformed(error.to_string()))
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let Some(inner) = raw.strip_prefix("```") else {
        return raw;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Models sometimes quote numbers; accept `4`, `"4"` and `null`.
fn lenient_people<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(number)) => number.as_i64(),
        Some(serde_json::Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IntentResolutionError {
    #[error("intent resolver transport failure: {0}")]
    Transport(String),
    #[error("intent resolver returned a malformed payload: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait IntentResolver: Send + Sync {
    async fn interpret(&self, text: &str) -> Result<InterpretedMessage, IntentResolutionError>;
}
