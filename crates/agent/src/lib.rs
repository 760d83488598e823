//! Conversation runtime for table reservations.
//!
//! This crate turns inbound chat messages into booking operations:
//! - `resolver` reads free text into a structured intent, through a chat model
//!   (`llm`) or a deterministic keyword reader
//! - `machine` runs one turn of the conversation state machine against the
//!   booking service and client directory
//! - `runtime` serializes turns per sender, expires idle sessions, drops
//!   redelivered messages and stores the session with compare-and-swap
//! - `replies` holds every customer-facing text
//!
//! # Safety Principle
//!
//! The model is strictly a translator. Availability, table assignment and
//! reservation codes are decided by the booking core; model output is only a
//! hint and is validated again before it reaches a booking.

pub mod llm;
pub mod machine;
pub mod replies;
pub mod resolver;
pub mod runtime;

pub use llm::{ChatCompletionsClient, LlmClient};
pub use machine::ConversationMachine;
pub use resolver::{KeywordIntentResolver, LlmIntentResolver};
pub use runtime::{BookingRuntime, TurnReport};
