//! WhatsApp Cloud API transport for turnero.
//!
//! - **Events** (`events`) - webhook verification handshake and inbound payload parsing
//! - **Outbound** (`outbound`) - text replies through the Graph API with bounded retries
//!
//! # Getting Started
//!
//! 1. Create a Meta app with the WhatsApp product and note the phone number id
//! 2. Point the webhook at `https://<host>/webhook` with a verify token of your choosing
//! 3. Subscribe the app to the `messages` field
//! 4. Set env vars: `TURNERO_WHATSAPP_ACCESS_TOKEN`, `TURNERO_WHATSAPP_VERIFY_TOKEN`,
//!    `TURNERO_WHATSAPP_PHONE_NUMBER_ID`, `TURNERO_WHATSAPP_ENABLED=true`
//!
//! ```text
//! Graph webhook -> parse_webhook -> InboundMessage -> booking runtime
//!                                                        |
//!                       deliver(MessageSender) <- OutboundReply
//! ```

pub mod events;
pub mod outbound;

pub use events::{parse_webhook, verify_subscription, VerificationError, WhatsAppEvent};
pub use outbound::{
    deliver, CloudApiSender, DeliveryOutcome, DeliveryPolicy, LogSender, MessageSender,
    TransportError,
};
