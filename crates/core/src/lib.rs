pub mod audit;
pub mod booking;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod intent;
pub mod sessions;
pub mod text;

pub use booking::{
    AllocationDecision, AllocationRequest, BookingService, CapacityAllocator, ClientDirectory,
    CodeGenerator, Notifier, RejectionReason, ReservationGateway, VenueCatalog,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::client::{Client, ClientId};
pub use domain::reservation::{Reservation, ReservationCode, ReservationStatus, Slot};
pub use domain::session::{ChannelIdentity, ConversationSession, InboundMessage, OutboundReply};
pub use domain::venue::{CapacityMode, TableClass, VenueConfig, VenueId};
pub use errors::{ApplicationError, ConflictKind, DomainError, Recovery};
pub use flows::{ConversationState, FlowEngine, Handler, TransitionOutcome, TurnEffect};
pub use intent::{BookingIntent, IntentResolver, InterpretedMessage};
pub use sessions::{SessionStore, SessionStoreError};
