pub mod engine;
pub mod states;

pub use engine::{classify_input, BookingFlow, FlowDefinition, FlowEngine, Handler, MenuChoice};
pub use states::{ConversationState, InputClass, TransitionOutcome, TurnEffect};
