use crate::domain::client::ClientId;
use crate::flows::states::{ConversationState, InputClass};
use crate::text::fold;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuChoice {
    Book,
    Modify,
    Cancel,
    Consult,
}

impl MenuChoice {
    pub fn from_shortcut(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Book),
            2 => Some(Self::Modify),
            3 => Some(Self::Cancel),
            4 => Some(Self::Consult),
            _ => None,
        }
    }
}

/// Handler selected by the transition table for one `(state, input)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handler {
    Greet,
    Identify,
    RepromptIdentity,
    RegisterName,
    CaptureEmail,
    ShowMenu,
    MenuShortcut(MenuChoice),
    ResolveIntent,
    CaptureDate,
    CaptureTime,
    CapturePartySize,
    ConfirmBooking,
    RetryAfterConflict,
    CaptureModifyCode,
    ConfirmModify,
    CaptureCancelCode,
    ConfirmCancel,
    Decline,
    Abandon,
}

pub trait FlowDefinition {
    fn classify(&self, text: &str) -> InputClass;
    fn route(&self, state: ConversationState, input: InputClass) -> Handler;
}

#[derive(Clone, Debug, Default)]
pub struct BookingFlow;

impl FlowDefinition for BookingFlow {
    fn classify(&self, text: &str) -> InputClass {
        classify_input(text)
    }

    fn route(&self, state: ConversationState, input: InputClass) -> Handler {
        route_booking(state, input)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn dispatch(&self, state: ConversationState, text: &str) -> (InputClass, Handler) {
        let input = self.flow.classify(text);
        (input, self.flow.route(state, input))
    }
}

impl Default for FlowEngine<BookingFlow> {
    fn default() -> Self {
        Self::new(BookingFlow)
    }
}

pub fn classify_input(text: &str) -> InputClass {
    let folded = fold(text);
    let word = folded.trim_end_matches(['.', '!']);

    if word == "si" {
        return InputClass::Affirmative;
    }
    if word == "menu" || word == "salir" {
        return InputClass::Abort;
    }
    if !word.is_empty() && word.len() <= 2 && word.chars().all(|ch| ch.is_ascii_digit()) {
        if let Ok(value) = word.parse::<u8>() {
            return InputClass::Numeral(value);
        }
    }
    if ClientId::parse(text).is_some() {
        return InputClass::IdentityNumber;
    }
    InputClass::Text
}

fn route_booking(state: ConversationState, input: InputClass) -> Handler {
    use ConversationState as S;
    use InputClass as I;

    match (state, input) {
        (S::New | S::AwaitId, I::IdentityNumber) => Handler::Identify,
        (S::New, _) => Handler::Greet,
        (S::AwaitId, _) => Handler::RepromptIdentity,
        (S::RegisterName, _) => Handler::RegisterName,
        (S::AwaitEmail, _) => Handler::CaptureEmail,
        (S::Menu, I::Numeral(value)) => match MenuChoice::from_shortcut(value) {
            Some(choice) => Handler::MenuShortcut(choice),
            None => Handler::ResolveIntent,
        },
        (S::Menu, I::Abort) => Handler::ShowMenu,
        (S::Menu, _) => Handler::ResolveIntent,
        (state, I::Abort) if state.is_mid_flow() => Handler::Abandon,
        (S::AskDate, _) => Handler::CaptureDate,
        (S::AskTime, _) => Handler::CaptureTime,
        (S::AskPartySize, _) => Handler::CapturePartySize,
        (S::Confirm, I::Affirmative) => Handler::ConfirmBooking,
        (S::ResolveConflict, I::Affirmative | I::Numeral(1)) => Handler::RetryAfterConflict,
        (S::ResolveConflict, _) => Handler::Abandon,
        (S::AskCode, _) => Handler::CaptureModifyCode,
        (S::ConfirmModify, I::Affirmative) => Handler::ConfirmModify,
        (S::AskCancelCode, _) => Handler::CaptureCancelCode,
        (S::ConfirmCancel, I::Affirmative) => Handler::ConfirmCancel,
        (S::Confirm | S::ConfirmModify | S::ConfirmCancel, _) => Handler::Decline,
    }
}

#[cfg(test)]
mod tests {
    use crate::flows::engine::{classify_input, FlowEngine, Handler, MenuChoice};
    use crate::flows::states::{ConversationState, InputClass};

    #[test]
    fn classifies_inputs_independently_of_state() {
        assert_eq!(classify_input("Sí"), InputClass::Affirmative);
        assert_eq!(classify_input(" SI! "), InputClass::Affirmative);
        assert_eq!(classify_input("Menú"), InputClass::Abort);
        assert_eq!(classify_input("salir"), InputClass::Abort);
        assert_eq!(classify_input("3"), InputClass::Numeral(3));
        assert_eq!(classify_input("12"), InputClass::Numeral(12));
        assert_eq!(classify_input("30.111.222"), InputClass::IdentityNumber);
        assert_eq!(classify_input("sii"), InputClass::Text);
        assert_eq!(classify_input("quiero reservar"), InputClass::Text);
    }

    #[test]
    fn only_affirmative_confirms() {
        let engine = FlowEngine::default();
        for reply in ["no", "ok", "dale", "1", "sip", "si por favor"] {
            let (_, handler) = engine.dispatch(ConversationState::Confirm, reply);
            assert_eq!(handler, Handler::Decline, "`{reply}` must not confirm");
        }
        for reply in ["si", "Sí", "SI"] {
            let (_, handler) = engine.dispatch(ConversationState::Confirm, reply);
            assert_eq!(handler, Handler::ConfirmBooking);
        }
        assert_eq!(
            engine.dispatch(ConversationState::ConfirmModify, "sí").1,
            Handler::ConfirmModify
        );
        assert_eq!(engine.dispatch(ConversationState::ConfirmCancel, "nah").1, Handler::Decline);
    }

    #[test]
    fn menu_shortcuts_take_precedence_over_intents() {
        let engine = FlowEngine::default();
        assert_eq!(
            engine.dispatch(ConversationState::Menu, "1").1,
            Handler::MenuShortcut(MenuChoice::Book)
        );
        assert_eq!(
            engine.dispatch(ConversationState::Menu, "4").1,
            Handler::MenuShortcut(MenuChoice::Consult)
        );
        assert_eq!(engine.dispatch(ConversationState::Menu, "7").1, Handler::ResolveIntent);
        assert_eq!(
            engine.dispatch(ConversationState::Menu, "quiero reservar").1,
            Handler::ResolveIntent
        );
    }

    #[test]
    fn numeric_answers_inside_a_flow_are_not_shortcuts() {
        let engine = FlowEngine::default();
        assert_eq!(
            engine.dispatch(ConversationState::AskPartySize, "2").1,
            Handler::CapturePartySize
        );
        assert_eq!(engine.dispatch(ConversationState::AskTime, "20").1, Handler::CaptureTime);
    }

    #[test]
    fn abort_words_abandon_every_mid_flow_state() {
        let engine = FlowEngine::default();
        for state in ConversationState::ALL.into_iter().filter(|state| state.is_mid_flow()) {
            assert_eq!(engine.dispatch(state, "salir").1, Handler::Abandon, "{state:?}");
        }
        assert_eq!(engine.dispatch(ConversationState::Menu, "menu").1, Handler::ShowMenu);
    }

    #[test]
    fn identification_precedes_everything_without_a_client() {
        let engine = FlowEngine::default();
        assert_eq!(engine.dispatch(ConversationState::New, "hola").1, Handler::Greet);
        assert_eq!(engine.dispatch(ConversationState::New, "30111222").1, Handler::Identify);
        assert_eq!(engine.dispatch(ConversationState::AwaitId, "30111222").1, Handler::Identify);
        assert_eq!(engine.dispatch(ConversationState::AwaitId, "1").1, Handler::RepromptIdentity);
    }

    #[test]
    fn conflict_resolution_retries_only_on_explicit_choice() {
        let engine = FlowEngine::default();
        assert_eq!(
            engine.dispatch(ConversationState::ResolveConflict, "1").1,
            Handler::RetryAfterConflict
        );
        assert_eq!(
            engine.dispatch(ConversationState::ResolveConflict, "si").1,
            Handler::RetryAfterConflict
        );
        assert_eq!(engine.dispatch(ConversationState::ResolveConflict, "2").1, Handler::Abandon);
    }
}
