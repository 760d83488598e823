use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;
use turnero_core::clock::{format_iso_date, Clock};
use turnero_core::intent::{
    BookingIntent, IntentResolutionError, IntentResolver, InterpretedMessage,
};
use turnero_core::text::fold;

use crate::llm::LlmClient;

const SYSTEM_PROMPT: &str = "Sos un sistema que interpreta mensajes de clientes de un \
restaurante. NO respondas como humano. NO inventes datos. Devolvé solo JSON válido con esta \
estructura: {\"intent\": \"create_reservation\" | \"modify_reservation\" | \
\"cancel_reservation\" | \"consult_reservation\" | \"menu\" | \"greeting\" | \"unknown\", \
\"date\": \"YYYY-MM-DD\" | null, \"time\": \"HH:MM\" | null, \"people\": número | null}. \
Si un dato no aparece en el mensaje, poné null.";

/// Resolves intents through a chat model. Transport failures are retried;
/// a malformed answer is not, since asking again rarely fixes it.
pub struct LlmIntentResolver {
    client: Arc<dyn LlmClient>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
}

impl LlmIntentResolver {
    pub fn new(client: Arc<dyn LlmClient>, clock: Arc<dyn Clock>, max_retries: u32) -> Self {
        Self { client, clock, max_retries }
    }

    fn system_prompt(&self) -> String {
        format!("{SYSTEM_PROMPT} Hoy es {}.", format_iso_date(self.clock.today()))
    }
}

#[async_trait]
impl IntentResolver for LlmIntentResolver {
    async fn interpret(&self, text: &str) -> Result<InterpretedMessage, IntentResolutionError> {
        let system_prompt = self.system_prompt();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.complete(&system_prompt, text).await {
                Ok(raw) => return InterpretedMessage::from_json(&raw),
                Err(error) if attempt <= self.max_retries => {
                    warn!(
                        event_name = "conversation.intent.retry",
                        attempt,
                        error = %error,
                        "intent resolver call failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
                Err(error) => return Err(IntentResolutionError::Transport(format!("{error:#}"))),
            }
        }
    }
}

/// Deterministic resolver for deployments without a model, and for `simulate`.
/// Reads Spanish keywords and pulls date, time and party-size hints out of the
/// message. Hints are returned as written; the conversation re-validates them.
#[derive(Clone, Debug, Default)]
pub struct KeywordIntentResolver;

impl KeywordIntentResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str) -> InterpretedMessage {
        let normalized_text = fold(text);
        let tokens = tokenize(&normalized_text);

        InterpretedMessage {
            intent: extract_intent(&normalized_text, &tokens),
            date: extract_date_hint(&normalized_text, &tokens),
            time: extract_time_hint(&tokens),
            people: extract_people(&tokens),
        }
    }
}

#[async_trait]
impl IntentResolver for KeywordIntentResolver {
    async fn interpret(&self, text: &str) -> Result<InterpretedMessage, IntentResolutionError> {
        Ok(self.extract(text))
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric() || matches!(character, ':' | '/' | '-' | '.') {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized
        .split_whitespace()
        .map(|token| token.trim_matches(|ch| matches!(ch, '.' | '-')).to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

fn has_any(tokens: &[String], words: &[&str]) -> bool {
    tokens.iter().any(|token| words.contains(&token.as_str()))
}

fn extract_intent(normalized_text: &str, tokens: &[String]) -> BookingIntent {
    if has_any(tokens, &["cancelar", "cancela", "cancelo", "anular", "anula", "anulo"]) {
        return BookingIntent::CancelReservation;
    }
    if has_any(
        tokens,
        &["modificar", "modifica", "cambiar", "cambia", "cambio", "mover", "reprogramar"],
    ) {
        return BookingIntent::ModifyReservation;
    }
    if (has_any(tokens, &["consultar", "consulta", "ver", "tengo"])
        && has_any(tokens, &["reserva", "reservas"]))
        || normalized_text.contains("mis reservas")
    {
        return BookingIntent::ConsultReservation;
    }
    if has_any(tokens, &["reservar", "reserva", "reservo", "mesa", "lugar", "turno"]) {
        return BookingIntent::CreateReservation;
    }
    if has_any(tokens, &["menu", "opciones", "ayuda"]) {
        return BookingIntent::Menu;
    }
    if has_any(tokens, &["hola", "buenas", "buenos", "buen", "holis"]) {
        return BookingIntent::Greeting;
    }
    BookingIntent::Unknown
}

fn extract_date_hint(normalized_text: &str, tokens: &[String]) -> Option<String> {
    if normalized_text.contains("pasado manana") {
        return Some("pasado manana".to_string());
    }
    if let Some(token) = tokens.iter().find(|token| is_date_token(token)) {
        return Some(token.clone());
    }
    if has_any(tokens, &["hoy"]) {
        return Some("hoy".to_string());
    }
    // "a la mañana" is a time of day, not tomorrow.
    if has_any(tokens, &["manana"]) && !normalized_text.contains("la manana") {
        return Some("manana".to_string());
    }
    None
}

fn is_date_token(token: &str) -> bool {
    token.contains(['/', '-'])
        && token.chars().all(|ch| ch.is_ascii_digit() || matches!(ch, '/' | '-'))
        && token.chars().any(|ch| ch.is_ascii_digit())
}

fn extract_time_hint(tokens: &[String]) -> Option<String> {
    for (index, token) in tokens.iter().enumerate() {
        if is_clock_token(token) {
            return Some(token.clone());
        }

        let previous = index.checked_sub(1).and_then(|previous| tokens.get(previous));
        let next = tokens.get(index + 1).map(String::as_str);
        let is_number = !token.is_empty() && token.chars().all(|ch| ch.is_ascii_digit());
        if !is_number {
            continue;
        }
        if let Some(unit @ ("hs" | "h" | "horas" | "pm" | "am")) = next {
            return Some(format!("{token}{unit}"));
        }
        if previous.is_some_and(|previous| previous == "las" || previous == "la") {
            return Some(token.clone());
        }
    }
    None
}

fn is_clock_token(token: &str) -> bool {
    let digits_then = |suffix: &str| {
        token.strip_suffix(suffix).is_some_and(|rest| {
            !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit() || ch == ':')
        })
    };
    let has_colon = token.split_once(':').is_some_and(|(hour, minute)| {
        !hour.is_empty()
            && hour.len() <= 2
            && minute.len() == 2
            && hour.chars().chain(minute.chars()).all(|ch| ch.is_ascii_digit())
    });
    has_colon || ["hs", "h", "pm", "am"].into_iter().any(digits_then)
}

fn extract_people(tokens: &[String]) -> Option<i64> {
    for window in tokens.windows(2) {
        if let [value, unit] = window {
            if is_people_unit(unit) {
                if let Ok(people) = value.parse::<i64>() {
                    return Some(people);
                }
            }
            if matches!(value.as_str(), "somos" | "para") {
                if let Ok(people) = unit.parse::<i64>() {
                    return Some(people);
                }
            }
        }
    }
    None
}

fn is_people_unit(token: &str) -> bool {
    matches!(token, "persona" | "personas" | "pax" | "comensales" | "adultos" | "cubiertos")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use turnero_core::clock::FixedClock;
    use turnero_core::intent::{BookingIntent, IntentResolutionError, IntentResolver};

    use super::{KeywordIntentResolver, LlmIntentResolver};
    use crate::llm::LlmClient;

    struct ScriptedLlm {
        answers: Mutex<Vec<anyhow::Result<String>>>,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn new(answers: Vec<anyhow::Result<String>>) -> Self {
            Self {
                answers: Mutex::new(answers),
                prompts: Mutex::default(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, system_prompt: &str, _user: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().expect("lock").push(system_prompt.to_owned());
            let mut answers = self.answers.lock().expect("lock");
            if answers.is_empty() {
                return Err(anyhow!("script exhausted"));
            }
            answers.remove(0)
        }
    }

    fn clock() -> Arc<FixedClock> {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).single().expect("timestamp");
        Arc::new(FixedClock::new(now))
    }

    #[tokio::test]
    async fn llm_answer_is_parsed_and_prompt_carries_today() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(
            r#"{"intent":"create_reservation","date":"2026-03-12","time":"21:00","people":4}"#
                .to_owned(),
        )]));
        let resolver = LlmIntentResolver::new(llm.clone(), clock(), 2);

        let parsed = resolver.interpret("reserva el jueves a las 21 para 4").await.expect("ok");
        assert_eq!(parsed.intent, BookingIntent::CreateReservation);
        assert_eq!(parsed.people, Some(4));

        let prompts = llm.prompts.lock().expect("lock").clone();
        assert!(prompts[0].contains("Hoy es 2026-03-10."));
    }

    #[tokio::test]
    async fn transport_failures_are_retried_then_reported() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Err(anyhow!("connection reset")),
            Ok(r#"{"intent":"greeting"}"#.to_owned()),
        ]));
        let resolver = LlmIntentResolver::new(llm.clone(), clock(), 1);
        let parsed = resolver.interpret("hola").await.expect("second attempt succeeds");
        assert_eq!(parsed.intent, BookingIntent::Greeting);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);

        let failing = Arc::new(ScriptedLlm::new(vec![
            Err(anyhow!("timeout")),
            Err(anyhow!("timeout")),
        ]));
        let resolver = LlmIntentResolver::new(failing.clone(), clock(), 1);
        let error = resolver.interpret("hola").await.expect_err("retries exhausted");
        assert!(matches!(error, IntentResolutionError::Transport(_)));
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn malformed_answer_is_not_retried() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok("Claro, te ayudo".to_owned())]));
        let resolver = LlmIntentResolver::new(llm.clone(), clock(), 3);
        let error = resolver.interpret("hola").await.expect_err("prose");
        assert!(matches!(error, IntentResolutionError::Malformed(_)));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn extracts_booking_hints_from_rich_request() {
        let parsed = KeywordIntentResolver::new()
            .extract("Hola! Quiero reservar una mesa para mañana a las 21hs, somos 4 personas");

        assert_eq!(parsed.intent, BookingIntent::CreateReservation);
        assert_eq!(parsed.date.as_deref(), Some("manana"));
        assert_eq!(parsed.time.as_deref(), Some("21hs"));
        assert_eq!(parsed.people, Some(4));
    }

    #[test]
    fn reads_numeric_dates_and_clock_times() {
        let parsed = KeywordIntentResolver::new().extract("reserva el 12/03 20:30 para 2");
        assert_eq!(parsed.date.as_deref(), Some("12/03"));
        assert_eq!(parsed.time.as_deref(), Some("20:30"));
        assert_eq!(parsed.people, Some(2));

        let spaced = KeywordIntentResolver::new().extract("quiero un lugar a las 9 pm");
        assert_eq!(spaced.time.as_deref(), Some("9pm"));
        assert_eq!(spaced.date, None);
    }

    #[test]
    fn morning_is_not_tomorrow() {
        let parsed = KeywordIntentResolver::new().extract("reservar el sábado a la mañana");
        assert_eq!(parsed.date, None);
    }

    #[test]
    fn action_words_outrank_the_word_reserva() {
        let resolver = KeywordIntentResolver::new();
        let cases = [
            ("Quiero cancelar mi reserva", BookingIntent::CancelReservation),
            ("necesito cambiar la reserva", BookingIntent::ModifyReservation),
            ("¿Qué reservas tengo?", BookingIntent::ConsultReservation),
            ("ver mis reservas", BookingIntent::ConsultReservation),
            ("quisiera reservar", BookingIntent::CreateReservation),
            ("buenas noches", BookingIntent::Greeting),
            ("opciones", BookingIntent::Menu),
            ("cuánto sale el estacionamiento", BookingIntent::Unknown),
        ];

        for (text, expected) in cases {
            assert_eq!(resolver.extract(text).intent, expected, "`{text}`");
        }
    }
}
