use std::env;
use std::fs;
use std::path::Path;

use secrecy::ExposeSecret;
use toml::Value;
use turnero_core::config::{resolve_config_path, AppConfig, LoadOptions};

struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

impl Field {
    fn new(key: &'static str, env_keys: &'static [&'static str], value: impl Into<String>) -> Self {
        Self { key, env_keys, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    let venues_source =
        field_source("venues", &[], config_file_doc.as_ref(), config_file_path.as_deref());
    for venue in &config.venues {
        let summary = format!(
            "{} seats, {} table classes, {} min slots, {} capacity",
            venue.max_capacity,
            venue.tables.len(),
            venue.slot_minutes,
            venue.capacity_mode.as_str()
        );
        let key = format!("venues.{}", venue.id.0);
        lines.push(render_line(&key, &summary, venues_source.clone()));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let llm_api_key = match &config.llm.api_key {
        Some(key) => redact_secret(key.expose_secret()),
        None => "<unset>".to_string(),
    };

    vec![
        Field::new("database.url", &["TURNERO_DATABASE_URL"], config.database.url.clone()),
        Field::new(
            "database.max_connections",
            &["TURNERO_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        Field::new(
            "database.timeout_secs",
            &["TURNERO_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        Field::new(
            "whatsapp.enabled",
            &["TURNERO_WHATSAPP_ENABLED"],
            config.whatsapp.enabled.to_string(),
        ),
        Field::new(
            "whatsapp.access_token",
            &["TURNERO_WHATSAPP_ACCESS_TOKEN"],
            redact_secret(config.whatsapp.access_token.expose_secret()),
        ),
        Field::new(
            "whatsapp.verify_token",
            &["TURNERO_WHATSAPP_VERIFY_TOKEN"],
            redact_secret(config.whatsapp.verify_token.expose_secret()),
        ),
        Field::new(
            "whatsapp.phone_number_id",
            &["TURNERO_WHATSAPP_PHONE_NUMBER_ID"],
            or_unset(&config.whatsapp.phone_number_id),
        ),
        Field::new(
            "whatsapp.graph_base_url",
            &["TURNERO_WHATSAPP_GRAPH_BASE_URL"],
            config.whatsapp.graph_base_url.clone(),
        ),
        Field::new("llm.provider", &["TURNERO_LLM_PROVIDER"], config.llm.provider.as_str()),
        Field::new("llm.model", &["TURNERO_LLM_MODEL"], config.llm.model.clone()),
        Field::new(
            "llm.base_url",
            &["TURNERO_LLM_BASE_URL"],
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new("llm.api_key", &["TURNERO_LLM_API_KEY"], llm_api_key),
        Field::new(
            "server.bind_address",
            &["TURNERO_SERVER_BIND_ADDRESS"],
            config.server.bind_address.clone(),
        ),
        Field::new("server.port", &["TURNERO_SERVER_PORT"], config.server.port.to_string()),
        Field::new(
            "booking.default_venue",
            &["TURNERO_BOOKING_DEFAULT_VENUE"],
            config.booking.default_venue.clone(),
        ),
        Field::new(
            "booking.code_scope",
            &["TURNERO_BOOKING_CODE_SCOPE"],
            config.booking.code_scope.as_str(),
        ),
        Field::new(
            "booking.session_ttl_minutes",
            &["TURNERO_BOOKING_SESSION_TTL_MINUTES"],
            config.booking.session_ttl_minutes.to_string(),
        ),
        Field::new(
            "booking.utc_offset_minutes",
            &["TURNERO_BOOKING_UTC_OFFSET_MINUTES"],
            config.booking.utc_offset_minutes.to_string(),
        ),
        Field::new(
            "logging.level",
            &["TURNERO_LOGGING_LEVEL", "TURNERO_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        Field::new(
            "logging.format",
            &["TURNERO_LOGGING_FORMAT", "TURNERO_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn or_unset(value: &str) -> String {
    if value.trim().is_empty() {
        "<unset>".to_string()
    } else {
        value.to_string()
    }
}

/// Keeps a short prefix so operators can tell tokens apart.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    if trimmed.chars().count() <= 8 {
        return "<redacted>".to_string();
    }

    let prefix: String = trimmed.chars().take(4).collect();
    format!("{prefix}***")
}
