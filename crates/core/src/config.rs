use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::booking::code::{CodeScope, ScopeTag};
use crate::domain::venue::{CapacityMode, TableClass, VenueConfig, VenueId};

pub const DEFAULT_CONFIG_FILE: &str = "turnero.toml";
pub const NESTED_CONFIG_FILE: &str = "config/turnero.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub whatsapp: WhatsAppConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub booking: BookingConfig,
    pub logging: LoggingConfig,
    pub venues: Vec<VenueConfig>,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WhatsAppConfig {
    /// When false, replies are logged instead of sent.
    pub enabled: bool,
    pub access_token: SecretString,
    pub verify_token: SecretString,
    pub phone_number_id: String,
    pub graph_base_url: String,
    pub send_timeout_secs: u64,
    pub max_send_retries: u32,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct BookingConfig {
    pub default_venue: String,
    pub code_scope: CodeScope,
    pub code_tag: ScopeTag,
    pub session_ttl_minutes: u64,
    /// Offset of the venues' local time from UTC, in minutes.
    pub utc_offset_minutes: i32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// Deterministic keyword matcher; no network calls.
    Keyword,
    #[serde(alias = "openai")]
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::OpenAi => "open_ai",
            Self::Ollama => "ollama",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub whatsapp_enabled: Option<bool>,
    pub whatsapp_access_token: Option<String>,
    pub whatsapp_verify_token: Option<String>,
    pub whatsapp_phone_number_id: Option<String>,
    pub default_venue: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://turnero.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            whatsapp: WhatsAppConfig {
                enabled: false,
                access_token: String::new().into(),
                verify_token: String::new().into(),
                phone_number_id: String::new(),
                graph_base_url: "https://graph.facebook.com/v25.0".to_string(),
                send_timeout_secs: 10,
                max_send_retries: 2,
            },
            llm: LlmConfig {
                provider: LlmProvider::Keyword,
                api_key: None,
                base_url: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 15,
                max_retries: 1,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            booking: BookingConfig {
                default_venue: "principal".to_string(),
                code_scope: CodeScope::VenueDay,
                code_tag: ScopeTag::Year,
                session_ttl_minutes: 6 * 60,
                utc_offset_minutes: -180,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            venues: vec![default_venue()],
        }
    }
}

fn default_venue() -> VenueConfig {
    VenueConfig {
        id: VenueId("principal".to_string()),
        branch_code: 1,
        max_capacity: 60,
        slot_minutes: 90,
        capacity_mode: CapacityMode::Strict,
        capacity_overrides: BTreeMap::new(),
        tables: vec![
            TableClass { capacity: 2, quantity: 10 },
            TableClass { capacity: 4, quantity: 5 },
        ],
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected keyword|openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn default_venue_id(&self) -> VenueId {
        VenueId(self.booking.default_venue.clone())
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        let minutes = i64::try_from(self.booking.session_ttl_minutes).unwrap_or(i64::MAX / 60_000);
        chrono::Duration::minutes(minutes)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(whatsapp) = patch.whatsapp {
            if let Some(enabled) = whatsapp.enabled {
                self.whatsapp.enabled = enabled;
            }
            if let Some(access_token) = whatsapp.access_token {
                self.whatsapp.access_token = secret_value(access_token);
            }
            if let Some(verify_token) = whatsapp.verify_token {
                self.whatsapp.verify_token = secret_value(verify_token);
            }
            if let Some(phone_number_id) = whatsapp.phone_number_id {
                self.whatsapp.phone_number_id = phone_number_id;
            }
            if let Some(graph_base_url) = whatsapp.graph_base_url {
                self.whatsapp.graph_base_url = graph_base_url;
            }
            if let Some(send_timeout_secs) = whatsapp.send_timeout_secs {
                self.whatsapp.send_timeout_secs = send_timeout_secs;
            }
            if let Some(max_send_retries) = whatsapp.max_send_retries {
                self.whatsapp.max_send_retries = max_send_retries;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(booking) = patch.booking {
            if let Some(default_venue) = booking.default_venue {
                self.booking.default_venue = default_venue;
            }
            if let Some(code_scope) = booking.code_scope {
                self.booking.code_scope = code_scope;
            }
            if let Some(code_tag) = booking.code_tag {
                self.booking.code_tag = code_tag;
            }
            if let Some(session_ttl_minutes) = booking.session_ttl_minutes {
                self.booking.session_ttl_minutes = session_ttl_minutes;
            }
            if let Some(utc_offset_minutes) = booking.utc_offset_minutes {
                self.booking.utc_offset_minutes = utc_offset_minutes;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(venues) = patch.venues {
            self.venues =
                venues.into_iter().map(VenuePatch::into_venue).collect::<Result<_, _>>()?;
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TURNERO_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TURNERO_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("TURNERO_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TURNERO_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TURNERO_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TURNERO_WHATSAPP_ENABLED") {
            self.whatsapp.enabled = parse_bool("TURNERO_WHATSAPP_ENABLED", &value)?;
        }
        if let Some(value) = read_env("TURNERO_WHATSAPP_ACCESS_TOKEN") {
            self.whatsapp.access_token = secret_value(value);
        }
        if let Some(value) = read_env("TURNERO_WHATSAPP_VERIFY_TOKEN") {
            self.whatsapp.verify_token = secret_value(value);
        }
        if let Some(value) = read_env("TURNERO_WHATSAPP_PHONE_NUMBER_ID") {
            self.whatsapp.phone_number_id = value;
        }
        if let Some(value) = read_env("TURNERO_WHATSAPP_GRAPH_BASE_URL") {
            self.whatsapp.graph_base_url = value;
        }
        if let Some(value) = read_env("TURNERO_WHATSAPP_SEND_TIMEOUT_SECS") {
            self.whatsapp.send_timeout_secs =
                parse_u64("TURNERO_WHATSAPP_SEND_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TURNERO_WHATSAPP_MAX_SEND_RETRIES") {
            self.whatsapp.max_send_retries =
                parse_u32("TURNERO_WHATSAPP_MAX_SEND_RETRIES", &value)?;
        }

        if let Some(value) = read_env("TURNERO_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("TURNERO_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("TURNERO_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("TURNERO_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("TURNERO_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("TURNERO_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TURNERO_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("TURNERO_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("TURNERO_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TURNERO_SERVER_PORT") {
            self.server.port = parse_u16("TURNERO_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("TURNERO_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("TURNERO_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("TURNERO_BOOKING_DEFAULT_VENUE") {
            self.booking.default_venue = value;
        }
        if let Some(value) = read_env("TURNERO_BOOKING_CODE_SCOPE") {
            self.booking.code_scope = CodeScope::parse(&value).ok_or_else(|| {
                ConfigError::InvalidEnvOverride {
                    key: "TURNERO_BOOKING_CODE_SCOPE".to_string(),
                    value: value.clone(),
                }
            })?;
        }
        if let Some(value) = read_env("TURNERO_BOOKING_CODE_TAG") {
            self.booking.code_tag =
                ScopeTag::parse(&value).ok_or_else(|| ConfigError::InvalidEnvOverride {
                    key: "TURNERO_BOOKING_CODE_TAG".to_string(),
                    value: value.clone(),
                })?;
        }
        if let Some(value) = read_env("TURNERO_BOOKING_SESSION_TTL_MINUTES") {
            self.booking.session_ttl_minutes =
                parse_u64("TURNERO_BOOKING_SESSION_TTL_MINUTES", &value)?;
        }
        if let Some(value) = read_env("TURNERO_BOOKING_UTC_OFFSET_MINUTES") {
            self.booking.utc_offset_minutes =
                value.trim().parse::<i32>().map_err(|_| ConfigError::InvalidEnvOverride {
                    key: "TURNERO_BOOKING_UTC_OFFSET_MINUTES".to_string(),
                    value: value.clone(),
                })?;
        }

        let log_level =
            read_env("TURNERO_LOGGING_LEVEL").or_else(|| read_env("TURNERO_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TURNERO_LOGGING_FORMAT").or_else(|| read_env("TURNERO_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(enabled) = overrides.whatsapp_enabled {
            self.whatsapp.enabled = enabled;
        }
        if let Some(access_token) = overrides.whatsapp_access_token {
            self.whatsapp.access_token = secret_value(access_token);
        }
        if let Some(verify_token) = overrides.whatsapp_verify_token {
            self.whatsapp.verify_token = secret_value(verify_token);
        }
        if let Some(phone_number_id) = overrides.whatsapp_phone_number_id {
            self.whatsapp.phone_number_id = phone_number_id;
        }
        if let Some(default_venue) = overrides.default_venue {
            self.booking.default_venue = default_venue;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_whatsapp(&self.whatsapp)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_venues(&self.venues)?;
        validate_booking(&self.booking, &self.venues)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_whatsapp(whatsapp: &WhatsAppConfig) -> Result<(), ConfigError> {
    if whatsapp.send_timeout_secs == 0 || whatsapp.send_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "whatsapp.send_timeout_secs must be in range 1..=120".to_string(),
        ));
    }
    if !whatsapp.enabled {
        return Ok(());
    }

    if whatsapp.access_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "whatsapp.access_token is required when whatsapp.enabled is true. Create a permanent token in Meta Business Settings > System Users".to_string(),
        ));
    }
    if whatsapp.verify_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "whatsapp.verify_token is required when whatsapp.enabled is true; it must match the token entered in the webhook subscription".to_string(),
        ));
    }
    let phone_number_id = whatsapp.phone_number_id.trim();
    if phone_number_id.is_empty() || !phone_number_id.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(ConfigError::Validation(
            "whatsapp.phone_number_id must be the numeric id shown in WhatsApp Manager > API Setup (not the phone number itself)".to_string(),
        ));
    }
    if !whatsapp.graph_base_url.starts_with("http://")
        && !whatsapp.graph_base_url.starts_with("https://")
    {
        return Err(ConfigError::Validation(
            "whatsapp.graph_base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::Keyword => {}
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for the ollama provider (e.g. http://localhost:11434/v1)"
                        .to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_venues(venues: &[VenueConfig]) -> Result<(), ConfigError> {
    if venues.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[venues]] entry is required".to_string(),
        ));
    }

    let mut seen = BTreeSet::new();
    for venue in venues {
        let id = venue.id.0.trim();
        if id.is_empty() {
            return Err(ConfigError::Validation("venues[].id must not be empty".to_string()));
        }
        if !seen.insert(id.to_string()) {
            return Err(ConfigError::Validation(format!("venue id `{id}` is defined twice")));
        }
        if venue.branch_code > 999 {
            return Err(ConfigError::Validation(format!(
                "venue `{id}`: branch_code must fit in three digits"
            )));
        }
        if venue.max_capacity == 0 {
            return Err(ConfigError::Validation(format!(
                "venue `{id}`: max_capacity must be greater than zero"
            )));
        }
        if venue.slot_minutes == 0 || venue.slot_minutes > 24 * 60 {
            return Err(ConfigError::Validation(format!(
                "venue `{id}`: slot_minutes must be in range 1..=1440"
            )));
        }

        let mut capacities = BTreeSet::new();
        for table in &venue.tables {
            if table.capacity == 0 || table.quantity == 0 {
                return Err(ConfigError::Validation(format!(
                    "venue `{id}`: tables need a positive capacity and quantity"
                )));
            }
            if !capacities.insert(table.capacity) {
                return Err(ConfigError::Validation(format!(
                    "venue `{id}`: table capacity {} is listed twice",
                    table.capacity
                )));
            }
        }
    }

    Ok(())
}

fn validate_booking(booking: &BookingConfig, venues: &[VenueConfig]) -> Result<(), ConfigError> {
    if !venues.iter().any(|venue| venue.id.0 == booking.default_venue) {
        return Err(ConfigError::Validation(format!(
            "booking.default_venue `{}` does not match any [[venues]] id",
            booking.default_venue
        )));
    }
    if booking.session_ttl_minutes == 0 || booking.session_ttl_minutes > 7 * 24 * 60 {
        return Err(ConfigError::Validation(
            "booking.session_ttl_minutes must be in range 1..=10080".to_string(),
        ));
    }
    if !(-12 * 60..=14 * 60).contains(&booking.utc_offset_minutes) {
        return Err(ConfigError::Validation(
            "booking.utc_offset_minutes must be in range -720..=840".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    whatsapp: Option<WhatsAppPatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    booking: Option<BookingPatch>,
    logging: Option<LoggingPatch>,
    venues: Option<Vec<VenuePatch>>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsAppPatch {
    enabled: Option<bool>,
    access_token: Option<String>,
    verify_token: Option<String>,
    phone_number_id: Option<String>,
    graph_base_url: Option<String>,
    send_timeout_secs: Option<u64>,
    max_send_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BookingPatch {
    default_venue: Option<String>,
    code_scope: Option<CodeScope>,
    code_tag: Option<ScopeTag>,
    session_ttl_minutes: Option<u64>,
    utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Deserialize)]
struct VenuePatch {
    id: String,
    #[serde(default)]
    branch_code: u32,
    max_capacity: u32,
    #[serde(default = "default_slot_minutes")]
    slot_minutes: u32,
    #[serde(default)]
    capacity_mode: CapacityMode,
    #[serde(default)]
    capacity_overrides: BTreeMap<String, u32>,
    #[serde(default)]
    tables: Vec<TableClass>,
}

fn default_slot_minutes() -> u32 {
    90
}

impl VenuePatch {
    fn into_venue(self) -> Result<VenueConfig, ConfigError> {
        let mut capacity_overrides = BTreeMap::new();
        for (raw_date, capacity) in self.capacity_overrides {
            let date = NaiveDate::parse_from_str(raw_date.trim(), "%Y-%m-%d").map_err(|_| {
                ConfigError::Validation(format!(
                    "venue `{}`: capacity override key `{raw_date}` must be a YYYY-MM-DD date",
                    self.id
                ))
            })?;
            capacity_overrides.insert(date, capacity);
        }

        Ok(VenueConfig {
            id: VenueId(self.id),
            branch_code: self.branch_code,
            max_capacity: self.max_capacity,
            slot_minutes: self.slot_minutes,
            capacity_mode: self.capacity_mode,
            capacity_overrides,
            tables: self.tables,
        })
    }
}
