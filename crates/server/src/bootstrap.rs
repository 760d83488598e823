use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;
use turnero_agent::{
    BookingRuntime, ChatCompletionsClient, ConversationMachine, KeywordIntentResolver,
    LlmIntentResolver,
};
use turnero_core::audit::TracingAuditSink;
use turnero_core::booking::{
    BookingService, CapacityAllocator, CodeGenerator, LogNotifier, StaticVenueCatalog,
};
use turnero_core::clock::{Clock, SystemClock};
use turnero_core::config::{AppConfig, ConfigError};
use turnero_core::intent::IntentResolver;
use turnero_db::{
    connect_with_settings, migrations, DbPool, SqlClientDirectory, SqlReservationGateway,
    SqlSessionStore,
};
use turnero_whatsapp::{CloudApiSender, DeliveryPolicy, LogSender, MessageSender, TransportError};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<BookingRuntime>,
    pub sender: Arc<dyn MessageSender>,
    pub delivery: DeliveryPolicy,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("intent resolver setup failed: {0}")]
    IntentResolver(String),
    #[error("whatsapp sender setup failed: {0}")]
    Sender(#[source] TransportError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let clock: Arc<dyn Clock> =
        Arc::new(SystemClock::with_offset_minutes(config.booking.utc_offset_minutes));
    let resolver = intent_resolver(&config, clock.clone())?;
    let runtime = Arc::new(booking_runtime(&config, &db_pool, resolver, clock));
    let sender = message_sender(&config)?;
    let delivery = DeliveryPolicy::new(
        config.whatsapp.max_send_retries,
        Duration::from_secs(config.whatsapp.send_timeout_secs),
    );

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        whatsapp_enabled = config.whatsapp.enabled,
        venues = config.venues.len(),
        default_venue = %config.booking.default_venue,
        "application assembled"
    );

    Ok(Application { config, db_pool, runtime, sender, delivery })
}

fn booking_runtime(
    config: &AppConfig,
    db_pool: &DbPool,
    resolver: Arc<dyn IntentResolver>,
    clock: Arc<dyn Clock>,
) -> BookingRuntime {
    let allocator = CapacityAllocator::new(CodeGenerator::new(
        config.booking.code_scope,
        config.booking.code_tag,
    ));
    let booking = BookingService::new(
        Arc::new(SqlReservationGateway::new(db_pool.clone())),
        Arc::new(StaticVenueCatalog::new(config.venues.clone())),
        allocator,
    );
    let machine = ConversationMachine::new(
        booking,
        Arc::new(SqlClientDirectory::new(db_pool.clone())),
        resolver,
        clock.clone(),
        config.default_venue_id(),
    );

    BookingRuntime::new(
        machine,
        Arc::new(SqlSessionStore::new(db_pool.clone())),
        Arc::new(LogNotifier),
        Arc::new(TracingAuditSink),
        clock,
        config.session_ttl(),
    )
}

fn intent_resolver(
    config: &AppConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn IntentResolver>, BootstrapError> {
    let client = ChatCompletionsClient::from_config(&config.llm)
        .map_err(|error| BootstrapError::IntentResolver(error.to_string()))?;

    Ok(match client {
        Some(client) => {
            info!(
                event_name = "system.bootstrap.intent_resolver",
                correlation_id = "bootstrap",
                provider = config.llm.provider.as_str(),
                endpoint = client.endpoint(),
                model = %config.llm.model,
                "llm intent resolver configured"
            );
            Arc::new(LlmIntentResolver::new(Arc::new(client), clock, config.llm.max_retries))
        }
        None => Arc::new(KeywordIntentResolver::new()),
    })
}

fn message_sender(config: &AppConfig) -> Result<Arc<dyn MessageSender>, BootstrapError> {
    if !config.whatsapp.enabled {
        info!(
            event_name = "system.bootstrap.whatsapp_disabled",
            correlation_id = "bootstrap",
            "whatsapp delivery disabled; replies will be logged"
        );
        return Ok(Arc::new(LogSender));
    }

    let sender = CloudApiSender::new(
        config.whatsapp.graph_base_url.clone(),
        config.whatsapp.phone_number_id.clone(),
        config.whatsapp.access_token.clone(),
        Duration::from_secs(config.whatsapp.send_timeout_secs),
    )
    .map_err(BootstrapError::Sender)?;
    Ok(Arc::new(sender))
}
