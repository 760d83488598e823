//! One conversation turn without WhatsApp: the message goes through the same
//! machine and session store the server uses, with the keyword resolver so no
//! model is called.

use std::sync::Arc;

use serde::Serialize;
use turnero_agent::{BookingRuntime, ConversationMachine, KeywordIntentResolver};
use turnero_core::audit::InMemoryAuditSink;
use turnero_core::booking::{
    BookingService, CapacityAllocator, CodeGenerator, LogNotifier, StaticVenueCatalog,
};
use turnero_core::clock::{Clock, SystemClock};
use turnero_core::config::AppConfig;
use turnero_core::domain::session::{ChannelIdentity, InboundMessage};
use turnero_db::{migrations, DbPool, SqlClientDirectory, SqlReservationGateway, SqlSessionStore};

use crate::commands::{async_runtime, connect, load_config, CommandResult, StepError};

#[derive(Debug, Serialize)]
struct SimulationOutcome {
    command: &'static str,
    status: &'static str,
    from: String,
    state_before: &'static str,
    state_after: &'static str,
    reply: String,
    session_version: u64,
    session_saved: bool,
    audit_events: Vec<String>,
}

pub fn run(from: &str, text: &str) -> CommandResult {
    match simulate(from, text) {
        Ok(outcome) => match serde_json::to_string(&outcome) {
            Ok(output) => CommandResult { exit_code: 0, output },
            Err(error) => {
                CommandResult::failure("simulate", "serialization", error.to_string(), 7)
            }
        },
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("simulate", error_class, message, exit_code)
        }
    }
}

fn simulate(from: &str, text: &str) -> Result<SimulationOutcome, StepError> {
    let identity = from.trim();
    if identity.is_empty() {
        return Err(("invalid_input", "--from must not be empty".to_string(), 2));
    }

    let config = load_config()?;
    let runtime = async_runtime()?;

    runtime.block_on(async {
        let pool = connect(&config).await?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let audit = InMemoryAuditSink::default();
        let booking_runtime = assemble(&config, &pool, audit.clone());
        let message = InboundMessage {
            message_id: None,
            from: ChannelIdentity(identity.to_string()),
            text: text.to_string(),
        };

        let report = booking_runtime
            .handle(message)
            .await
            .map_err(|error| ("turn_failed", format!("{error:#}"), 6u8))?;
        pool.close().await;

        // Without a message id a turn is never treated as a replay.
        let report =
            report.ok_or_else(|| ("turn_failed", "turn produced no reply".to_string(), 6u8))?;

        Ok::<_, StepError>(SimulationOutcome {
            command: "simulate",
            status: "ok",
            from: identity.to_string(),
            state_before: report.from.as_str(),
            state_after: report.to.as_str(),
            reply: report.reply.text,
            session_version: report.session_version,
            session_saved: report.session_saved,
            audit_events: audit.event_types(),
        })
    })
}

fn assemble(config: &AppConfig, pool: &DbPool, audit: InMemoryAuditSink) -> BookingRuntime {
    let clock: Arc<dyn Clock> =
        Arc::new(SystemClock::with_offset_minutes(config.booking.utc_offset_minutes));
    let booking = BookingService::new(
        Arc::new(SqlReservationGateway::new(pool.clone())),
        Arc::new(StaticVenueCatalog::new(config.venues.clone())),
        CapacityAllocator::new(CodeGenerator::new(
            config.booking.code_scope,
            config.booking.code_tag,
        )),
    );
    let machine = ConversationMachine::new(
        booking,
        Arc::new(SqlClientDirectory::new(pool.clone())),
        Arc::new(KeywordIntentResolver::new()),
        clock.clone(),
        config.default_venue_id(),
    );

    BookingRuntime::new(
        machine,
        Arc::new(SqlSessionStore::new(pool.clone())),
        Arc::new(LogNotifier),
        Arc::new(audit),
        clock,
        config.session_ttl(),
    )
}
