use secrecy::ExposeSecret;
use serde::Serialize;
use turnero_agent::ChatCompletionsClient;
use turnero_core::config::{AppConfig, LlmProvider, LoadOptions};
use turnero_db::{migrations, DbPool};

use crate::commands::{async_runtime, connect, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_whatsapp(&config));
            checks.push(check_llm(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            let reason = "configuration did not load";
            for name in ["whatsapp_readiness", "llm_readiness", "database_connectivity", "schema"] {
                checks.push(DoctorCheck::skipped(name, reason));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_whatsapp(config: &AppConfig) -> DoctorCheck {
    let whatsapp = &config.whatsapp;
    if !whatsapp.enabled {
        return DoctorCheck::pass(
            "whatsapp_readiness",
            "delivery disabled; replies will be logged instead of sent",
        );
    }

    // Validation already rejected empty credentials; report what will be used.
    let token_len = whatsapp.access_token.expose_secret().len();
    DoctorCheck::pass(
        "whatsapp_readiness",
        format!(
            "sending as phone number id {} via {} (access token: {token_len} chars)",
            whatsapp.phone_number_id, whatsapp.graph_base_url
        ),
    )
}

fn check_llm(config: &AppConfig) -> DoctorCheck {
    if config.llm.provider == LlmProvider::Keyword {
        return DoctorCheck::pass("llm_readiness", "keyword intent matcher; no model calls");
    }

    match ChatCompletionsClient::from_config(&config.llm) {
        Ok(Some(client)) => DoctorCheck::pass(
            "llm_readiness",
            format!("model `{}` at {}", config.llm.model, client.endpoint()),
        ),
        Ok(None) => DoctorCheck::fail("llm_readiness", "no client for the configured provider"),
        Err(error) => DoctorCheck::fail("llm_readiness", format!("{error:#}")),
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match async_runtime() {
        Ok(runtime) => runtime,
        Err((_, message, _)) => {
            return vec![
                DoctorCheck::fail("database_connectivity", message),
                DoctorCheck::skipped("schema", "the async runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect(config).await {
            Ok(pool) => pool,
            Err((_, message, _)) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {message}"),
                    ),
                    DoctorCheck::skipped("schema", "the database is unreachable"),
                ];
            }
        };

        let checks = vec![
            DoctorCheck::pass(
                "database_connectivity",
                format!("connected using `{}`", config.database.url),
            ),
            check_schema(&pool).await,
        ];
        pool.close().await;
        checks
    })
}

async fn check_schema(pool: &DbPool) -> DoctorCheck {
    let expected = migrations::known_count();
    match migrations::applied_count(pool).await {
        Ok(applied) if applied >= expected => {
            DoctorCheck::pass("schema", format!("{applied} of {expected} migrations applied"))
        }
        Ok(applied) => DoctorCheck::fail(
            "schema",
            format!("{applied} of {expected} migrations applied; run `turnero migrate`"),
        ),
        Err(_) => DoctorCheck::fail("schema", "no migrations applied; run `turnero migrate`"),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
