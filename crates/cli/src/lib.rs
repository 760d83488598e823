pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "turnero",
    about = "Turnero operator CLI",
    long_about = "Operate the turnero reservation bot: migrations, config inspection, readiness \
                  checks, and offline conversation turns.",
    after_help = "Examples:\n  turnero doctor --json\n  turnero config\n  \
                  turnero simulate --from 5491155550000 \"quiero reservar mañana\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, WhatsApp and LLM readiness, and database checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run one conversation turn against the configured database")]
    Simulate {
        #[arg(long, help = "Channel identity (phone number) the message comes from")]
        from: String,
        #[arg(help = "Message text as the user would type it")]
        text: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Simulate { from, text } => commands::simulate::run(&from, &text),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
