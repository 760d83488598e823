use std::process::ExitCode;

fn main() -> ExitCode {
    turnero_cli::run()
}
