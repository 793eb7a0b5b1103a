//! Command-line client for the event protocol.
//!
//! ```text
//! etp emit ws://host:9000/events greet hello
//! etp emit ws://host:9000/events sum 1234 --ack
//! etp listen ws://host:9000/events --echo echo
//! ```
//!
//! All output goes through the writers handed to [`run`]; diagnostics are
//! logged to stderr with `RUST_LOG` filtering (default `info`).

pub mod cli;
pub mod commands;

use std::{ffi::OsString, io::Write, process::ExitCode, time::Duration};

use clap::Parser;
pub use cli::{Cli, Command};
use etp_client::{Client, EtpError, WsTransport};
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Failures of a CLI invocation.
#[derive(Debug, Error)]
pub enum CliError {
    /// Client operation failed.
    #[error(transparent)]
    Client(#[from] EtpError),

    /// The peer did not acknowledge in time.
    #[error("no acknowledgement within {0:?}")]
    AckTimeout(Duration),

    /// Writing to the output stream failed.
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),

    /// The async runtime could not be started.
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Parse `args`, execute the command and report the outcome as an exit code.
pub fn run<I, T>(args: I, stdout: &mut impl Write, stderr: &mut impl Write) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            let target: &mut dyn Write = if err.use_stderr() { stderr } else { stdout };
            let _ = write!(target, "{}", err.render());
            return ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(2));
        },
    };

    init_tracing();

    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)
        .and_then(|runtime| runtime.block_on(execute(cli, stdout)));

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let _ = writeln!(stderr, "etp: {err}");
            ExitCode::FAILURE
        },
    }
}

async fn execute(cli: Cli, out: &mut impl Write) -> Result<(), CliError> {
    let client = Client::new(WsTransport, cli.client_config());
    match cli.command {
        Command::Emit { url, event, payload, ack, timeout_ms } => {
            let wait = ack.then(|| Duration::from_millis(timeout_ms));
            let payload = payload.unwrap_or_default();
            commands::emit(&client, &url, &event, payload.as_bytes(), wait, out).await
        },
        Command::Listen { url, events, echo } => {
            commands::listen(&client, &url, &events, &echo, out, shutdown_signal()).await
        },
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_goes_to_stdout() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let code = run(["etp", "--help"], &mut stdout, &mut stderr);

        assert_eq!(code, ExitCode::SUCCESS);
        assert!(String::from_utf8(stdout).unwrap().contains("emit"));
        assert!(stderr.is_empty());
    }

    #[test]
    fn usage_errors_go_to_stderr() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let code = run(["etp", "emit"], &mut stdout, &mut stderr);

        assert_eq!(code, ExitCode::from(2));
        assert!(stdout.is_empty());
        assert!(!stderr.is_empty());
    }
}
