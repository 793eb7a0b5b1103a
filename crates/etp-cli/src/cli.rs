//! Argument definitions.

use std::time::Duration;

use clap::{Parser, Subcommand};
use etp_client::{ClientConfig, DEFAULT_WORKERS};

/// Event protocol client.
#[derive(Debug, Parser)]
#[command(name = "etp", version, about)]
pub struct Cli {
    /// Dispatch workers for inbound events.
    #[arg(long, global = true, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Extra handshake header (repeatable).
    #[arg(long = "header", value_name = "NAME:VALUE", global = true, value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Largest inbound message in bytes (0 keeps the transport default).
    #[arg(long, global = true, default_value_t = 0)]
    pub read_limit: usize,

    /// Handshake timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 10_000)]
    pub connect_timeout_ms: u64,

    /// Operation to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send one event, optionally waiting for its acknowledgement.
    Emit {
        /// Endpoint URL (`ws://host:port/path`).
        url: String,
        /// Event name.
        event: String,
        /// Payload, sent as UTF-8 bytes.
        payload: Option<String>,
        /// Wait for the peer's acknowledgement and print it.
        #[arg(long)]
        ack: bool,
        /// Acknowledgement timeout in milliseconds.
        #[arg(long, default_value_t = 5_000)]
        timeout_ms: u64,
    },

    /// Print inbound events until interrupted or disconnected.
    Listen {
        /// Endpoint URL (`ws://host:port/path`).
        url: String,
        /// Only print these events (repeatable; default prints all).
        #[arg(long = "event")]
        events: Vec<String>,
        /// Acknowledge these events by echoing the payload (repeatable).
        #[arg(long)]
        echo: Vec<String>,
    },
}

impl Cli {
    /// Client configuration from the global flags.
    pub fn client_config(&self) -> ClientConfig {
        let config = ClientConfig::default()
            .with_workers(self.workers)
            .with_read_limit(self.read_limit)
            .with_connect_timeout(Some(Duration::from_millis(self.connect_timeout_ms)));
        self.headers.iter().fold(config, |config, (name, value)| config.with_header(name, value))
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) =
        raw.split_once(':').ok_or_else(|| format!("expected NAME:VALUE, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name is empty".to_owned());
    }
    Ok((name.to_owned(), value.trim().to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_with_ack_flags() {
        let cli = Cli::try_parse_from([
            "etp", "emit", "ws://localhost:9000/", "sum", "1234", "--ack", "--timeout-ms", "250",
        ])
        .unwrap();

        match cli.command {
            Command::Emit { url, event, payload, ack, timeout_ms } => {
                assert_eq!(url, "ws://localhost:9000/");
                assert_eq!(event, "sum");
                assert_eq!(payload.as_deref(), Some("1234"));
                assert!(ack);
                assert_eq!(timeout_ms, 250);
            },
            Command::Listen { .. } => panic!("expected emit"),
        }
    }

    #[test]
    fn global_flags_build_config() {
        let cli = Cli::try_parse_from([
            "etp",
            "listen",
            "ws://localhost/",
            "--workers",
            "2",
            "--header",
            "Authorization: Bearer t",
            "--read-limit",
            "4096",
            "--echo",
            "echo",
        ])
        .unwrap();

        let config = cli.client_config();
        assert_eq!(config.workers, 2);
        assert_eq!(config.read_limit, 4096);
        assert_eq!(config.dial.headers, vec![("Authorization".to_owned(), "Bearer t".to_owned())]);
        assert!(matches!(cli.command, Command::Listen { ref echo, .. } if echo == &["echo"]));
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(parse_header("no-separator").is_err());
        assert!(parse_header(":value").is_err());
        assert_eq!(parse_header("X-A:b:c").unwrap(), ("X-A".to_owned(), "b:c".to_owned()));
    }
}
