use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;

/// CLI flags, each overridable by an environment variable, each falling back
/// to the documented default if neither is given — the same
/// defaults-then-env-then-flags layering the reference server's `Config::init`
/// does with its `env_or` helper, just pushed through `clap` instead of
/// hand-rolled `std::env::var` calls.
#[derive(Debug, Parser)]
#[command(name = "talk2me", about = "Talk2Me chat server")]
pub struct Cli {
    /// TCP port to listen on.
    #[arg(long, env = "TALK2ME_PORT", default_value_t = 9999)]
    pub port: u16,

    /// Soft cap on live connection-handler tasks before the accept loop reaps.
    #[arg(long, env = "TALK2ME_MAX_THREADS", default_value_t = 10)]
    pub max_threads: usize,

    /// Accept-call timeout, parsed with `humantime` (e.g. "1s", "500ms").
    #[arg(long, env = "TALK2ME_SOCKET_TIMEOUT", default_value = "1s")]
    pub socket_timeout: String,

    /// URL-safe base64 encoding of 32 bytes. If unset, a fresh key is
    /// generated at startup and logged once — fine for local runs, not for
    /// production.
    #[arg(long, env = "TALK2ME_BASE_KEY")]
    pub base_key: Option<String>,

    /// Comma-separated chat-server addresses. Empty means this process is a
    /// single-server deployment (or itself a chat server, never redirecting).
    #[arg(long, env = "TALK2ME_CHAT_SERVERS", value_delimiter = ',')]
    pub chat_servers: Vec<String>,

    /// Snapshot file path.
    #[arg(long, env = "TALK2ME_STATE_FILE", default_value = "backup.pickle")]
    pub state_file: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub max_threads: usize,
    pub socket_timeout: Duration,
    pub base_key: String,
    pub chat_servers: Vec<String>,
    pub state_file: String,
}

impl Config {
    /// Fails fast on a malformed `--base-key`/`TALK2ME_BASE_KEY` rather than
    /// letting every connection discover it later by panicking on its own
    /// `Envelope::new`.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let socket_timeout = humantime::parse_duration(&cli.socket_timeout)
            .unwrap_or_else(|_| Duration::from_secs(1));

        let base_key = match cli.base_key {
            Some(key) => {
                if fernet::Fernet::new(&key).is_none() {
                    return Err(ConfigError::InvalidBaseKey);
                }
                key
            }
            None => {
                let key = fernet::Fernet::generate_key();
                tracing::warn!(
                    %key,
                    "TALK2ME_BASE_KEY not set; generated an ephemeral key for this run only"
                );
                key
            }
        };

        Ok(Self {
            port: cli.port,
            max_threads: cli.max_threads,
            socket_timeout,
            base_key,
            chat_servers: cli.chat_servers.into_iter().filter(|s| !s.is_empty()).collect(),
            state_file: cli.state_file,
        })
    }

    /// Whether `TALK2ME_LOG` enables verbose colour-coded frame logging —
    /// read directly from the environment as a standalone boolean toggle,
    /// independent of the rest of the config layering.
    pub fn verbose_frame_logging() -> bool {
        std::env::var("TALK2ME_LOG").map(|v| v == "on").unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_bare_invocation() {
        let cli = Cli::parse_from(["talk2me"]);
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.max_threads, 10);
        assert_eq!(config.socket_timeout, Duration::from_secs(1));
        assert!(config.chat_servers.is_empty());
        assert_eq!(config.base_key.len(), 44); // url-safe base64 of 32 bytes, padded
    }

    #[test]
    fn chat_servers_split_on_comma() {
        let cli = Cli::parse_from(["talk2me", "--chat-servers", "127.0.0.1:9001,127.0.0.1:9002"]);
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.chat_servers, vec!["127.0.0.1:9001", "127.0.0.1:9002"]);
    }

    #[test]
    fn malformed_base_key_is_rejected() {
        let cli = Cli::parse_from(["talk2me", "--base-key", "not-a-real-key"]);
        assert!(matches!(Config::from_cli(cli), Err(ConfigError::InvalidBaseKey)));
    }
}
