//! Configuration resolution.
//!
//! Options come from two layers: an optional TOML config file (an `[outbox]`
//! table) supplying defaults, and command-line flags overriding it. All
//! validation happens here, before the processor starts; a bad
//! configuration never reaches the delivery loop.

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use outbox_delivery::{Credentials, TlsPolicy};

/// Deliver queued mail through an SMTP relay.
#[derive(Debug, Parser)]
#[command(name = "outbox", version)]
pub struct Args {
    /// Directory holding the queued messages.
    pub queue_path: Option<PathBuf>,

    /// Run forever, periodically checking the queue. Default is to send
    /// everything currently queued once and exit.
    #[arg(long)]
    pub daemon: bool,

    /// Seconds between queue scans in daemon mode.
    #[arg(long, allow_negative_numbers = true)]
    pub interval: Option<f64>,

    /// SMTP relay to deliver through.
    #[arg(long)]
    pub hostname: Option<String>,

    /// SMTP relay port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Username for SMTP authentication. Requires --password.
    #[arg(long)]
    pub username: Option<String>,

    /// Password for SMTP authentication. Requires --username.
    #[arg(long)]
    pub password: Option<String>,

    /// Do not deliver unless the server offers TLS.
    #[arg(long, conflicts_with = "no_tls")]
    pub force_tls: bool,

    /// Never use TLS, even when the server offers it.
    #[arg(long)]
    pub no_tls: bool,

    /// TOML configuration file with an [outbox] table supplying defaults
    /// for the options above.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// The `[outbox]` table of a configuration file. Every key optional;
/// command-line flags win.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    queue_path: Option<PathBuf>,
    daemon: Option<bool>,
    interval: Option<f64>,
    hostname: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    force_tls: Option<bool>,
    no_tls: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfigDocument {
    #[serde(default)]
    outbox: FileConfig,
}

/// Configuration problems reported before the processor starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a queue path is required (positional argument or queue_path in the config file)")]
    MissingQueuePath,

    #[error("username and password must be supplied together")]
    PartialCredentials,

    #[error("force_tls and no_tls are mutually exclusive")]
    ConflictingTls,

    #[error("interval must be a positive number of seconds")]
    InvalidInterval,

    #[error("failed to read config file {path}: {source}")]
    ReadConfig {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseConfig {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Fully resolved, validated runtime settings.
#[derive(Debug)]
pub struct Settings {
    pub queue_path: PathBuf,
    pub daemon: bool,
    pub interval: Duration,
    pub hostname: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    pub tls: TlsPolicy,
}

impl Settings {
    /// Layer the config file under the command-line flags and validate.
    pub fn resolve(args: Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => load_file(path)?,
            None => FileConfig::default(),
        };

        let queue_path = args
            .queue_path
            .or(file.queue_path)
            .ok_or(ConfigError::MissingQueuePath)?;

        let interval = args.interval.or(file.interval).unwrap_or(3.0);
        if !interval.is_finite() || interval <= 0.0 {
            return Err(ConfigError::InvalidInterval);
        }

        let credentials = match (
            args.username.or(file.username),
            args.password.or(file.password),
        ) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            (None, None) => None,
            _ => return Err(ConfigError::PartialCredentials),
        };

        let force_tls = args.force_tls || file.force_tls.unwrap_or(false);
        let no_tls = args.no_tls || file.no_tls.unwrap_or(false);
        let tls = match (force_tls, no_tls) {
            (true, true) => return Err(ConfigError::ConflictingTls),
            (true, false) => TlsPolicy::Required,
            (false, true) => TlsPolicy::Disabled,
            (false, false) => TlsPolicy::Opportunistic,
        };

        Ok(Self {
            queue_path,
            daemon: args.daemon || file.daemon.unwrap_or(false),
            interval: Duration::from_secs_f64(interval),
            hostname: args
                .hostname
                .or(file.hostname)
                .unwrap_or_else(|| "localhost".to_string()),
            port: args.port.or(file.port).unwrap_or(25),
            credentials,
            tls,
        })
    }
}

fn load_file(path: &PathBuf) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadConfig {
        path: path.display().to_string(),
        source,
    })?;
    let document: FileConfigDocument =
        toml::from_str(&content).map_err(|source| ConfigError::ParseConfig {
            path: path.display().to_string(),
            source,
        })?;
    Ok(document.outbox)
}
