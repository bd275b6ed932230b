use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use lib_common::configs::CadenceProfile;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Telemetry fan-out and resource command server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "TELEMETRY_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "TELEMETRY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "TELEMETRY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TELEMETRY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TELEMETRY_BOOTSTRAP_TOKEN", help = "Provisioned bootstrap credential.")]
    pub bootstrap_token: Option<String>,

    #[clap(long, env = "TELEMETRY_SESSION_SECRET", help = "HMAC secret used to verify session tokens.")]
    pub session_secret: Option<String>,

    #[clap(long, env = "TELEMETRY_CREDENTIALS_PATH", help = "JSON file with service tokens and subjects.")]
    pub credentials_path: Option<PathBuf>,

    #[clap(long, env = "TELEMETRY_DEPENDENCIES_PATH", help = "JSON file declaring resource dependents.")]
    pub dependencies_path: Option<PathBuf>,

    #[clap(long, env = "TELEMETRY_FAST_CADENCE_MS", help = "Cadence in milliseconds of fast metric classes.")]
    pub fast_cadence_ms: Option<u64>,

    #[clap(long, env = "TELEMETRY_MEDIUM_CADENCE_MS", help = "Cadence in milliseconds of medium metric classes.")]
    pub medium_cadence_ms: Option<u64>,

    #[clap(long, env = "TELEMETRY_SLOW_CADENCE_MS", help = "Cadence in milliseconds of slow metric classes.")]
    pub slow_cadence_ms: Option<u64>,

    #[clap(long, env = "TELEMETRY_CONFIRM_ATTEMPTS", help = "State confirmation attempts after a command.")]
    pub confirm_attempts: Option<u32>,

    #[clap(long, env = "TELEMETRY_CONFIRM_INTERVAL_MS", help = "Milliseconds between state confirmation attempts.")]
    pub confirm_interval_ms: Option<u64>,

    #[clap(long, env = "TELEMETRY_CASCADE_DELAY_SECS", help = "Seconds after acceptance before start/restart reaches dependents.")]
    pub cascade_delay_secs: Option<u64>,

    #[clap(long, env = "TELEMETRY_DOCKER_BIN", help = "docker executable.")]
    pub docker_bin: Option<String>,

    #[clap(long, env = "TELEMETRY_ZPOOL_BIN", help = "zpool executable.")]
    pub zpool_bin: Option<String>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            bootstrap_token: other.bootstrap_token.or(self.bootstrap_token),
            session_secret: other.session_secret.or(self.session_secret),
            credentials_path: other.credentials_path.or(self.credentials_path),
            dependencies_path: other.dependencies_path.or(self.dependencies_path),
            fast_cadence_ms: other.fast_cadence_ms.or(self.fast_cadence_ms),
            medium_cadence_ms: other.medium_cadence_ms.or(self.medium_cadence_ms),
            slow_cadence_ms: other.slow_cadence_ms.or(self.slow_cadence_ms),
            confirm_attempts: other.confirm_attempts.or(self.confirm_attempts),
            confirm_interval_ms: other.confirm_interval_ms.or(self.confirm_interval_ms),
            cascade_delay_secs: other.cascade_delay_secs.or(self.cascade_delay_secs),
            docker_bin: other.docker_bin.or(self.docker_bin),
            zpool_bin: other.zpool_bin.or(self.zpool_bin),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(9003),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            fast_cadence_ms: Some(1_000),
            medium_cadence_ms: Some(8_000),
            slow_cadence_ms: Some(2_000),
            confirm_attempts: Some(10),
            confirm_interval_ms: Some(200),
            cascade_delay_secs: Some(10),
            docker_bin: Some("docker".to_string()),
            zpool_bin: Some("zpool".to_string()),
            ..Default::default()
        }
    }
}

/// Fully resolved settings the server runs with.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub bootstrap_token: Option<String>,
    pub session_secret: String,
    pub credentials_path: Option<PathBuf>,
    pub dependencies_path: Option<PathBuf>,
    pub cadence: CadenceProfile,
    pub confirm_attempts: u32,
    pub confirm_interval: Duration,
    pub cascade_delay: Duration,
    pub docker_bin: String,
    pub zpool_bin: String,
    /// Certificate and key, only when both files exist.
    pub tls: Option<(PathBuf, PathBuf)>,
}

impl TryFrom<Config> for Settings {
    type Error = anyhow::Error;

    fn try_from(config: Config) -> Result<Self> {
        let defaults = Config::defaults();
        let config = defaults.merge(config);

        let Some(session_secret) = config.session_secret.filter(|s| !s.is_empty()) else {
            bail!("a session secret is required (--session-secret or TELEMETRY_SESSION_SECRET)");
        };

        let tls = match (config.tls_cert_path, config.tls_key_path) {
            (Some(cert), Some(key)) if cert.exists() && key.exists() => Some((cert, key)),
            _ => None,
        };

        Ok(Settings {
            port: config.port.unwrap_or(9003),
            log_dir: config.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: config.log_level.unwrap_or_else(|| "info".to_string()),
            bootstrap_token: config.bootstrap_token.filter(|t| !t.is_empty()),
            session_secret,
            credentials_path: config.credentials_path,
            dependencies_path: config.dependencies_path,
            cadence: CadenceProfile::from_millis(
                config.fast_cadence_ms.unwrap_or(1_000),
                config.medium_cadence_ms.unwrap_or(8_000),
                config.slow_cadence_ms.unwrap_or(2_000),
            ),
            confirm_attempts: config.confirm_attempts.unwrap_or(10),
            confirm_interval: Duration::from_millis(config.confirm_interval_ms.unwrap_or(200)),
            cascade_delay: Duration::from_secs(config.cascade_delay_secs.unwrap_or(10)),
            docker_bin: config.docker_bin.unwrap_or_else(|| "docker".to_string()),
            zpool_bin: config.zpool_bin.unwrap_or_else(|| "zpool".to_string()),
            tls,
        })
    }
}

/// Layers defaults < config file < environment / CLI.
pub fn load_config() -> Result<Settings> {
    let cli = Config::parse();
    resolve(cli)
}

pub fn resolve(cli: Config) -> Result<Settings> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_telemetry.conf"));

    let mut current_config = Config::default();

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)
            .with_context(|| format!("failed to read config file {}", config_file_path.display()))?;
        let file_config = serde_json::from_str::<Config>(&config_str)
            .with_context(|| format!("failed to parse config file {}", config_file_path.display()))?;
        current_config = current_config.merge(file_config);
    }

    current_config = current_config.merge(cli);

    // Default TLS paths if not already set
    if current_config.tls_cert_path.is_none() || current_config.tls_key_path.is_none() {
        if let Some(home_dir) = dirs::home_dir() {
            let letsencrypt_dir = home_dir.join(".letsencrypt");
            if current_config.tls_cert_path.is_none() {
                current_config.tls_cert_path = Some(letsencrypt_dir.join("fullchain.pem"));
            }
            if current_config.tls_key_path.is_none() {
                current_config.tls_key_path = Some(letsencrypt_dir.join("privkey.pem"));
            }
        }
    }

    Settings::try_from(current_config)
}
