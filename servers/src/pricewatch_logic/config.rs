use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use lib_common::catalog::{DEFAULT_API_URI, DEFAULT_ITEM_URL_BASE};
use lib_common::chat::DEFAULT_TELEGRAM_API_URL;
use lib_common::core::{PipelineConfig, RouterConfig};

/// Config file read when `--config-path` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "pricewatch.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[clap(about = "Outlet price alert bot for Telegram", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "PRICEWATCH_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "PRICEWATCH_API_URI", help = "Outlet search endpoint to poll.")]
    pub api_uri: Option<String>,

    #[clap(long, env = "PRICEWATCH_ITEM_URL_BASE", help = "Prefix of the product page links in alerts.")]
    pub item_url_base: Option<String>,

    #[clap(long, env = "PRICEWATCH_POLL_INTERVAL_SECONDS", help = "Seconds between catalog fetches.")]
    pub poll_interval_seconds: Option<u64>,

    #[clap(long, env = "PRICEWATCH_UPDATES_INTERVAL_SECONDS", help = "Seconds between Telegram update polls.")]
    pub updates_interval_seconds: Option<u64>,

    #[clap(long, env = "PRICEWATCH_RETRY_BACKOFF_SECONDS", help = "Seconds to wait before restarting a failed poll or redelivering a message.")]
    pub retry_backoff_seconds: Option<u64>,

    #[clap(long, env = "PRICEWATCH_FLUSH_INTERVAL_SECONDS", help = "Seconds between state file writes.")]
    pub flush_interval_seconds: Option<u64>,

    #[clap(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true, help = "Telegram bot token.")]
    pub telegram_bot_token: Option<String>,

    #[clap(long, env = "PRICEWATCH_TELEGRAM_API_URL", help = "Telegram Bot API endpoint.")]
    pub telegram_api_url: Option<String>,

    #[clap(long, env = "PRICEWATCH_STATE_DIR", help = "Directory for the subscription and processed-record files.")]
    pub state_dir: Option<PathBuf>,

    #[clap(long, env = "PRICEWATCH_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "PRICEWATCH_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            api_uri: other.api_uri.or(self.api_uri),
            item_url_base: other.item_url_base.or(self.item_url_base),
            poll_interval_seconds: other.poll_interval_seconds.or(self.poll_interval_seconds),
            updates_interval_seconds: other.updates_interval_seconds.or(self.updates_interval_seconds),
            retry_backoff_seconds: other.retry_backoff_seconds.or(self.retry_backoff_seconds),
            flush_interval_seconds: other.flush_interval_seconds.or(self.flush_interval_seconds),
            telegram_bot_token: other.telegram_bot_token.or(self.telegram_bot_token),
            telegram_api_url: other.telegram_api_url.or(self.telegram_api_url),
            state_dir: other.state_dir.or(self.state_dir),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
        }
    }

    fn defaults() -> Config {
        Config {
            config_path: None,
            api_uri: Some(DEFAULT_API_URI.to_string()),
            item_url_base: Some(DEFAULT_ITEM_URL_BASE.to_string()),
            poll_interval_seconds: Some(10),
            updates_interval_seconds: Some(10),
            retry_backoff_seconds: Some(10),
            flush_interval_seconds: Some(10),
            telegram_bot_token: None,
            telegram_api_url: Some(DEFAULT_TELEGRAM_API_URL.to_string()),
            state_dir: Some(dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("pricewatch")),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid config file {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("missing required option '{0}'")]
    Missing(&'static str),
    #[error("'{0}' must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("'{field}' is not an absolute URL: {source}")]
    InvalidUrl { field: &'static str, source: url::ParseError },
}

/// Validated settings the server runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub api_uri: String,
    pub item_url_base: String,
    pub poll_interval: Duration,
    pub updates_interval: Duration,
    pub retry_backoff: Duration,
    pub flush_interval: Duration,
    pub telegram_bot_token: String,
    pub telegram_api_url: String,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
    /// The config file that was merged in, if one was found.
    pub config_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            poll_interval: self.poll_interval,
            flush_interval: self.flush_interval,
            retry_backoff: self.retry_backoff,
            router: RouterConfig::new(self.item_url_base.clone()),
        }
    }
}

impl TryFrom<Config> for AppConfig {
    type Error = ConfigError;

    fn try_from(config: Config) -> Result<Self, Self::Error> {
        let telegram_bot_token = config
            .telegram_bot_token
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::Missing("telegram_bot_token"))?;

        Ok(AppConfig {
            api_uri: absolute_url("api_uri", config.api_uri)?,
            item_url_base: absolute_url("item_url_base", config.item_url_base)?,
            poll_interval: positive_seconds("poll_interval_seconds", config.poll_interval_seconds)?,
            updates_interval: positive_seconds("updates_interval_seconds", config.updates_interval_seconds)?,
            retry_backoff: positive_seconds("retry_backoff_seconds", config.retry_backoff_seconds)?,
            flush_interval: positive_seconds("flush_interval_seconds", config.flush_interval_seconds)?,
            telegram_bot_token,
            telegram_api_url: absolute_url("telegram_api_url", config.telegram_api_url)?,
            state_dir: config.state_dir.ok_or(ConfigError::Missing("state_dir"))?,
            log_dir: config.log_dir.ok_or(ConfigError::Missing("log_dir"))?,
            log_level: config.log_level.ok_or(ConfigError::Missing("log_level"))?,
            config_file: config.config_path,
        })
    }
}

fn absolute_url(field: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    let value = value.ok_or(ConfigError::Missing(field))?;
    Url::parse(&value).map_err(|source| ConfigError::InvalidUrl { field, source })?;
    Ok(value)
}

fn positive_seconds(field: &'static str, value: Option<u64>) -> Result<Duration, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::ZeroInterval(field)),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Err(ConfigError::Missing(field)),
    }
}

/// Reads the JSON config file. A missing file is not an error; a present but
/// unreadable or malformed one is.
fn load_file(path: &Path) -> Result<Option<Config>, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(ConfigError::Read { path: path.to_path_buf(), source }),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

/// Layers defaults, the config file and the CLI/env values (highest wins).
pub fn resolve(cli_args: Config) -> Result<AppConfig, ConfigError> {
    // 1. Load defaults
    let mut merged = Config::defaults();

    // 2. Load from config file
    let path = cli_args.config_path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let file_config = load_file(&path)?;
    let found = file_config.is_some();
    if let Some(file_config) = file_config {
        merged = merged.merge(file_config);
    }

    // 3. Override with CLI arguments and environment variables
    merged = merged.merge(cli_args);
    merged.config_path = found.then_some(path);

    AppConfig::try_from(merged)
}

pub fn load_config() -> anyhow::Result<AppConfig> {
    Ok(resolve(Config::parse())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Config {
        let mut argv = vec!["server_pricewatch"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_apply_when_only_the_token_is_given() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.conf");
        let config = resolve(Config {
            config_path: Some(missing),
            telegram_bot_token: Some("123:abc".into()),
            ..Config::default()
        })
        .unwrap();

        assert_eq!(config.api_uri, DEFAULT_API_URI);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.flush_interval, Duration::from_secs(10));
        assert_eq!(config.telegram_api_url, DEFAULT_TELEGRAM_API_URL);
        assert!(config.state_dir.ends_with("pricewatch"));
        assert_eq!(config.config_file, None);
    }

    #[test]
    fn cli_overrides_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pricewatch.conf");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, r#"{{"pollIntervalSeconds": 30, "flushIntervalSeconds": 5, "telegramBotToken": "from-file"}}"#).unwrap();

        let config = resolve(Config {
            config_path: Some(path.clone()),
            poll_interval_seconds: Some(60),
            ..Config::default()
        })
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.flush_interval, Duration::from_secs(5));
        assert_eq!(config.updates_interval, Duration::from_secs(10));
        assert_eq!(config.telegram_bot_token, "from-file");
        assert_eq!(config.config_file, Some(path));
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pricewatch.conf");
        fs::write(&path, "{ not json").unwrap();

        let err = resolve(Config {
            config_path: Some(path),
            telegram_bot_token: Some("t".into()),
            ..Config::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let base = Config {
            telegram_bot_token: Some("t".into()),
            ..Config::defaults()
        };

        let blank_token = Config { telegram_bot_token: Some("  ".into()), ..base.clone() };
        assert!(matches!(AppConfig::try_from(blank_token), Err(ConfigError::Missing("telegram_bot_token"))));

        let zero = Config { poll_interval_seconds: Some(0), ..base.clone() };
        assert!(matches!(AppConfig::try_from(zero), Err(ConfigError::ZeroInterval("poll_interval_seconds"))));

        let relative = Config { item_url_base: Some("/produkt/".into()), ..base.clone() };
        assert!(matches!(AppConfig::try_from(relative), Err(ConfigError::InvalidUrl { field: "item_url_base", .. })));

        assert!(AppConfig::try_from(base).is_ok());
    }

    #[test]
    fn command_line_flags_parse() {
        let config = cli(&["--poll-interval-seconds", "15", "--log-level", "debug", "--state-dir", "/var/lib/pricewatch"]);
        assert_eq!(config.poll_interval_seconds, Some(15));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.state_dir, Some(PathBuf::from("/var/lib/pricewatch")));
    }

    #[test]
    fn pipeline_settings_follow_the_config() {
        let config = AppConfig::try_from(Config {
            telegram_bot_token: Some("t".into()),
            retry_backoff_seconds: Some(3),
            ..Config::defaults()
        })
        .unwrap();
        let pipeline = config.pipeline();
        assert_eq!(pipeline.retry_backoff, Duration::from_secs(3));
        assert_eq!(pipeline.router, RouterConfig::new(DEFAULT_ITEM_URL_BASE.to_string()));
    }
}
