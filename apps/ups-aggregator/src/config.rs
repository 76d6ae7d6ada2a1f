use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/ups-aggregator/config.json";

const DEFAULT_CLICKHOUSE_URL: &str = "http://127.0.0.1:8123";
const DEFAULT_CLICKHOUSE_DATABASE: &str = "ups_aggregator";
const DEFAULT_CLICKHOUSE_USERNAME: &str = "default";
const DEFAULT_CLICKHOUSE_TABLE: &str = "power_readings";
const DEFAULT_POWER_PANEL_URL: &str = "http://10.0.0.250:3052/management";
// Credential hash in the form the PowerPanel web UI submits on login.
const DEFAULT_POWER_PANEL_HASH: &str = "2E04DF62D2DD379F7F95BE8EC627C7CB";
const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 30;
const DEFAULT_TOKEN_VALIDITY_SECONDS: u64 = 30 * 60;
const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;
const MAX_POLL_INTERVAL_SECONDS: u64 = 24 * 60 * 60;
const MAX_TOKEN_VALIDITY_SECONDS: u64 = 7 * 24 * 60 * 60;
const MAX_HTTP_TIMEOUT_SECONDS: u64 = 10 * 60;

fn setup_config_path() -> PathBuf {
    if let Ok(path) = env::var("UPS_CH_SETUP_CONFIG_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    PathBuf::from(DEFAULT_SETUP_CONFIG_PATH)
}

/// Values from the setup file. Each one applies only when its environment
/// variable is unset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupConfigOverrides {
    #[serde(default)]
    clickhouse_url: Option<String>,
    #[serde(default)]
    clickhouse_database: Option<String>,
    #[serde(default)]
    clickhouse_username: Option<String>,
    #[serde(default)]
    clickhouse_password: Option<String>,
    #[serde(default)]
    clickhouse_table: Option<String>,
    #[serde(default)]
    power_panel_url: Option<String>,
    #[serde(default)]
    power_panel_hashed_username: Option<String>,
    #[serde(default)]
    power_panel_hashed_password: Option<String>,
    #[serde(default)]
    poll_interval_seconds: Option<u64>,
    #[serde(default)]
    token_validity_seconds: Option<u64>,
    #[serde(default)]
    http_timeout_seconds: Option<u64>,
}

pub fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "ups-aggregator failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    let mut bytes = contents.into_bytes();
    match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "ups-aggregator failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub clickhouse_url: String,
    pub clickhouse_database: String,
    pub clickhouse_username: String,
    pub clickhouse_password: String,
    pub clickhouse_table: String,
    pub power_panel_url: String,
    pub power_panel_hashed_username: String,
    pub power_panel_hashed_password: String,
    pub poll_interval_seconds: u64,
    pub token_validity_seconds: u64,
    pub http_timeout_seconds: u64,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let setup_overrides = load_setup_config_overrides(&setup_config_path());
        Self::from_lookup(|key| env::var(key).ok(), setup_overrides.as_ref())
    }

    pub fn from_lookup<F>(lookup: F, overrides: Option<&SetupConfigOverrides>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let ov = overrides.cloned().unwrap_or_default();

        let config = Self {
            clickhouse_url: pick(
                var("UPS_CH_CLICKHOUSE_URL"),
                ov.clickhouse_url,
                DEFAULT_CLICKHOUSE_URL,
            ),
            clickhouse_database: pick(
                var("UPS_CH_CLICKHOUSE_DATABASE"),
                ov.clickhouse_database,
                DEFAULT_CLICKHOUSE_DATABASE,
            ),
            clickhouse_username: pick(
                var("UPS_CH_CLICKHOUSE_USERNAME"),
                ov.clickhouse_username,
                DEFAULT_CLICKHOUSE_USERNAME,
            ),
            clickhouse_password: pick(
                var("UPS_CH_CLICKHOUSE_PASSWORD"),
                ov.clickhouse_password,
                "",
            ),
            clickhouse_table: pick(
                var("UPS_CH_CLICKHOUSE_TABLE"),
                ov.clickhouse_table,
                DEFAULT_CLICKHOUSE_TABLE,
            ),
            power_panel_url: pick(
                var("UPS_CH_POWER_PANEL_URL"),
                ov.power_panel_url,
                DEFAULT_POWER_PANEL_URL,
            ),
            power_panel_hashed_username: pick(
                var("UPS_CH_POWER_PANEL_HASHED_USERNAME"),
                ov.power_panel_hashed_username,
                DEFAULT_POWER_PANEL_HASH,
            ),
            power_panel_hashed_password: pick(
                var("UPS_CH_POWER_PANEL_HASHED_PASSWORD"),
                ov.power_panel_hashed_password,
                DEFAULT_POWER_PANEL_HASH,
            ),
            poll_interval_seconds: pick_seconds(
                "UPS_CH_POLL_INTERVAL_SECONDS",
                var("UPS_CH_POLL_INTERVAL_SECONDS"),
                ov.poll_interval_seconds,
                DEFAULT_POLL_INTERVAL_SECONDS,
                MAX_POLL_INTERVAL_SECONDS,
            )?,
            token_validity_seconds: pick_seconds(
                "UPS_CH_TOKEN_VALIDITY_SECONDS",
                var("UPS_CH_TOKEN_VALIDITY_SECONDS"),
                ov.token_validity_seconds,
                DEFAULT_TOKEN_VALIDITY_SECONDS,
                MAX_TOKEN_VALIDITY_SECONDS,
            )?,
            http_timeout_seconds: pick_seconds(
                "UPS_CH_HTTP_TIMEOUT_SECONDS",
                var("UPS_CH_HTTP_TIMEOUT_SECONDS"),
                ov.http_timeout_seconds,
                DEFAULT_HTTP_TIMEOUT_SECONDS,
                MAX_HTTP_TIMEOUT_SECONDS,
            )?,
            otlp_endpoint: var("OTEL_EXPORTER_OTLP_ENDPOINT"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        validate_http_url("UPS_CH_CLICKHOUSE_URL", &self.clickhouse_url)?;
        validate_http_url("UPS_CH_POWER_PANEL_URL", &self.power_panel_url)?;
        validate_identifier("UPS_CH_CLICKHOUSE_DATABASE", &self.clickhouse_database)?;
        validate_identifier("UPS_CH_CLICKHOUSE_TABLE", &self.clickhouse_table)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn token_validity(&self) -> Duration {
        Duration::from_secs(self.token_validity_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

fn pick(env_value: Option<String>, override_value: Option<String>, default: &str) -> String {
    env_value
        .or_else(|| {
            override_value
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
        .unwrap_or_else(|| default.to_string())
}

fn pick_seconds(
    key: &str,
    env_value: Option<String>,
    override_value: Option<u64>,
    default: u64,
    max: u64,
) -> Result<u64> {
    let value = match env_value {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{key} must be a whole number of seconds (got {raw:?})"))?,
        None => override_value.unwrap_or(default),
    };
    if value == 0 {
        bail!("{key} must be greater than zero");
    }
    if value > max {
        bail!("{key} must be at most {max} seconds (got {value})");
    }
    Ok(value)
}

fn validate_http_url(key: &str, value: &str) -> Result<()> {
    let url = Url::parse(value).with_context(|| format!("{key} is not a valid URL: {value:?}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => bail!("{key} must use http or https (got {other:?})"),
    }
}

fn validate_identifier(key: &str, value: &str) -> Result<()> {
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !value.starts_with(|c: char| c.is_ascii_digit());
    if !valid {
        bail!("{key} must contain only letters, digits and underscores (got {value:?})");
    }
    Ok(())
}
