use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use url::Url;

const DEFAULT_WEATHER_INTERVAL_MS: u64 = 3_600_000;
const DEFAULT_ROOMS_INTERVAL_MS: u64 = 600_000;
const DEFAULT_HEAT_PUMP_INTERVAL_MS: u64 = 600_000;
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TOKEN_FILE: &str = "data/token.json";

const REQUIRED_ENV: &[&str] = &[
    "TADO_CLIENT_ID",
    "INFLUX_URL",
    "INFLUX_TOKEN",
    "INFLUX_ORG",
    "INFLUX_BUCKET",
];

/// Per-category poll intervals in milliseconds.
#[derive(Debug, Clone)]
pub struct PollIntervals {
    pub weather_ms: u64,
    pub rooms_ms: u64,
    pub heat_pump_ms: u64,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            weather_ms: DEFAULT_WEATHER_INTERVAL_MS,
            rooms_ms: DEFAULT_ROOMS_INTERVAL_MS,
            heat_pump_ms: DEFAULT_HEAT_PUMP_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub client_id: String,
    pub port: u16,
    pub dry_run: bool,
    pub token_file: PathBuf,
    pub static_root: Option<PathBuf>,
    pub intervals: PollIntervals,
    pub influx: InfluxConfig,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let missing: Vec<&str> = REQUIRED_ENV
            .iter()
            .copied()
            .filter(|key| env_optional(key).is_none())
            .collect();
        if !missing.is_empty() {
            anyhow::bail!(
                "missing required environment variables: {}",
                missing.join(", ")
            );
        }

        let client_id = env_required("TADO_CLIENT_ID")?;

        let influx_url = env_required("INFLUX_URL")?;
        Url::parse(&influx_url).context("invalid INFLUX_URL")?;
        let influx = InfluxConfig {
            url: influx_url.trim_end_matches('/').to_string(),
            token: env_required("INFLUX_TOKEN")?,
            org: env_required("INFLUX_ORG")?,
            bucket: env_required("INFLUX_BUCKET")?,
        };

        let intervals = PollIntervals {
            weather_ms: env_u64("TADO_POLL_INTERVAL_WEATHER", DEFAULT_WEATHER_INTERVAL_MS)?,
            rooms_ms: env_u64("TADO_POLL_INTERVAL_ROOMS", DEFAULT_ROOMS_INTERVAL_MS)?,
            heat_pump_ms: env_u64("TADO_POLL_INTERVAL_HEATPUMP", DEFAULT_HEAT_PUMP_INTERVAL_MS)?,
        };

        let port = match env_optional("TADO_LOGIN_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .context("invalid TADO_LOGIN_PORT")?,
            None => DEFAULT_PORT,
        };

        let token_file = PathBuf::from(
            env_optional("TADO_TOKEN_FILE").unwrap_or_else(|| DEFAULT_TOKEN_FILE.to_string()),
        );

        let static_root = env_optional("TADO_STATIC_ROOT").map(PathBuf::from);

        Ok(Self {
            client_id,
            port,
            dry_run: env_bool("TADO_DRY_RUN"),
            token_file,
            static_root,
            intervals,
            influx,
        })
    }
}

fn env_required(key: &str) -> Result<String> {
    env_optional(key).ok_or_else(|| anyhow!("missing env var {key}"))
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env_optional(key) {
        Some(value) => value
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        None => Ok(default),
    }
}

fn env_bool(key: &str) -> bool {
    env_optional(key).map(|v| v == "true").unwrap_or(false)
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
