use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::InfluxConfig;

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Field values carry their own type; tags are always strings.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Float(f64),
    Text(String),
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// One named, tagged set of field values destined for the sink.
#[derive(Debug, Clone)]
pub struct Point {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
    timestamp: Option<DateTime<Utc>>,
}

impl Point {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp: None,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Line-protocol rendering (ms precision). `None` when the point carries
    /// no fields; such points must never reach the wire.
    pub fn to_line_protocol(&self) -> Option<String> {
        if self.fields.is_empty() {
            return None;
        }
        let mut line = escape_measurement(&self.measurement);
        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }
        line.push(' ');
        for (idx, (key, value)) in self.fields.iter().enumerate() {
            if idx > 0 {
                line.push(',');
            }
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&encode_field_value(value));
        }
        if let Some(timestamp) = self.timestamp {
            line.push(' ');
            line.push_str(&timestamp.timestamp_millis().to_string());
        }
        Some(line)
    }
}

fn escape_measurement(value: &str) -> String {
    value.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_key(value: &str) -> String {
    value
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

fn encode_field_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Bool(v) => v.to_string(),
        FieldValue::Float(v) => v.to_string(),
        FieldValue::Text(v) => format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")),
    }
}

/// InfluxDB v2 write/health adapter. Writes are best-effort: failures are
/// logged and swallowed so metric loss never destabilizes a poll cycle.
pub struct InfluxWriter {
    http: reqwest::Client,
    config: InfluxConfig,
    dry_run: bool,
}

impl InfluxWriter {
    pub fn new(http: reqwest::Client, config: InfluxConfig, dry_run: bool) -> Self {
        Self {
            http,
            config,
            dry_run,
        }
    }

    pub async fn write(&self, point: Point) {
        let Some(line) = point.to_line_protocol() else {
            tracing::debug!(measurement = point.measurement(), "skipping empty point");
            return;
        };
        if self.dry_run {
            tracing::info!(line = %line, "[dry run] would write to InfluxDB");
            return;
        }
        if let Err(err) = self.post_line(&line).await {
            tracing::warn!(
                measurement = point.measurement(),
                "failed to write to InfluxDB: {err:#}"
            );
        }
    }

    async fn post_line(&self, line: &str) -> Result<()> {
        let url = format!("{}/api/v2/write", self.config.url);
        let resp = self
            .http
            .post(&url)
            .query(&[
                ("org", self.config.org.as_str()),
                ("bucket", self.config.bucket.as_str()),
                ("precision", "ms"),
            ])
            .header("Authorization", format!("Token {}", self.config.token))
            .body(line.to_string())
            .send()
            .await
            .context("influx write request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("influx write returned {status}: {body}");
        }
        Ok(())
    }

    /// Sink reachability for the health endpoint. Dry-run always reports
    /// healthy since nothing is written.
    pub async fn check_health(&self) -> bool {
        if self.dry_run {
            return true;
        }
        let url = format!("{}/health", self.config.url);
        match self
            .http
            .get(url)
            .timeout(HEALTH_PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
