use async_trait::async_trait;
use fleetmon_common::types::MetricPoint;
use std::time::Duration;

use crate::error::{Result, SinkError};
use crate::line_protocol::encode_batch;
use crate::MetricsSink;

/// Longest response body kept in a [`SinkError::Rejected`].
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct InfluxSettings {
    /// Base URL, e.g. `http://127.0.0.1:8086`.
    pub url: String,
    pub database: String,
    pub retention_policy: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

/// InfluxDB 1.x HTTP writer.
pub struct InfluxSink {
    client: reqwest::Client,
    settings: InfluxSettings,
}

impl InfluxSink {
    pub fn new(settings: InfluxSettings) -> Result<Self> {
        if settings.url.trim().is_empty() {
            return Err(SinkError::InvalidConfig("sink url is empty".to_string()));
        }
        if settings.database.trim().is_empty() {
            return Err(SinkError::InvalidConfig("sink database is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { client, settings })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.settings.url.trim_end_matches('/'))
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.settings.username {
            Some(user) => req.basic_auth(user, self.settings.password.as_deref()),
            None => req,
        }
    }
}

#[async_trait]
impl MetricsSink for InfluxSink {
    async fn write_points(&self, points: &[MetricPoint]) -> Result<()> {
        let body = encode_batch(points);
        if body.is_empty() {
            return Ok(());
        }

        let req = self
            .client
            .post(self.endpoint("write"))
            .query(&[
                ("db", self.settings.database.as_str()),
                ("rp", self.settings.retention_policy.as_str()),
                ("precision", "ns"),
            ])
            .body(body);
        let resp = self.with_auth(req).send().await?;
        check_status(resp).await
    }

    async fn ping(&self) -> Result<()> {
        let resp = self
            .with_auth(self.client.get(self.endpoint("ping")))
            .send()
            .await?;
        check_status(resp).await
    }
}

async fn check_status(resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = match resp.text().await {
        Ok(text) => truncate(&text, MAX_ERROR_BODY),
        Err(e) => format!("[Failed to read response body: {e}]"),
    };
    Err(SinkError::Rejected {
        status: status.as_u16(),
        body,
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
