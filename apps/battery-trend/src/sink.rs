use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use url::Url;

pub trait EstimateSink {
    fn set_value(&self, value: f64) -> Result<()>;
}

#[derive(Debug, Serialize, PartialEq)]
struct SetValueRequest<'a> {
    entity_id: &'a str,
    value: f64,
}

/// Writes the estimate into a Home Assistant `input_number` via the REST API.
pub struct HomeAssistantSink {
    client: HttpClient,
    endpoint: Url,
    token: String,
    entity_id: String,
}

impl HomeAssistantSink {
    pub fn new(base_url: &Url, token: String, entity_id: String, timeout: Duration) -> Result<Self> {
        let endpoint = service_url(base_url)?;
        let client = HttpClient::builder()
            .user_agent(concat!("battery-trend/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build Home Assistant HTTP client")?;
        Ok(Self {
            client,
            endpoint,
            token,
            entity_id,
        })
    }
}

impl EstimateSink for HomeAssistantSink {
    fn set_value(&self, value: f64) -> Result<()> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.token)
            .json(&SetValueRequest {
                entity_id: &self.entity_id,
                value,
            })
            .send()
            .with_context(|| format!("POST {} failed", self.endpoint))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().unwrap_or_default();
        check_status(status, &self.entity_id, &body)
    }
}

fn check_status(status: StatusCode, entity_id: &str, body: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    Err(anyhow!(
        "Home Assistant returned {status} setting {entity_id}: {}",
        body.trim()
    ))
}

/// Logs the value instead of writing it.
#[derive(Debug, Default)]
pub struct DryRunSink;

impl EstimateSink for DryRunSink {
    fn set_value(&self, value: f64) -> Result<()> {
        tracing::info!(value, "dry run: not writing estimate");
        Ok(())
    }
}

fn service_url(base_url: &Url) -> Result<Url> {
    let mut base = base_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("api/services/input_number/set_value")
        .with_context(|| format!("invalid Home Assistant URL {base_url}"))
}
