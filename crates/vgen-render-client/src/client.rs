//! HTTP client for `GET {base}/renders/{render_id}`.

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, info_span, warn, Instrument};
use vgen_models::{RenderEvent, RenderStatus};

use crate::config::RenderClientConfig;
use crate::error::{RenderError, RenderResult};

/// Something the render monitor can ask for a render's status.
#[async_trait]
pub trait RenderStatusSource: Send + Sync {
    async fn fetch_status(&self, render_id: &str) -> RenderResult<RenderEvent>;
}

/// Raw status response from the render service.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Render service client.
#[derive(Clone)]
pub struct RenderClient {
    http: reqwest::Client,
    config: RenderClientConfig,
}

impl RenderClient {
    pub fn new(config: RenderClientConfig) -> RenderResult<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> RenderResult<Self> {
        Self::new(RenderClientConfig::from_env())
    }

    pub fn config(&self) -> &RenderClientConfig {
        &self.config
    }

    async fn fetch_once(&self, render_id: &str) -> RenderResult<RenderEvent> {
        let url = format!("{}/renders/{}", self.config.base_url, render_id);
        let mut request = self.http.get(&url);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RenderError::NotFound(render_id.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RenderError::Http {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| RenderError::invalid_response(e.to_string()))?;

        Ok(RenderEvent {
            render_id: render_id.to_string(),
            status: RenderStatus::from_service(&body.status),
            url: body.url.filter(|u| !u.is_empty()),
            error: body.error,
        })
    }

    /// Execute with retry on network errors, 429 and 5xx.
    async fn with_retry(&self, render_id: &str) -> RenderResult<RenderEvent> {
        let mut attempt = 0u32;
        loop {
            let span = info_span!("render_status", render_id = %render_id, attempt = attempt + 1);
            match self.fetch_once(render_id).instrument(span).await {
                Ok(event) => return Ok(event),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.delay_for_retry(attempt);
                    warn!(
                        render_id = %render_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Render status request failed, retrying: {}",
                        e
                    );
                    counter!("vgen_render_client_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl RenderStatusSource for RenderClient {
    async fn fetch_status(&self, render_id: &str) -> RenderResult<RenderEvent> {
        let event = self.with_retry(render_id).await?;
        debug!(render_id = %render_id, status = event.status.as_str(), "Fetched render status");
        Ok(event)
    }
}
