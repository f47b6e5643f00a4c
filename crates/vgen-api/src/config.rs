//! API configuration.

use std::time::Duration;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Base URL the workflow subprocess uses to reach this server
    pub public_base_url: String,
    /// Shared secret for inbound webhook signatures; unchecked when unset
    pub webhook_secret: Option<String>,
    /// Idle interval between SSE keep-alive comments
    pub sse_keepalive: Duration,
    /// How often queue counters are pushed to global stream subscribers
    pub queue_status_interval: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            max_body_size: 1024 * 1024, // 1MB
            environment: "development".to_string(),
            public_base_url: "http://127.0.0.1:8000".to_string(),
            webhook_secret: None,
            sse_keepalive: Duration::from_secs(15),
            queue_status_interval: Duration::from_secs(5),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let port = std::env::var("API_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8000);

        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| vec!["*".to_string()]),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| format!("http://127.0.0.1:{}", port)),
            webhook_secret: std::env::var("WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            sse_keepalive: Duration::from_secs(
                std::env::var("SSE_KEEPALIVE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(15),
            ),
            queue_status_interval: Duration::from_secs(
                std::env::var("QUEUE_STATUS_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }

    /// Step event endpoint handed to each workflow subprocess.
    pub fn callback_url(&self) -> String {
        format!("{}/webhooks/step-update", self.public_base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_url() {
        let config = ApiConfig {
            public_base_url: "https://vgen.example.com".to_string(),
            ..ApiConfig::default()
        };
        assert_eq!(config.callback_url(), "https://vgen.example.com/webhooks/step-update");
    }
}
