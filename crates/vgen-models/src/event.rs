//! Inbound webhook payloads.
//!
//! Two shapes share one ingestion path:
//! - step events from the generation subprocess (`job_id` + `step_number`)
//! - render events from the external render service (`render_id` + `status`)

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Whether a step started or finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Started,
    Completed,
}

impl StepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Started => "started",
            StepState::Completed => "completed",
        }
    }
}

/// Progress report from the generation subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepEvent {
    pub job_id: JobId,
    /// Per-job, strictly increasing
    pub sequence: u64,
    pub step_number: u32,
    pub step_name: String,
    pub status: StepState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Present on the final event once the composition was submitted for rendering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_id: Option<String>,
}

impl StepEvent {
    /// Render id from the top-level field, or from `details.render_id`.
    pub fn reported_render_id(&self) -> Option<&str> {
        self.render_id
            .as_deref()
            .or_else(|| {
                self.details
                    .as_ref()
                    .and_then(|d| d.get("render_id"))
                    .and_then(|v| v.as_str())
            })
            .filter(|id| !id.trim().is_empty())
    }

    /// One-line rendering of `details` for the job log.
    pub fn details_summary(&self) -> Option<String> {
        match self.details.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.is_empty() => None,
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(map) => map
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .or_else(|| Some(serde_json::Value::Object(map.clone()).to_string())),
            other => Some(other.to_string()),
        }
    }
}

/// Status reported by the render service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RenderStatus {
    #[serde(alias = "pending")]
    Queued,
    Rendering,
    #[serde(alias = "done", alias = "succeeded")]
    Completed,
    #[serde(alias = "error")]
    Failed,
}

impl RenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStatus::Queued => "queued",
            RenderStatus::Rendering => "rendering",
            RenderStatus::Completed => "completed",
            RenderStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RenderStatus::Completed | RenderStatus::Failed)
    }

    /// Map the render service's vocabulary onto ours. Unknown values are
    /// treated as still in progress.
    pub fn from_service(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "done" | "completed" | "complete" | "succeeded" | "success" => RenderStatus::Completed,
            "failed" | "error" | "errored" | "cancelled" => RenderStatus::Failed,
            "queued" | "pending" | "waiting" => RenderStatus::Queued,
            _ => RenderStatus::Rendering,
        }
    }
}

/// Render result pushed by (or polled from) the render service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenderEvent {
    pub render_id: String,
    pub status: RenderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RenderEvent {
    pub fn completed(render_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            render_id: render_id.into(),
            status: RenderStatus::Completed,
            url: Some(url.into()),
            error: None,
        }
    }

    pub fn failed(render_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            render_id: render_id.into(),
            status: RenderStatus::Failed,
            url: None,
            error: Some(error.into()),
        }
    }
}

/// Either inbound payload, distinguished by its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum WebhookPayload {
    Step(StepEvent),
    Render(RenderEvent),
}

impl WebhookPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            WebhookPayload::Step(_) => "step_update",
            WebhookPayload::Render(_) => "render_completion",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_shapes_are_distinguished() {
        let step: WebhookPayload = serde_json::from_value(json!({
            "job_id": "job-1",
            "sequence": 4,
            "step_number": 2,
            "step_name": "Writing script",
            "status": "completed",
            "timestamp": "2026-01-01T00:00:00Z",
            "details": {"message": "3 scenes"}
        }))
        .unwrap();
        assert_eq!(step.kind(), "step_update");

        let render: WebhookPayload = serde_json::from_value(json!({
            "render_id": "r-9",
            "status": "completed",
            "url": "https://cdn/v.mp4"
        }))
        .unwrap();
        assert!(matches!(render, WebhookPayload::Render(ref r) if r.status == RenderStatus::Completed));
    }

    #[test]
    fn test_reported_render_id_from_details() {
        let event: StepEvent = serde_json::from_value(json!({
            "job_id": "job-1",
            "sequence": 9,
            "step_number": 6,
            "step_name": "Submit render",
            "status": "completed",
            "details": {"render_id": "r-42"}
        }))
        .unwrap();
        assert_eq!(event.reported_render_id(), Some("r-42"));
    }

    #[test]
    fn test_blank_render_id_is_ignored() {
        let event: StepEvent = serde_json::from_value(json!({
            "job_id": "job-1",
            "sequence": 1,
            "step_number": 1,
            "step_name": "x",
            "status": "started",
            "render_id": "  "
        }))
        .unwrap();
        assert_eq!(event.reported_render_id(), None);
    }

    #[test]
    fn test_render_status_vocabulary() {
        assert_eq!(RenderStatus::from_service("done"), RenderStatus::Completed);
        assert_eq!(RenderStatus::from_service("ERROR"), RenderStatus::Failed);
        assert_eq!(RenderStatus::from_service("pending"), RenderStatus::Queued);
        assert_eq!(RenderStatus::from_service("transcoding"), RenderStatus::Rendering);
    }
}
