//! Video renderer backed by an HTTP transcoding service.
//!
//! The renderer only submits the job. The service writes an HLS playlist
//! next to the asset's location and later calls back, at which point
//! [`super::complete_delegated`] records the final status.
//!
//! Agent params:
//! - `endpoint`: job submission URL (required)
//! - `apiKey`: sent as `Zencoder-Api-Key`
//! - `notificationUrl`: fallback when the template has no notification URL

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::assets::attrs;
use crate::error::ErrorCode;

use super::{Outcome, RenderContext, RenderJob, Renderer};

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct TranscodeRequest {
    input: String,
    outputs: Vec<TranscodeOutput>,
    notifications: Vec<Notification>,
    pass_through: String,
}

#[derive(Debug, Serialize)]
struct TranscodeOutput {
    label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_bitrate: Option<u32>,
    base_url: String,
    filename: String,
    #[serde(rename = "type")]
    output_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

#[derive(Debug, Serialize)]
struct Notification {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct TranscodeResponse {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    outputs: Vec<TranscodeOutputRef>,
}

#[derive(Debug, Deserialize)]
struct TranscodeOutputRef {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

pub struct VideoRenderer {
    ctx: RenderContext,
    client: Client,
}

impl VideoRenderer {
    pub fn new(ctx: RenderContext) -> Self {
        Self {
            ctx,
            client: Client::builder()
                .timeout(SUBMIT_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

/// Two HLS renditions plus the master playlist `{id}.m3u8`.
fn build_request(input: &str, location: &str, id: &str, notification_url: &str) -> TranscodeRequest {
    let rendition = |label: &str, size: &str, bitrate: u32| TranscodeOutput {
        label: label.to_string(),
        size: Some(size.to_string()),
        video_bitrate: Some(bitrate),
        base_url: location.to_string(),
        filename: format!("{}_{}.m3u8", id, label),
        output_type: "segmented".to_string(),
        format: Some("ts".to_string()),
    };

    let mut notify = notification_url.to_string();
    if !notify.ends_with('/') {
        notify.push('/');
    }
    notify.push_str(id);

    TranscodeRequest {
        input: input.to_string(),
        outputs: vec![
            rendition("hls_600", "640x360", 600),
            rendition("hls_1200", "1280x720", 1200),
            TranscodeOutput {
                label: "playlist".to_string(),
                size: None,
                video_bitrate: None,
                base_url: location.to_string(),
                filename: format!("{}.m3u8", id),
                output_type: "playlist".to_string(),
                format: None,
            },
        ],
        notifications: vec![Notification { url: notify }],
        pass_through: id.to_string(),
    }
}

#[async_trait]
impl Renderer for VideoRenderer {
    async fn render(&self, job: &mut RenderJob) -> Result<Outcome, ErrorCode> {
        let Some(endpoint) = self.ctx.param("endpoint") else {
            warn!(id = %job.id(), "No transcoding endpoint configured");
            return Err(ErrorCode::NotImplemented);
        };

        let source = self.ctx.load_source(&job.asset).await?;
        let template = self.ctx.load_template(&job.asset).await?;
        let input = source
            .source_urls()
            .first()
            .ok_or(ErrorCode::NoDownloadUrlsWork)?;
        let notification_url = template
            .notification_url()
            .or_else(|| self.ctx.param("notificationUrl"))
            .unwrap_or_default();

        let request = build_request(input, &job.asset.location, job.id(), notification_url);

        let mut http_request = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json");
        if let Some(api_key) = self.ctx.param("apiKey") {
            http_request = http_request.header("Zencoder-Api-Key", api_key);
        }

        let response = http_request.json(&request).send().await.map_err(|e| {
            warn!(id = %job.id(), error = %e, "Transcode submission failed");
            ErrorCode::CouldNotSubmitTranscode
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(id = %job.id(), status = %status, body = %body, "Transcode service rejected job");
            return Err(ErrorCode::CouldNotSubmitTranscode);
        }

        // An unparseable body still means the job was accepted.
        let accepted: TranscodeResponse = response.json().await.unwrap_or_default();
        let streaming_url = accepted
            .outputs
            .iter()
            .find(|o| o.label.as_deref() == Some("playlist"))
            .and_then(|o| o.url.clone())
            .unwrap_or_else(|| format!("{}/{}.m3u8", job.asset.location, job.id()));

        info!(
            id = %job.id(),
            transcode_job = ?accepted.id,
            streaming_url = %streaming_url,
            "Submitted transcode job"
        );

        job.record(attrs::STREAMING_URL, streaming_url);
        Ok(Outcome::Delegated)
    }
}
