//! HTTP transport for the backend event stream
//!
//! Events arrive as server-sent `data:` frames on the events endpoints;
//! control operations are plain JSON endpoints:
//!
//! ```text
//! GET  {base}/events                      # all-subjects stream
//! GET  {base}/subjects/{id}/events        # single-subject stream
//! GET  {base}/subjects                    # active listing
//! POST {base}/subjects/{id}/run
//! POST {base}/subjects/{id}/cancel       # JSON bool body, 404 = nothing to cancel
//! ```

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::sync::mpsc;
use tracing::{info, warn};

use rb_core::stream::{EventEnvelope, SubjectInfo};

use crate::error::{MonitorError, Result};
use crate::transport::EventTransport;

const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// [`EventTransport`] over the backend's HTTP surface
pub struct RemoteTransport {
    client: Client,
    base_url: String,
}

impl RemoteTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            // Disable proxy for internal backend communication
            client: Client::builder()
                .no_proxy()
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into(),
        }
    }

    fn events_url(&self, subject: Option<&str>) -> String {
        match subject {
            Some(id) => format!("{}/subjects/{}/events", self.base_url, id),
            None => format!("{}/events", self.base_url),
        }
    }
}

/// Extract the next complete SSE frame (terminated by a blank line)
fn next_frame(buffer: &mut String) -> Option<String> {
    let idx = buffer.find("\n\n")?;
    let frame = buffer.drain(..idx + 2).collect::<String>();
    Some(frame.trim().to_string())
}

/// Decode one frame into an envelope; non-data frames yield `None`
fn decode_frame(frame: &str) -> Option<EventEnvelope> {
    let data = frame.strip_prefix("data: ")?;
    match EventEnvelope::from_json(data) {
        Ok(envelope) => Some(envelope),
        Err(error) => {
            warn!("Skipping malformed event frame: {}", error);
            None
        }
    }
}

#[async_trait]
impl EventTransport for RemoteTransport {
    async fn subscribe(&self, subject: Option<&str>) -> Result<mpsc::Receiver<EventEnvelope>> {
        let url = self.events_url(subject);
        info!("Subscribing to event stream: {}", url);

        let res = self.client.get(&url).send().await.map_err(|e| {
            MonitorError::transport(format!("Failed to connect to event stream: {}", e))
        })?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(MonitorError::transport(format!(
                "Event stream returned {}: {}",
                status, body
            )));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut stream = res.bytes_stream();
            let mut buffer = String::new();

            while let Some(item) = stream.next().await {
                let chunk: bytes::Bytes = match item {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("Event stream error: {}", e);
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(frame) = next_frame(&mut buffer) {
                    if let Some(envelope) = decode_frame(&frame) {
                        if tx.send(envelope).await.is_err() {
                            // Subscriber went away; stop reading
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn list_active(&self) -> Result<Vec<SubjectInfo>> {
        let url = format!("{}/subjects", self.base_url);

        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MonitorError::transport(format!("Failed to list subjects: {}", e)))?;

        if !res.status().is_success() {
            return Err(MonitorError::transport(format!(
                "Subject listing returned {}",
                res.status()
            )));
        }

        res.json::<Vec<SubjectInfo>>()
            .await
            .map_err(|e| MonitorError::transport(format!("Invalid subject listing: {}", e)))
    }

    async fn run(&self, subject_id: &str) -> Result<()> {
        let url = format!("{}/subjects/{}/run", self.base_url, subject_id);

        let res = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| MonitorError::transport(format!("Failed to request run: {}", e)))?;

        if !res.status().is_success() {
            let error_text = res.text().await.unwrap_or_default();
            return Err(MonitorError::transport(format!(
                "Run request rejected: {}",
                error_text
            )));
        }

        Ok(())
    }

    async fn cancel(&self, subject_id: &str) -> Result<bool> {
        let url = format!("{}/subjects/{}/cancel", self.base_url, subject_id);

        let res = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| MonitorError::transport(format!("Failed to request cancel: {}", e)))?;

        if res.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        if !res.status().is_success() {
            let error_text = res.text().await.unwrap_or_default();
            return Err(MonitorError::transport(format!(
                "Cancel request rejected: {}",
                error_text
            )));
        }

        res.json::<bool>()
            .await
            .map_err(|e| MonitorError::transport(format!("Invalid cancel response: {}", e)))
    }
}
