use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::protocol::RecognizeOptions;

/// Errors returned by a recognition backend
#[derive(thiserror::Error, Debug)]
pub enum TranscribeError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("cannot decode service response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TranscribeError {
    /// Whether another attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TranscribeError::Network(_) => true,
            TranscribeError::Status { status, .. } => {
                *status == StatusCode::REQUEST_TIMEOUT.as_u16()
                    || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
                    || *status >= 500
            }
            TranscribeError::Decode(_) => false,
            TranscribeError::Other(_) => true,
        }
    }
}

/// The remote speech recognition capability
///
/// The returned document is opaque to the batch engine; it is only written
/// to disk.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &[u8],
        options: &RecognizeOptions,
    ) -> Result<serde_json::Value, TranscribeError>;
}

/// HTTP client for a Watson-style `/v1/recognize` endpoint
#[derive(Clone)]
pub struct SpeechToTextClient {
    client: Client,
    api_key: String,
    service_url: String,
}

impl SpeechToTextClient {
    pub fn new(api_key: impl Into<String>, service_url: impl Into<String>) -> Result<Self, TranscribeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .user_agent(format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            service_url: service_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn recognize_url(&self) -> String {
        format!("{}/v1/recognize", self.service_url)
    }
}

#[async_trait]
impl Transcriber for SpeechToTextClient {
    async fn transcribe(
        &self,
        audio: &[u8],
        options: &RecognizeOptions,
    ) -> Result<serde_json::Value, TranscribeError> {
        let query = [
            ("model", options.model.clone()),
            ("timestamps", options.timestamps.to_string()),
            (
                "word_alternatives_threshold",
                options.word_alternatives_threshold.to_string(),
            ),
        ];

        debug!("Sending {} bytes to {}", audio.len(), self.recognize_url());

        let response = self
            .client
            .post(self.recognize_url())
            .query(&query)
            .header(CONTENT_TYPE, options.content_type.as_str())
            .basic_auth("apikey", Some(&self.api_key))
            .body(audio.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(TranscribeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(TranscribeError::Decode)
    }
}
