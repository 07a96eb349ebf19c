//! Model backend trait and the Gemini HTTP implementation.
//!
//! One call is one exchange: prompt plus generation config in, text out.
//! Streaming calls hand back a channel of chunks; a restarted stream
//! starts from an empty buffer (the caller discards what it accumulated).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{LlmError, Result};

/// Requested output shape of a generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// The backend is asked for a JSON document.
    Json,
    /// Free text.
    Text,
}

/// An inline image part for vision prompts.
#[derive(Debug, Clone)]
pub struct ImagePart {
    /// MIME type of the image (e.g. `image/png`).
    pub mime_type: String,
    /// Raw image bytes.
    pub data: Vec<u8>,
}

/// A single generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// The full prompt text.
    pub prompt: String,
    /// Requested output shape.
    pub mode: OutputMode,
    /// Optional image for diagram-to-intent calls.
    pub image: Option<ImagePart>,
}

impl GenerateRequest {
    /// A JSON-mode request.
    pub fn json(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            mode: OutputMode::Json,
            image: None,
        }
    }

    /// A text-mode request.
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            mode: OutputMode::Text,
            image: None,
        }
    }

    /// Attach an image part.
    pub fn with_image(mut self, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.image = Some(ImagePart {
            mime_type: mime_type.into(),
            data,
        });
        self
    }
}

/// Chunk stream returned by [`ModelBackend::generate_stream`].
pub type ChunkReceiver = mpsc::Receiver<Result<String>>;

/// The external language model, reduced to two operations.
///
/// Everything downstream (phase runners, the repair loop) talks to this
/// trait, which is what lets tests substitute a scripted backend.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// One unary generation call.
    async fn generate(&self, request: &GenerateRequest) -> Result<String>;

    /// One streaming generation call. Chunks arrive on the returned
    /// channel; the channel closing without an error is end-of-stream.
    async fn generate_stream(&self, request: &GenerateRequest) -> Result<ChunkReceiver>;
}

/// Google Gemini API client.
#[derive(Clone)]
pub struct GeminiClient {
    config: ModelConfig,
    client: Client,
}

impl GeminiClient {
    /// Create a client with the given configuration.
    pub fn new(config: ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(LlmError::Http)?;
        Ok(Self { config, client })
    }

    fn request_body(&self, request: &GenerateRequest) -> GeminiRequest {
        use base64::Engine as _;

        let mut parts = vec![GeminiPart {
            text: Some(request.prompt.clone()),
            inline_data: None,
        }];
        if let Some(image) = &request.image {
            parts.push(GeminiPart {
                text: None,
                inline_data: Some(GeminiInlineData {
                    mime_type: image.mime_type.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(&image.data),
                }),
            });
        }

        let generation_config = match request.mode {
            OutputMode::Json => Some(GeminiGenerationConfig {
                response_mime_type: Some("application/json".to_string()),
            }),
            OutputMode::Text => None,
        };

        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts,
            }],
            generation_config,
        }
    }

    async fn status_error(response: reqwest::Response) -> LlmError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => LlmError::Authentication(body),
            429 => LlmError::RateLimited(body),
            503 => LlmError::Unavailable(body),
            _ => LlmError::Provider(format!("backend error {status}: {body}")),
        }
    }

    fn candidate_text(response: GeminiResponse) -> Result<String> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no candidates".to_string()))?;
        Ok(candidate
            .content
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[async_trait]
impl ModelBackend for GeminiClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        );
        debug!(model = %self.config.model, mode = ?request.mode, "model call");

        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.config.api_key)])
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(LlmError::Http)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let body: GeminiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Self::candidate_text(body)
    }

    async fn generate_stream(&self, request: &GenerateRequest) -> Result<ChunkReceiver> {
        let url = format!(
            "{}/models/{}:streamGenerateContent",
            self.config.base_url, self.config.model
        );
        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.config.api_key), ("alt", &"sse".to_string())])
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(LlmError::Http)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            use futures::StreamExt;

            let mut body = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = body.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::Http(e))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // SSE framing: one `data: {...}` payload per line.
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);
                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if payload == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<GeminiResponse>(payload) {
                        Ok(event) => {
                            if let Ok(text) = GeminiClient::candidate_text(event) {
                                if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Err(LlmError::InvalidResponse(e.to_string())))
                                .await;
                            return;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }
}

// Gemini API wire types.
#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiInlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiCandidateContent,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}
