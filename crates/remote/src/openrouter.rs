//! OpenRouter chat-completions adapter.
//!
//! Implements [`RemoteClient`] on top of the OpenAI-compatible
//! `POST /chat/completions` endpoint. Describe requests attach the
//! image as a base64 data URL and ask for a JSON object; generate
//! requests ask for the `image` modality and read the first returned
//! image, which arrives either as a data URL or as a download link.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::client::{Modality, RemoteClient, RemoteOutput, RemoteRequest};
use crate::error::{ensure_success, parse_response, RemoteError};

/// Default API base URL.
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default model for describing images.
pub const DEFAULT_DESCRIBE_MODEL: &str = "google/gemini-3-flash-preview";

/// Default model for generating images.
pub const DEFAULT_IMAGE_MODEL: &str = "google/gemini-2.5-flash-image";

/// Sampling temperature for describe requests.
const DESCRIBE_TEMPERATURE: f32 = 0.2;

/// Timeout for downloading an image returned by URL.
const IMAGE_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Output hints for image generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageConfig {
    /// e.g. `1:1`.
    pub aspect_ratio: String,
    /// `1K` or `2K`.
    pub image_size: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            aspect_ratio: "1:1".to_string(),
            image_size: "2K".to_string(),
        }
    }
}

/// HTTP client for the OpenRouter API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    image_config: ImageConfig,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Top-level chat-completions response.
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChatMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub images: Vec<ImagePart>,
}

/// Image entry: either `{"image_url": {"url": ...}}` or a bare URL string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ImagePart {
    Object { image_url: ImageUrl },
    Url(String),
}

#[derive(Debug, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ImagePart {
    pub fn url(&self) -> &str {
        match self {
            Self::Object { image_url } => &image_url.url,
            Self::Url(url) => url,
        }
    }
}

/// What a chat response carries once validated for a modality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatPayload {
    Text(String),
    ImageUrl(String),
}

/// Validate a chat response against the requested modality.
pub fn extract_payload(response: ChatResponse, modality: Modality) -> Result<ChatPayload, RemoteError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| RemoteError::Malformed("no choices in response".into()))?;

    match modality {
        Modality::Text => match message.content {
            Some(content) if !content.trim().is_empty() => Ok(ChatPayload::Text(content)),
            _ => Err(RemoteError::Malformed("empty message content".into())),
        },
        Modality::Image => match message.images.first() {
            Some(part) => Ok(ChatPayload::ImageUrl(part.url().to_string())),
            None => Err(RemoteError::Malformed(format!(
                "no images in response; content: {}",
                message.content.unwrap_or_default()
            ))),
        },
    }
}

static DATA_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^data:image/[^;]+;base64,(.+)$").expect("valid regex"));

/// Decode a `data:image/...;base64,` URL into bytes.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, RemoteError> {
    let encoded = DATA_URL_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| RemoteError::Malformed("unrecognised data URL".into()))?;
    STANDARD
        .decode(encoded.as_str().trim())
        .map_err(|e| RemoteError::Malformed(format!("invalid base64 image data: {e}")))
}

/// Encode bytes as a data URL for inline attachments.
pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

impl OpenRouterClient {
    /// Create a client for the public OpenRouter endpoint.
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_client(
            reqwest::Client::new(),
            OPENROUTER_BASE_URL.to_string(),
            api_key,
            model,
        )
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        model: String,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            image_config: ImageConfig::default(),
        }
    }

    pub fn with_image_config(mut self, image_config: ImageConfig) -> Self {
        self.image_config = image_config;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// JSON body for a request.
    pub fn build_body(&self, request: &RemoteRequest) -> serde_json::Value {
        match request.modality {
            Modality::Text => {
                let mut content = Vec::new();
                if let Some(attachment) = &request.attachment {
                    content.push(serde_json::json!({
                        "type": "image_url",
                        "image_url": {
                            "url": encode_data_url(&attachment.mime_type, &attachment.bytes),
                        },
                    }));
                }
                content.push(serde_json::json!({
                    "type": "text",
                    "text": request.prompt,
                }));
                serde_json::json!({
                    "model": self.model,
                    "messages": [{ "role": "user", "content": content }],
                    "temperature": DESCRIBE_TEMPERATURE,
                    "response_format": { "type": "json_object" },
                })
            }
            Modality::Image => serde_json::json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": request.prompt }],
                "modalities": ["image"],
                "image_config": self.image_config,
            }),
        }
    }

    async fn post_chat(&self, body: &serde_json::Value) -> Result<ChatResponse, RemoteError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        parse_response(response).await
    }

    async fn resolve_image(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        if url.starts_with("data:") {
            return decode_data_url(url);
        }
        if url.starts_with("http") {
            let response = self
                .client
                .get(url)
                .timeout(IMAGE_DOWNLOAD_TIMEOUT)
                .send()
                .await?;
            let response = ensure_success(response).await?;
            return Ok(response.bytes().await?.to_vec());
        }
        Err(RemoteError::Malformed(format!(
            "unexpected image reference: {}",
            url.chars().take(64).collect::<String>()
        )))
    }
}

#[async_trait]
impl RemoteClient for OpenRouterClient {
    async fn invoke(&self, request: &RemoteRequest) -> Result<RemoteOutput, RemoteError> {
        let body = self.build_body(request);
        let response = self.post_chat(&body).await?;
        tracing::debug!(
            model = response.model.as_deref().unwrap_or(&self.model),
            choices = response.choices.len(),
            "Chat response received",
        );

        match extract_payload(response, request.modality)? {
            ChatPayload::Text(text) => Ok(RemoteOutput::Text(text)),
            ChatPayload::ImageUrl(url) => Ok(RemoteOutput::Image(self.resolve_image(&url).await?)),
        }
    }
}
