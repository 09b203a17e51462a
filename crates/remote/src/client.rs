//! Provider-neutral request/response types and capability traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// What the provider is asked to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Structured text (JSON) describing the input.
    Text,
    /// A generated image.
    Image,
}

/// An inline image sent with the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            mime_type: "image/png".to_string(),
            bytes,
        }
    }
}

/// One physical request to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    pub prompt: String,
    pub attachment: Option<Attachment>,
    pub modality: Modality,
    /// Requested canvas width in pixels.
    pub width: u32,
    /// Requested canvas height in pixels.
    pub height: u32,
}

impl RemoteRequest {
    /// Ask for structured text about an attached image.
    pub fn describe(prompt: String, attachment: Attachment, width: u32, height: u32) -> Self {
        Self {
            prompt,
            attachment: Some(attachment),
            modality: Modality::Text,
            width,
            height,
        }
    }

    /// Ask for an image of the given canvas size.
    pub fn generate(prompt: String, width: u32, height: u32) -> Self {
        Self {
            prompt,
            attachment: None,
            modality: Modality::Image,
            width,
            height,
        }
    }
}

/// A validated provider response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutput {
    Text(String),
    Image(Vec<u8>),
}

impl RemoteOutput {
    pub fn into_text(self) -> Result<String, RemoteError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Image(_) => Err(RemoteError::Malformed(
                "expected text, provider returned an image".into(),
            )),
        }
    }

    pub fn into_image(self) -> Result<Vec<u8>, RemoteError> {
        match self {
            Self::Image(bytes) => Ok(bytes),
            Self::Text(text) => Err(RemoteError::Malformed(format!(
                "expected an image, provider returned text: {}",
                truncate(&text, 200)
            ))),
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Providers that answer a request inline.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn invoke(&self, request: &RemoteRequest) -> Result<RemoteOutput, RemoteError>;
}

/// Handles returned by an asynchronous submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandles {
    pub status_handle: String,
    pub result_handle: String,
}

/// State of an asynchronous job as reported by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Completed,
    /// Explicit failure or cancellation, with the provider's reason.
    Failed(String),
}

/// Providers that accept a job now and deliver the result later.
#[async_trait]
pub trait AsyncRemoteClient: Send + Sync {
    async fn submit(&self, request: &RemoteRequest) -> Result<JobHandles, RemoteError>;

    async fn poll(&self, status_handle: &str) -> Result<JobStatus, RemoteError>;

    async fn fetch(&self, result_handle: &str) -> Result<Vec<u8>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn output_kind_mismatch_is_malformed() {
        assert_matches!(
            RemoteOutput::Text("{}".into()).into_image(),
            Err(RemoteError::Malformed(_))
        );
        assert_matches!(
            RemoteOutput::Image(vec![1]).into_text(),
            Err(RemoteError::Malformed(_))
        );
    }

    #[test]
    fn long_text_is_truncated_in_errors() {
        let err = RemoteOutput::Text("x".repeat(1000)).into_image().unwrap_err();
        assert!(err.to_string().len() < 300);
    }

    #[test]
    fn constructors_set_modality() {
        let d = RemoteRequest::describe("p".into(), Attachment::png(vec![0]), 10, 10);
        assert_eq!(d.modality, Modality::Text);
        assert_eq!(d.attachment.unwrap().mime_type, "image/png");

        let g = RemoteRequest::generate("p".into(), 820, 820);
        assert_eq!(g.modality, Modality::Image);
        assert!(g.attachment.is_none());
    }
}
