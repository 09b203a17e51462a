//! ComfyUI adapter for asynchronous image generation.
//!
//! A workflow template (API-format JSON) is rendered per request by
//! substituting `{{prompt}}`, `{{width}}` and `{{height}}`, queued with
//! `POST /prompt`, polled through `GET /history/{prompt_id}` and
//! downloaded from `GET /view`. The prompt id serves as both the
//! status handle and the result handle.

use async_trait::async_trait;
use serde::Deserialize;

use crate::client::{AsyncRemoteClient, JobHandles, JobStatus, Modality, RemoteRequest};
use crate::error::{ensure_success, parse_response, RemoteError};
use crate::history::{self, HistoryResponse, OutputImage};

const PROMPT_PLACEHOLDER: &str = "{{prompt}}";
const WIDTH_PLACEHOLDER: &str = "{{width}}";
const HEIGHT_PLACEHOLDER: &str = "{{height}}";

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUiClient {
    client: reqwest::Client,
    api_url: String,
    workflow: serde_json::Value,
    client_id: String,
}

/// Response returned by `POST /prompt` after queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
}

impl ComfyUiClient {
    /// Create a client for `api_url` (e.g. `http://host:8188`) that
    /// submits the given workflow template.
    pub fn new(api_url: String, workflow: serde_json::Value) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, workflow)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String, workflow: serde_json::Value) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            workflow,
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Queue a rendered workflow.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
    ) -> Result<SubmitResponse, RemoteError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": self.client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        parse_response(response).await
    }

    /// Execution history for one prompt.
    pub async fn get_history(&self, prompt_id: &str) -> Result<HistoryResponse, RemoteError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        parse_response(response).await
    }

    /// Download an output file.
    pub async fn view(&self, image: &OutputImage) -> Result<Vec<u8>, RemoteError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.kind.as_str()),
            ])
            .send()
            .await?;

        let response = ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl AsyncRemoteClient for ComfyUiClient {
    async fn submit(&self, request: &RemoteRequest) -> Result<JobHandles, RemoteError> {
        if request.modality != Modality::Image {
            return Err(RemoteError::Unsupported(
                "ComfyUI workflows only produce images".into(),
            ));
        }

        let workflow = render_workflow(&self.workflow, request);
        let submitted = self.submit_workflow(&workflow).await?;
        tracing::debug!(
            prompt_id = %submitted.prompt_id,
            queue_position = submitted.number,
            "Workflow queued",
        );

        Ok(JobHandles {
            status_handle: submitted.prompt_id.clone(),
            result_handle: submitted.prompt_id,
        })
    }

    async fn poll(&self, status_handle: &str) -> Result<JobStatus, RemoteError> {
        let history = self.get_history(status_handle).await?;
        Ok(history::status_in(&history, status_handle))
    }

    async fn fetch(&self, result_handle: &str) -> Result<Vec<u8>, RemoteError> {
        let history = self.get_history(result_handle).await?;
        let image = history
            .get(result_handle)
            .and_then(|entry| entry.first_image())
            .ok_or_else(|| {
                RemoteError::Malformed(format!("prompt {result_handle} produced no images"))
            })?;
        self.view(image).await
    }
}

/// Substitute request values into a workflow template.
///
/// A string that is exactly `{{width}}` or `{{height}}` becomes a JSON
/// number so that numeric node inputs stay numeric; `{{prompt}}` is
/// replaced wherever it occurs inside a string.
pub fn render_workflow(template: &serde_json::Value, request: &RemoteRequest) -> serde_json::Value {
    use serde_json::Value;

    match template {
        Value::String(s) if s == WIDTH_PLACEHOLDER => Value::from(request.width),
        Value::String(s) if s == HEIGHT_PLACEHOLDER => Value::from(request.height),
        Value::String(s) => Value::String(
            s.replace(PROMPT_PLACEHOLDER, &request.prompt)
                .replace(WIDTH_PLACEHOLDER, &request.width.to_string())
                .replace(HEIGHT_PLACEHOLDER, &request.height.to_string()),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_workflow(item, request))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), render_workflow(value, request)))
                .collect(),
        ),
        other => other.clone(),
    }
}
