//! Typed view of the ComfyUI `/history/{prompt_id}` response.
//!
//! The endpoint returns `{}` while a prompt is queued or running and
//! `{"<prompt_id>": {"outputs": ..., "status": ...}}` once it has
//! finished. Output nodes list the files they wrote; the first image
//! found is the job's result.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::client::JobStatus;

/// Whole response body, keyed by prompt id.
pub type HistoryResponse = BTreeMap<String, HistoryEntry>;

/// One finished prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    /// Node id to the files that node produced.
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

/// Execution status block.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
    /// `[event_name, payload]` pairs recorded during execution.
    #[serde(default)]
    pub messages: Vec<(String, serde_json::Value)>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<OutputImage>,
}

/// File reference accepted by `GET /view`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputImage {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "output".to_string()
}

impl HistoryEntry {
    /// Interpret the entry as a job status.
    pub fn job_status(&self) -> JobStatus {
        match &self.status {
            Some(status) if status.status_str == "error" => {
                JobStatus::Failed(status.error_message())
            }
            Some(status) if status.completed => JobStatus::Completed,
            // Older servers omit the status block but still report outputs.
            None if !self.outputs.is_empty() => JobStatus::Completed,
            _ => JobStatus::Pending,
        }
    }

    /// First image written by any output node, in node-id order.
    pub fn first_image(&self) -> Option<&OutputImage> {
        self.outputs.values().flat_map(|node| node.images.iter()).next()
    }
}

impl HistoryStatus {
    fn error_message(&self) -> String {
        self.messages
            .iter()
            .filter(|(event, _)| event == "execution_error")
            .find_map(|(_, payload)| {
                payload
                    .get("exception_message")
                    .and_then(|m| m.as_str())
                    .map(|m| m.trim().to_string())
            })
            .unwrap_or_else(|| "workflow execution failed".to_string())
    }
}

/// Status of `prompt_id` in a history response; absent means still pending.
pub fn status_in(history: &HistoryResponse, prompt_id: &str) -> JobStatus {
    history
        .get(prompt_id)
        .map(HistoryEntry::job_status)
        .unwrap_or(JobStatus::Pending)
}

/// Parse a raw history body.
pub fn parse_history(text: &str) -> Result<HistoryResponse, serde_json::Error> {
    serde_json::from_str(text)
}
