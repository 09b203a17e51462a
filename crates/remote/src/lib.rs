//! Remote generative-service clients.
//!
//! The pipeline talks to providers only through the two capability
//! traits in [`client`]: [`RemoteClient`] for providers that answer
//! inline and [`AsyncRemoteClient`] for submit/poll/fetch providers.
//! Vendor request and response shaping lives in adapters behind them,
//! and every response is parsed into typed structures at this boundary.

pub mod client;
pub mod comfyui;
pub mod error;
pub mod history;
pub mod openrouter;

pub use client::{
    AsyncRemoteClient, Attachment, JobHandles, JobStatus, Modality, RemoteClient, RemoteOutput,
    RemoteRequest,
};
pub use error::RemoteError;
pub use comfyui::ComfyUiClient;
pub use openrouter::{ImageConfig, OpenRouterClient};
