use std::time::Duration;

/// Errors from remote provider calls.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Transport failure before a response arrived.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx status; `body` is kept verbatim for the failure log.
    #[error("Provider returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The response parsed but did not contain what was asked for.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The call did not finish within its timeout.
    #[error("Remote call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The adapter cannot serve this kind of request.
    #[error("Unsupported request: {0}")]
    Unsupported(String),
}

// ---- response helpers ----

/// Ensure the response has a success status code, otherwise return a
/// [`RemoteError::Api`] carrying the status and body text.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(RemoteError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Parse a successful JSON body, reporting shape mismatches as
/// [`RemoteError::Malformed`] rather than transport errors.
pub(crate) async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RemoteError> {
    let response = ensure_success(response).await?;
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| RemoteError::Malformed(format!("unparseable body: {e}")))
}
