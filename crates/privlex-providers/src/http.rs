use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use privlex_agents::BackendError;

const USER_AGENT: &str = concat!("privlex/", env!("CARGO_PKG_VERSION"));

/// Longest error body kept in a [`BackendError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Build a reqwest client whose per-request deadline is `timeout`.
pub(crate) fn build_client(timeout: Duration) -> Result<Client, BackendError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::Connection(format!("failed to build HTTP client: {e}")))
}

/// Map a transport failure onto the collaborator error set.
pub(crate) fn transport_error(err: reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(timeout)
    } else if err.is_decode() {
        BackendError::InvalidResponse(err.to_string())
    } else {
        BackendError::Connection(err.to_string())
    }
}

/// Reject non-2xx responses, then decode the body as JSON.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: Response,
    timeout: Duration,
) -> Result<T, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Status {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY).collect(),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| transport_error(e, timeout))?;
    serde_json::from_slice(&bytes).map_err(|e| BackendError::InvalidResponse(e.to_string()))
}

/// Join a base URL and a path without doubling the slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
