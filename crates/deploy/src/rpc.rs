//! Shared RPC utilities for interacting with Ethereum JSON-RPC endpoints.

use std::time::{Duration, Instant};

use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use crate::ChainError;

/// Default timeout for a single RPC request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client(timeout: Duration) -> Result<reqwest::Client, ChainError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ChainError::Transport(format!("failed to create HTTP client: {e}")))
}

/// Make a JSON-RPC call and deserialize the result.
///
/// Transport and decoding failures map to [`ChainError::Transport`]; an error
/// object returned by the node maps to [`ChainError::Rejected`].
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, ChainError> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .map_err(|e| ChainError::Transport(format!("failed to send {method} request: {e}")))?;

    let result: Value = response
        .json()
        .await
        .map_err(|e| ChainError::Transport(format!("failed to parse {method} response: {e}")))?;

    parse_response(method, result)
}

fn parse_response<T: DeserializeOwned>(method: &str, mut response: Value) -> Result<T, ChainError> {
    if let Some(error) = response.get("error") {
        return Err(ChainError::Rejected(
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
                .to_string(),
        ));
    }

    let result = response
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| ChainError::Transport(format!("no result in {method} response")))?;

    serde_json::from_value(result)
        .map_err(|e| ChainError::Transport(format!("failed to deserialize {method} result: {e}")))
}

/// Deserialize an optional u64 from a hex quantity (with 0x prefix).
pub fn deserialize_opt_u64_from_hex<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    s.map(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16))
        .transpose()
        .map_err(serde::de::Error::custom)
}

/// Poll `check_fn` until it yields a value or `timeout` elapses.
///
/// Returns `Ok(None)` on timeout. Errors from `check_fn` abort polling.
pub async fn poll_until<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    check_fn: F,
) -> Result<Option<T>, ChainError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>, ChainError>>,
{
    let start = Instant::now();

    loop {
        if let Some(value) = check_fn().await? {
            return Ok(Some(value));
        }

        if start.elapsed() >= timeout {
            return Ok(None);
        }

        tracing::trace!(elapsed = ?start.elapsed(), "Not ready yet, polling again...");
        tokio::time::sleep(interval).await;
    }
}
