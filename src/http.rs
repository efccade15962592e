//! JSON-over-HTTP calls to the embedding and language-model services.
//!
//! Retry strategy (shared by every provider):
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and client timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

/// Build a client whose every request is bounded by `timeout_secs`.
pub fn client_with_timeout(timeout_secs: u64) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| format!("failed to build HTTP client: {}", e))
}

/// Sleep before retry number `attempt` (1-based): 1, 2, 4, ... capped at 32 s.
pub fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

/// Total sleep across `max_retries` retries.
pub fn total_backoff(max_retries: u32) -> Duration {
    (1..=max_retries).map(retry_delay).sum()
}

/// POST `body` to `url`, retrying transient failures up to `max_retries` times.
///
/// `service` labels error messages (e.g. `"OpenAI"`, `"Ollama"`).
pub async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    service: &str,
) -> Result<serde_json::Value, String> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = retry_delay(attempt);
            tracing::warn!(
                service,
                attempt,
                max_retries,
                delay_secs = delay.as_secs(),
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| format!("{} returned invalid JSON: {}", service, e));
                }

                let body_text = response.text().await.unwrap_or_default();

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(format!("{} API error {}: {}", service, status, body_text));
                    continue;
                }

                // Client error (not 429): fail now
                return Err(format!("{} API error {}: {}", service, status, body_text));
            }
            Err(e) => {
                let kind = if e.is_timeout() { "timed out" } else { "connection error" };
                last_err = Some(format!("{} {} ({}): {}", service, kind, url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| format!("{} request failed after retries", service)))
}
