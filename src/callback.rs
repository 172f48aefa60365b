//! Terminal-status callback delivery with exponential backoff (spec.md §4.8).

use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct CallbackPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for CallbackPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Serialize)]
struct CallbackBody<'a> {
    request_id: &'a str,
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// POSTs the terminal job state to `callback_url`, retrying on any
/// non-2xx or transport failure. Gives up silently after `max_retries` —
/// final failure is logged but never surfaces to the job record
/// (spec.md §7).
pub async fn deliver(
    http: &reqwest::Client,
    callback_url: &str,
    request_id: &str,
    status: &str,
    result: Option<&Value>,
    error: Option<&str>,
    policy: CallbackPolicy,
) {
    let body = CallbackBody {
        request_id,
        status,
        result,
        error,
    };

    for attempt in 1..=policy.max_retries {
        let outcome = http
            .post(callback_url)
            .timeout(policy.timeout)
            .json(&body)
            .send()
            .await;

        match outcome {
            Ok(response) if response.status().is_success() => {
                info!(request_id, attempt, "doc_ocr.callback.delivered");
                return;
            }
            Ok(response) => {
                warn!(request_id, attempt, status = %response.status(), "doc_ocr.callback.rejected");
            }
            Err(err) => {
                warn!(request_id, attempt, error = %err, "doc_ocr.callback.failed");
            }
        }

        if attempt < policy.max_retries {
            let delay = policy.base_delay * 2u32.pow(attempt - 1);
            tokio::time::sleep(delay).await;
        }
    }

    warn!(request_id, attempts = policy.max_retries, "doc_ocr.callback.giveup");
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn delivers_on_first_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/callback"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let policy = CallbackPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(1),
        };
        deliver(
            &reqwest::Client::new(),
            &format!("{}/callback", server.uri()),
            "R1",
            "SUCCEEDED",
            None,
            None,
            policy,
        )
        .await;
    }

    #[tokio::test]
    async fn retries_exact_count_on_persistent_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/callback"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let policy = CallbackPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            timeout: Duration::from_secs(1),
        };
        let started = tokio::time::Instant::now();
        deliver(
            &reqwest::Client::new(),
            &format!("{}/callback", server.uri()),
            "R1",
            "FAILED",
            None,
            Some("boom"),
            policy,
        )
        .await;
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
