//! Startup registration against the gateway's `/register` endpoint
//! (spec.md §4.11): best-effort, bounded retry, never blocks the service
//! from otherwise starting.

use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RouteRegistration {
    pub category: String,
    pub action: String,
    pub url: String,
}

#[derive(Serialize)]
struct RegisterBody<'a> {
    category: &'a str,
    action: &'a str,
    url: &'a str,
}

/// Registers every declared route with the gateway, retrying each one up
/// to `max_attempts` times with a constant delay. Logs success, each
/// failed attempt, and a final give-up; never returns an error, since
/// registration must not block the caller's own startup.
pub async fn register_all(
    http: &reqwest::Client,
    gateway_url: &str,
    routes: &[RouteRegistration],
    max_attempts: u32,
    retry_delay: Duration,
) {
    for route in routes {
        register_one(http, gateway_url, route, max_attempts, retry_delay).await;
    }
}

async fn register_one(
    http: &reqwest::Client,
    gateway_url: &str,
    route: &RouteRegistration,
    max_attempts: u32,
    retry_delay: Duration,
) {
    let url = format!("{}/register", gateway_url.trim_end_matches('/'));
    let body = RegisterBody {
        category: &route.category,
        action: &route.action,
        url: &route.url,
    };

    for attempt in 1..=max_attempts {
        match http.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                info!(category = %route.category, action = %route.action, attempt, "bootstrap.register.ok");
                return;
            }
            Ok(response) => {
                warn!(category = %route.category, action = %route.action, attempt, status = %response.status(), "bootstrap.register.rejected");
            }
            Err(err) => {
                warn!(category = %route.category, action = %route.action, attempt, error = %err, "bootstrap.register.failed");
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(retry_delay).await;
        }
    }

    warn!(category = %route.category, action = %route.action, attempts = max_attempts, "bootstrap.register.giveup");
}
