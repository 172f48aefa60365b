use super::middleware::RateLimiter;
use crate::config::Config;
use crate::kv::Kv;
use crate::observability::Metrics;
use crate::routing::RouteTable;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub routes: Arc<RouteTable>,
    pub kv: Arc<dyn Kv>,
    pub metrics: Arc<Metrics>,
    pub http: reqwest::Client,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, kv: Arc<dyn Kv>) -> Self {
        Self {
            routes: Arc::new(RouteTable::new(kv.clone())),
            config: Arc::new(config),
            kv,
            metrics: Arc::new(Metrics::new()),
            http: reqwest::Client::new(),
            rate_limiter: RateLimiter::new(),
        }
    }
}
