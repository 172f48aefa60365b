use crate::agents::{AgentConfig, HandlerRegistry};
use crate::config::Config;
use crate::jobs::JobTracker;
use crate::kv::Kv;
use crate::observability::Metrics;
use crate::routing::RouteTable;
use crate::staging::EsbClient;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub routes: Arc<RouteTable>,
    pub jobs: Arc<JobTracker>,
    pub registry: Arc<HandlerRegistry>,
    pub agent_configs: Arc<HashMap<String, AgentConfig>>,
    pub esb: EsbClient,
    pub metrics: Arc<Metrics>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: Config,
        kv: Arc<dyn Kv>,
        registry: HandlerRegistry,
        agent_configs: HashMap<String, AgentConfig>,
    ) -> Self {
        let esb = EsbClient::new(config.esb_base_url.clone().unwrap_or_default());
        Self {
            routes: Arc::new(RouteTable::new(kv.clone())),
            jobs: Arc::new(JobTracker::new(kv)),
            registry: Arc::new(registry),
            agent_configs: Arc::new(agent_configs),
            esb,
            metrics: Arc::new(Metrics::new()),
            http: reqwest::Client::new(),
            config: Arc::new(config),
        }
    }
}
