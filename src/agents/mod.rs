//! Agent runtime and handler registry (spec.md §4.6): per-agent
//! configuration, the context object passed to handlers, and the
//! compile-time dispatch table that replaces a dynamically-imported
//! handler module.

pub mod doc_ocr;

use crate::jobs::JobTracker;
use crate::observability::Metrics;
use crate::staging::EsbClient;
use async_trait::async_trait;
use axum::response::Response;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Masks a secret for logging: first 4 + `****` + last 4, or `****` if the
/// value is 8 characters or shorter (spec.md §3).
pub fn mask_secret(value: &str) -> String {
    let len = value.chars().count();
    if len <= 8 {
        return "****".to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[len - 4..].iter().collect();
    format!("{head}****{tail}")
}

/// Per-agent configuration (spec.md §3). Unknown keys are preserved in
/// `extra` for handler-specific use rather than discarded.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub conversation_url: Option<String>,
    #[serde(default)]
    pub upload_url: Option<String>,
    #[serde(default)]
    pub run_url: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub use_real: bool,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub authorization: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(rename = "appId", default)]
    pub app_id_camel: Option<String>,
    #[serde(default)]
    pub department_id: Option<String>,
    #[serde(flatten)]
    pub extra: Value,
}

impl AgentConfig {
    /// Real if `use_real` is set or any of the known upstream-address
    /// fields is non-empty (spec.md §4.7 step 3 — these are OR'd, not
    /// prioritised one over the other).
    pub fn wants_real_adapter(&self) -> bool {
        let non_empty = |s: &Option<String>| s.as_deref().is_some_and(|v| !v.is_empty());
        self.use_real
            || non_empty(&self.base_url)
            || non_empty(&self.host)
            || non_empty(&self.conversation_url)
            || non_empty(&self.upload_url)
            || non_empty(&self.run_url)
            || non_empty(&self.app_id)
            || non_empty(&self.app_id_camel)
    }

    /// Handler key: the config's explicit `handler`, else the agent name
    /// with `-` normalised to `_` (spec.md §4.6).
    pub fn handler_key(&self, agent_name: &str) -> String {
        self.handler
            .clone()
            .unwrap_or_else(|| agent_name.replace('-', "_"))
    }

    /// Authorization masked for logging; `None` stays `None`.
    pub fn masked_authorization(&self) -> Option<String> {
        self.authorization.as_deref().map(mask_secret)
    }
}

/// Everything a handler needs, gathered by the orchestrator's HTTP layer
/// before dispatch (spec.md §4.6).
pub struct AgentContext {
    pub request_id: String,
    pub agent_name: String,
    pub config: AgentConfig,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
    pub raw_body: Vec<u8>,
    pub jobs: Arc<JobTracker>,
    pub esb: EsbClient,
    pub metrics: Arc<Metrics>,
    pub staging_dir: std::path::PathBuf,
    pub http: reqwest::Client,
    pub idempotency_ttl_secs: u64,
    pub job_ttl_secs: u64,
    pub download_timeout: std::time::Duration,
    pub upload_timeout: std::time::Duration,
    pub callback_policy: crate::callback::CallbackPolicy,
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: AgentContext) -> Result<Response, HandlerError>;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("agent_handler_missing: {0}")]
    NotFound(String),
}

/// Compile-time `name → handler` dispatch table (spec.md §4.6, §9): no
/// dynamic module loading, a missing entry maps to `500
/// agent_handler_missing`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(key.into(), handler);
    }

    pub fn resolve(&self, config: &AgentConfig, agent_name: &str) -> Result<Arc<dyn JobHandler>, RegistryError> {
        let key = config.handler_key(agent_name);
        self.handlers
            .get(&key)
            .cloned()
            .ok_or(RegistryError::NotFound(key))
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("doc_ocr", Arc::new(doc_ocr::DocOcrHandler::new(doc_ocr::StubOcrAdapter)));
        registry
    }
}
