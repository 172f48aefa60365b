use serde::{Deserialize, Serialize};

/// Process-wide configuration, loaded from defaults, an optional TOML file,
/// and environment variables (spec.md §6 names its env vars; we deserialize
/// them onto these snake_case fields directly, no namespace prefix, since
/// the external contract already names them individually).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    pub gw_api_key: Option<String>,
    #[serde(default = "default_request_timeout_sec")]
    pub request_timeout_sec: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_route_source")]
    pub route_source: String,

    pub kv_host: Option<String>,
    #[serde(default = "default_kv_port")]
    pub kv_port: u16,
    #[serde(default)]
    pub kv_db: i64,
    pub kv_password: Option<String>,
    #[serde(default = "default_redis_key_prefix")]
    pub redis_key_prefix: String,

    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
    pub esb_base_url: Option<String>,

    #[serde(default = "default_idempotency_ttl_sec")]
    pub idempotency_ttl_sec: u64,
    #[serde(default = "default_job_ttl_sec")]
    pub job_ttl_sec: u64,

    pub agent_config_file: Option<String>,
    pub gateway_url: Option<String>,
    pub orchestrator_base_url: Option<String>,

    #[serde(default = "default_register_max_attempts")]
    pub register_max_attempts: u32,
    #[serde(default = "default_register_retry_seconds")]
    pub register_retry_seconds: u64,

    pub doc_ocr_callback_url: Option<String>,
    #[serde(default = "default_callback_timeout_sec")]
    pub doc_ocr_callback_timeout_sec: u64,
    #[serde(default = "default_callback_max_retries")]
    pub doc_ocr_callback_max_retries: u32,
    #[serde(default = "default_callback_base_delay_sec")]
    pub doc_ocr_callback_base_delay_sec: f64,

    // Not named explicitly in spec.md §6; the wire format in §6 implies
    // optional basic auth and a configurable upload field/URL, so these
    // are ambient knobs for the ESB service alone (see DESIGN.md).
    pub esb_basic_auth_user: Option<String>,
    pub esb_basic_auth_pass: Option<String>,
    pub esb_upload_url: Option<String>,
    #[serde(default = "default_esb_upload_field_name")]
    pub esb_upload_field_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_prefix: default_api_prefix(),
            gw_api_key: None,
            request_timeout_sec: default_request_timeout_sec(),
            rate_limit: default_rate_limit(),
            route_source: default_route_source(),
            kv_host: None,
            kv_port: default_kv_port(),
            kv_db: 0,
            kv_password: None,
            redis_key_prefix: default_redis_key_prefix(),
            staging_dir: default_staging_dir(),
            esb_base_url: None,
            idempotency_ttl_sec: default_idempotency_ttl_sec(),
            job_ttl_sec: default_job_ttl_sec(),
            agent_config_file: None,
            gateway_url: None,
            orchestrator_base_url: None,
            register_max_attempts: default_register_max_attempts(),
            register_retry_seconds: default_register_retry_seconds(),
            doc_ocr_callback_url: None,
            doc_ocr_callback_timeout_sec: default_callback_timeout_sec(),
            doc_ocr_callback_max_retries: default_callback_max_retries(),
            doc_ocr_callback_base_delay_sec: default_callback_base_delay_sec(),
            esb_basic_auth_user: None,
            esb_basic_auth_pass: None,
            esb_upload_url: None,
            esb_upload_field_name: default_esb_upload_field_name(),
        }
    }
}

fn default_api_prefix() -> String {
    "/api".to_string()
}
fn default_request_timeout_sec() -> u64 {
    15
}
fn default_rate_limit() -> u32 {
    60
}
fn default_route_source() -> String {
    "kv".to_string()
}
fn default_kv_port() -> u16 {
    6379
}
fn default_redis_key_prefix() -> String {
    "agentmesh:".to_string()
}
fn default_staging_dir() -> String {
    "data/staging".to_string()
}
fn default_idempotency_ttl_sec() -> u64 {
    3600
}
fn default_job_ttl_sec() -> u64 {
    86400
}
fn default_register_max_attempts() -> u32 {
    15
}
fn default_register_retry_seconds() -> u64 {
    2
}
fn default_callback_timeout_sec() -> u64 {
    10
}
fn default_callback_max_retries() -> u32 {
    5
}
fn default_callback_base_delay_sec() -> f64 {
    1.0
}
fn default_esb_upload_field_name() -> String {
    "file".to_string()
}

impl Config {
    pub fn kv_url(&self) -> Option<String> {
        let host = self.kv_host.as_ref()?;
        let auth = self
            .kv_password
            .as_ref()
            .map(|p| format!(":{p}@"))
            .unwrap_or_default();
        Some(format!("redis://{auth}{host}:{}/{}", self.kv_port, self.kv_db))
    }
}
