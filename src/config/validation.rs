use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("API_PREFIX must not be empty")]
    EmptyApiPrefix,
    #[error("REQUEST_TIMEOUT_SEC must be positive")]
    InvalidRequestTimeout,
    #[error("ROUTE_SOURCE=yaml requires AGENT_CONFIG_FILE to be set")]
    MissingAgentConfigFile,
    #[error("ROUTE_SOURCE must be 'kv' or 'yaml', got '{0}'")]
    InvalidRouteSource(String),
}

pub fn validate(config: &Config) -> Result<(), ValidationError> {
    if config.api_prefix.trim().is_empty() {
        return Err(ValidationError::EmptyApiPrefix);
    }
    if config.request_timeout_sec == 0 {
        return Err(ValidationError::InvalidRequestTimeout);
    }
    match config.route_source.as_str() {
        "kv" => {}
        "yaml" => {
            if config.agent_config_file.is_none() {
                return Err(ValidationError::MissingAgentConfigFile);
            }
        }
        other => return Err(ValidationError::InvalidRouteSource(other.to_string())),
    }
    Ok(())
}
