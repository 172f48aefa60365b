//! Loads the `name → AgentConfig` map from `AGENT_CONFIG_FILE` (spec.md
//! §3, §6). The concrete bootstrap loader format is out of core scope;
//! this reads a flat TOML table the same way [`crate::config`] reads the
//! process config, since the teacher already depends on the `config`
//! crate for exactly this shape.

use crate::agents::AgentConfig;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentConfigError {
    #[error("failed to read agent config file {0}: {1}")]
    Read(String, std::io::Error),
    #[error("failed to parse agent config file {0}: {1}")]
    Parse(String, toml::de::Error),
}

pub fn load(path: Option<&str>) -> Result<HashMap<String, AgentConfig>, AgentConfigError> {
    let Some(path) = path else {
        return Ok(HashMap::new());
    };

    let raw = std::fs::read_to_string(path).map_err(|err| AgentConfigError::Read(path.to_string(), err))?;
    let table: HashMap<String, AgentConfig> =
        toml::from_str(&raw).map_err(|err| AgentConfigError::Parse(path.to_string(), err))?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_yields_empty_map() {
        assert!(load(None).unwrap().is_empty());
    }

    #[test]
    fn parses_a_minimal_agent_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.toml");
        std::fs::write(&path, "[doc-ocr]\nuse_real = false\n").unwrap();

        let configs = load(Some(path.to_str().unwrap())).unwrap();
        assert!(configs.contains_key("doc-ocr"));
        assert!(!configs["doc-ocr"].use_real);
    }
}
