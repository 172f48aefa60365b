use super::models::Config;
use config::Environment;
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "AGENTMESH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/agentmesh.toml";

/// Load configuration from defaults, an optional TOML file, and the
/// process environment, highest priority last — same layering as the
/// teacher's `config::sources::load`, minus the `FETCHBOX__` namespace
/// prefix since spec.md §6 already names flat, unprefixed env vars.
pub fn load() -> Result<Config, config::ConfigError> {
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_from_path(config_path)
}

pub fn load_from_path(path: PathBuf) -> Result<Config, config::ConfigError> {
    let mut builder = config::Config::builder();

    if path.exists() {
        tracing::info!(path = %path.display(), "loading configuration file");
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(Environment::default().try_parsing(true));

    builder.build()?.try_deserialize()
}
