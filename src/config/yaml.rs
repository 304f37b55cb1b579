//! YAML configuration parsing.
//!
//! Parses `homeguard.yaml` and applies `HOMEGUARD_<SECTION>__<KEY>`
//! environment overrides on top of it.

use serde_yaml::Value;
use std::path::Path;

use super::error::ConfigError;
use super::types::EngineConfig;

/// Prefix of environment variables that override configuration keys.
pub const ENV_PREFIX: &str = "HOMEGUARD_";

/// Separator between section and key in an override variable name.
const ENV_SEPARATOR: &str = "__";

/// Loader for YAML configuration files.
pub struct YamlLoader;

impl YamlLoader {
    /// Load configuration from a file, apply overrides from the process
    /// environment and validate the result.
    pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse_unvalidated(&content).map_err(|source| ConfigError::YamlFileError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::finish(config)
    }

    /// Load configuration from `path` if given, otherwise start from the
    /// defaults. Environment overrides apply either way.
    pub fn load(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
        match path {
            Some(path) => Self::load_config(path),
            None => Self::finish(EngineConfig::default()),
        }
    }

    /// Parse and validate configuration from a YAML string. The environment
    /// is not consulted.
    pub fn parse_config(yaml: &str) -> Result<EngineConfig, ConfigError> {
        let config = Self::parse_unvalidated(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HOMEGUARD_<SECTION>__<KEY>=value` overrides from `vars`.
    ///
    /// Section and key are matched case-insensitively against the YAML
    /// names. Values are parsed as YAML scalars, so `8`, `true` and
    /// `json` all take their natural type. Variables without the prefix or
    /// separator are ignored.
    pub fn apply_env_overrides<I>(
        config: EngineConfig,
        vars: I,
    ) -> Result<EngineConfig, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut overrides: Vec<_> = vars
            .into_iter()
            .filter_map(|(key, value)| {
                let rest = key.strip_prefix(ENV_PREFIX)?;
                let (section, field) = rest.split_once(ENV_SEPARATOR)?;
                let section = section.to_ascii_lowercase();
                let field = field.to_ascii_lowercase();
                Some((key, section, field, value))
            })
            .collect();
        if overrides.is_empty() {
            return Ok(config);
        }
        overrides.sort_by(|a, b| a.0.cmp(&b.0));

        let mut config = config;
        for (key, section, field, raw) in overrides {
            let mut tree = serde_yaml::to_value(&config)?;
            let entries = tree
                .get_mut(section.as_str())
                .and_then(Value::as_mapping_mut);
            let Some(entries) = entries else {
                return Err(ConfigError::EnvOverride {
                    key,
                    message: format!("unknown section '{}'", section),
                });
            };
            if !entries.contains_key(field.as_str()) {
                return Err(ConfigError::EnvOverride {
                    key,
                    message: format!("unknown key '{}.{}'", section, field),
                });
            }
            entries.insert(Value::String(field), parse_scalar(&raw));

            config = serde_yaml::from_value(tree).map_err(|e| ConfigError::EnvOverride {
                key,
                message: e.to_string(),
            })?;
        }
        Ok(config)
    }

    fn parse_unvalidated(yaml: &str) -> Result<EngineConfig, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(EngineConfig::default());
        }
        serde_yaml::from_str(yaml)
    }

    fn finish(config: EngineConfig) -> Result<EngineConfig, ConfigError> {
        let config = Self::apply_env_overrides(config, std::env::vars())?;
        config.validate()?;
        Ok(config)
    }
}

fn parse_scalar(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
