use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;
use serde::Deserialize;

use crate::auth::Token;
use crate::error::{CiscopeError, Result};
use crate::models::{Environment, System};
use crate::sources::elasticsearch::ElasticsearchSource;
use crate::sources::jenkins::JenkinsSource;
use crate::sources::Source;

/// The configuration surface: environment name → system name → systems
/// with their sources. Strict structs, so a typo surfaces as one
/// `InvalidConfiguration` naming the offending field instead of being
/// silently ignored.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub environments: IndexMap<String, IndexMap<String, SystemConfig>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    #[serde(default = "default_system_type")]
    pub system_type: String,
    #[serde(default)]
    pub sources: IndexMap<String, SourceConfig>,
}

fn default_system_type() -> String {
    "jenkins".into()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub driver: Driver,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub url: String,
    /// Elasticsearch only.
    pub index: Option<String>,
    /// Jenkins only.
    pub username: Option<String>,
    pub token: Option<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Jenkins,
    Elasticsearch,
}

pub fn load(path: &Path) -> Result<ConfigFile> {
    debug!("loading configuration from {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|e| {
        CiscopeError::InvalidConfiguration(format!("cannot read '{}': {e}", path.display()))
    })?;
    parse(&text)
}

pub fn parse(text: &str) -> Result<ConfigFile> {
    serde_yaml::from_str(text).map_err(|e| CiscopeError::InvalidConfiguration(e.to_string()))
}

/// Turn the parsed file into the model skeleton the orchestrator
/// populates: every environment and system exists up front, each system
/// carrying its constructed sources.
pub fn build_environments(config: ConfigFile) -> Result<Vec<Environment>> {
    let mut environments = Vec::new();
    for (env_name, systems) in config.environments {
        let mut environment = Environment::new(&env_name);
        for (system_name, system_config) in systems {
            let mut sources: Vec<Arc<dyn Source>> = Vec::new();
            for (source_name, source_config) in &system_config.sources {
                sources.push(build_source(source_name, source_config)?);
            }
            environment.add_system(System::new(
                &system_name,
                &system_config.system_type,
                sources,
            ));
        }
        environments.push(environment);
    }
    Ok(environments)
}

fn build_source(name: &str, config: &SourceConfig) -> Result<Arc<dyn Source>> {
    match config.driver {
        Driver::Jenkins => Ok(Arc::new(JenkinsSource::new(
            name,
            &config.url,
            config.username.clone(),
            config.token.clone().map(Token::from),
            config.priority,
            config.enabled,
        )?)),
        Driver::Elasticsearch => {
            let index = config.index.as_deref().ok_or_else(|| {
                CiscopeError::InvalidConfiguration(format!(
                    "source '{name}': the elasticsearch driver requires 'index'"
                ))
            })?;
            Ok(Arc::new(ElasticsearchSource::new(
                name,
                &config.url,
                index,
                config.token.clone().map(Token::from),
                config.priority,
                config.enabled,
            )?))
        }
    }
}
