use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::MigrateError;

pub const CONFIG_ENV: &str = "REDMINE_MIGRATE_CONFIG";
pub const DEFAULT_AZURE_BASE_URL: &str = "https://dev.azure.com";
pub const DEFAULT_WORK_ITEM_TYPE: &str = "Issue";
pub const DEFAULT_INITIAL_STATE: &str = "To Do";
pub const DEFAULT_TAG: &str = "redmine";

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    pub redmine: Option<RedmineConfig>,
    pub azure: Option<AzureConfig>,
    #[serde(default)]
    pub mapping: MappingConfig,
    pub wiki: Option<WikiConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Default)]
pub struct RedmineConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default)]
    pub issues: IssueFilter,
}

/// Which issues to pull from Redmine. When `ids` is set the other fields are ignored.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IssueFilter {
    pub project_id: Option<String>,
    #[serde(default = "default_status_id")]
    pub status_id: String,
    pub created_on: Option<String>,
    #[serde(default = "default_sort")]
    pub sort: String,
    pub ids: Option<Vec<u64>>,
}

impl Default for IssueFilter {
    fn default() -> Self {
        Self {
            project_id: None,
            status_id: default_status_id(),
            created_on: None,
            sort: default_sort(),
            ids: None,
        }
    }
}

fn default_status_id() -> String {
    "*".into()
}

fn default_sort() -> String {
    "created_on".into()
}

#[derive(Debug, Deserialize, Default)]
pub struct AzureConfig {
    pub organization: Option<String>,
    pub project: Option<String>,
    pub token: Option<String>,
    pub base_url: Option<String>,
    pub work_item_type: Option<String>,
    pub initial_state: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct MappingConfig {
    /// Redmine status name -> Azure DevOps state.
    #[serde(default)]
    pub status: HashMap<String, String>,
    /// Redmine user name -> Azure DevOps user.
    #[serde(default)]
    pub authors: HashMap<String, String>,
    pub default_assignee: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct WikiConfig {
    pub project_id: Option<String>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
pub struct OutputConfig {
    pub id_map_dir: Option<PathBuf>,
    pub resume_from: Option<PathBuf>,
}

/// Fully resolved Redmine connection settings.
#[derive(Debug, Clone)]
pub struct RedmineSettings {
    pub url: String,
    pub api_key: String,
}

/// Fully resolved Azure DevOps connection and creation settings.
#[derive(Debug, Clone)]
pub struct AzureSettings {
    pub base_url: String,
    pub organization: String,
    pub project: String,
    pub token: String,
    pub work_item_type: String,
    pub initial_state: String,
    pub tag: String,
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn require(value: Option<String>, key: &'static str) -> Result<String, MigrateError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(MigrateError::MissingConfig(key))
}

impl AppConfig {
    /// Redmine url and key: env REDMINE_URL / REDMINE_API_KEY > config.
    pub fn redmine_settings(&self) -> Result<RedmineSettings, MigrateError> {
        let section = self.redmine.as_ref();
        let url = env_override("REDMINE_URL").or_else(|| section.and_then(|r| r.url.clone()));
        let api_key =
            env_override("REDMINE_API_KEY").or_else(|| section.and_then(|r| r.api_key.clone()));
        Ok(RedmineSettings {
            url: require(url, "redmine.url")?.trim_end_matches('/').to_string(),
            api_key: require(api_key, "redmine.api_key")?,
        })
    }

    /// Azure settings: env AZURE_DEVOPS_ORG / _PROJECT / _TOKEN > config > defaults.
    pub fn azure_settings(&self) -> Result<AzureSettings, MigrateError> {
        let section = self.azure.as_ref();
        let pick = |env: &str, f: fn(&AzureConfig) -> Option<String>| {
            env_override(env).or_else(|| section.and_then(f))
        };
        Ok(AzureSettings {
            base_url: section
                .and_then(|a| a.base_url.clone())
                .unwrap_or_else(|| DEFAULT_AZURE_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            organization: require(
                pick("AZURE_DEVOPS_ORG", |a| a.organization.clone()),
                "azure.organization",
            )?,
            project: require(
                pick("AZURE_DEVOPS_PROJECT", |a| a.project.clone()),
                "azure.project",
            )?,
            token: require(pick("AZURE_DEVOPS_TOKEN", |a| a.token.clone()), "azure.token")?,
            work_item_type: section
                .and_then(|a| a.work_item_type.clone())
                .unwrap_or_else(|| DEFAULT_WORK_ITEM_TYPE.into()),
            initial_state: section
                .and_then(|a| a.initial_state.clone())
                .unwrap_or_else(|| DEFAULT_INITIAL_STATE.into()),
            tag: section
                .and_then(|a| a.tag.clone())
                .unwrap_or_else(|| DEFAULT_TAG.into()),
        })
    }

    pub fn issue_filter(&self) -> Result<IssueFilter, MigrateError> {
        let filter = self
            .redmine
            .as_ref()
            .map(|r| r.issues.clone())
            .unwrap_or_default();
        if filter.ids.is_none() && filter.project_id.is_none() {
            return Err(MigrateError::MissingConfig("redmine.issues.project_id"));
        }
        Ok(filter)
    }

    pub fn wiki_project(&self) -> Result<String, MigrateError> {
        require(
            self.wiki.as_ref().and_then(|w| w.project_id.clone()),
            "wiki.project_id",
        )
    }

    pub fn wiki_output_dir(&self) -> PathBuf {
        self.wiki
            .as_ref()
            .and_then(|w| w.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn id_map_dir(&self) -> PathBuf {
        self.output
            .id_map_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn home_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".redmine-migrate")
        .join("config.toml")
}

/// Pick the config file: explicit path > $REDMINE_MIGRATE_CONFIG > ./migrate.toml > ~/.redmine-migrate/config.toml.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = env_override(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    let local = PathBuf::from("migrate.toml");
    if local.exists() {
        return local;
    }
    home_config_path()
}

pub fn parse_config(contents: &str) -> Result<AppConfig> {
    toml::from_str(contents).with_context(|| "Failed to parse migration config")
}

/// Load the config. A missing file yields the default config so env-only setups work.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let path = config_path(explicit);
    if !path.exists() {
        if explicit.is_some() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }
        tracing::debug!(path = %path.display(), "no config file, using defaults and environment");
        return Ok(AppConfig::default());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("in {}", path.display()))
}
