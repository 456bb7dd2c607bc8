/// `load_config` module: loads the static YAML config, applies environment overrides and
/// resolves it into the core's [`PipelineConfig`] plus the CLI-only repository settings.
///
/// This module is the only place where untrusted YAML is parsed. Everything it returns
/// has passed [`PipelineConfig::validate`], so the core never sees an incomplete source.
///
/// # Environment
/// - `REPO` overrides the `repository` key (`owner/name`).
///
/// Secrets (`GITHUB_TOKEN`) are not read here; see [`crate::github`].
///
/// # Errors
/// All errors use `anyhow::Error` and surface at the CLI boundary.
use anyhow::{anyhow, Context, Result};
use input_bot_core::config::{MissingPlaceholderPolicy, PipelineConfig, SourceConfig};
use input_bot_core::sources::Endpoints;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fully resolved configuration for one CLI invocation.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub pipeline: PipelineConfig,
    /// `owner/name` of the content repository.
    pub repository: String,
    pub base_branch: String,
    pub endpoints: Endpoints,
    /// Per-request timeout for every HTTP client.
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    repository: Option<String>,
    base_branch: Option<String>,
    content_root: Option<String>,
    bot_name: Option<String>,
    branch_prefix: Option<String>,
    #[serde(default)]
    missing_placeholder: MissingPlaceholderPolicy,
    #[serde(default)]
    sources: Option<Vec<SourceConfig>>,
    #[serde(default)]
    endpoints: Endpoints,
    timeout_secs: Option<u64>,
}

fn is_owner_and_name(repository: &str) -> bool {
    matches!(
        repository.split_once('/'),
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/')
    )
}

/// Loads a static YAML config file and applies environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let repository = match env::var("REPO") {
        Ok(repo) if !repo.trim().is_empty() => {
            info!(repository = %repo, "Repository taken from REPO environment variable");
            repo.trim().to_string()
        }
        _ => raw
            .repository
            .map(|r| r.trim().to_string())
            .ok_or_else(|| anyhow!("No repository configured: set `repository` or REPO"))?,
    };
    if !is_owner_and_name(&repository) {
        error!(%repository, "Repository is not of the form owner/name");
        return Err(anyhow!("Repository must be `owner/name`, got {repository:?}"));
    }

    let defaults = PipelineConfig::default();
    let pipeline = PipelineConfig {
        content_root: raw.content_root.unwrap_or(defaults.content_root),
        bot_name: raw.bot_name.unwrap_or(defaults.bot_name),
        branch_prefix: raw.branch_prefix.unwrap_or(defaults.branch_prefix),
        missing_placeholder: raw.missing_placeholder,
        sources: raw
            .sources
            .unwrap_or_default()
            .into_iter()
            .map(Arc::new)
            .collect(),
    };
    pipeline
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path_ref.display()))?;
    pipeline.trace_loaded();

    Ok(CliConfig {
        pipeline,
        repository,
        base_branch: raw.base_branch.unwrap_or_else(|| "main".to_string()),
        endpoints: raw.endpoints,
        timeout: Duration::from_secs(raw.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
    })
}
