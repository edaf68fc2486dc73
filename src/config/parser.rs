//! Stack file loading.
//!
//! Loads YAML, applies `FNGATE_*` environment overrides and optionally a
//! `.env` file next to the stack.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, FngateError, Result};

use super::spec::StackConfig;

/// Stack file names searched for, in order.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "fngate.stack.yaml",
    "fngate.stack.yml",
    "stack.yaml",
    "stack.yml",
];

/// Loader for stack files.
#[derive(Debug, Default)]
pub struct ConfigParser {
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory where `.env` is looked up.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a stack file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let path = path.as_ref();
        info!("Loading stack from: {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FngateError::Config(ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                })
            } else {
                FngateError::Config(ConfigError::ParseError {
                    message: format!("Failed to read file: {e}"),
                    location: Some(path.display().to_string()),
                })
            }
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a stack from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<StackConfig> {
        let config: StackConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = match (source, e.location()) {
                (Some(p), Some(loc)) => Some(format!("{}:{}:{}", p.display(), loc.line(), loc.column())),
                (Some(p), None) => Some(p.display().to_string()),
                (None, Some(loc)) => Some(format!("line {}, column {}", loc.line(), loc.column())),
                (None, None) => None,
            };
            FngateError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            project = %config.project.name,
            resources = config.resources.len(),
            "Parsed stack"
        );
        Ok(config)
    }

    /// Loads a stack file and applies process environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let mut config = self.load_file(path)?;
        apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Loads `.env` from the base path, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if !env_path.exists() {
            debug!(".env file not found at: {}", env_path.display());
            return Ok(());
        }

        info!("Loading environment from: {}", env_path.display());
        dotenvy::from_path(&env_path).map_err(|e| {
            FngateError::Config(ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })
        })
    }
}

/// Applies `FNGATE_*` overrides looked up through `lookup`.
pub fn apply_env_overrides<F>(config: &mut StackConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(name) = lookup("FNGATE_PROJECT_NAME") {
        debug!("Overriding project.name from environment");
        config.project.name = name;
    }
    if let Some(environment) = lookup("FNGATE_PROJECT_ENVIRONMENT") {
        debug!("Overriding project.environment from environment");
        config.project.environment = environment;
    }
    if let Some(region) = lookup("FNGATE_PROJECT_REGION") {
        debug!("Overriding project.region from environment");
        config.project.region = Some(region);
    }
    if let Some(account) = lookup("FNGATE_ACCOUNT_ID") {
        debug!("Overriding project.account_id from environment");
        config.project.account_id = Some(account);
    }
    if let Some(bucket) = lookup("FNGATE_STATE_BUCKET") {
        debug!("Overriding state.bucket from environment");
        config.state.bucket = Some(bucket);
    }
    if let Some(prefix) = lookup("FNGATE_STATE_PREFIX") {
        debug!("Overriding state.prefix from environment");
        config.state.prefix = Some(prefix);
    }
}

/// Finds a stack file in `start_dir` or any parent.
///
/// # Errors
///
/// Returns an error if no stack file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let candidate = current.join(filename);
            if candidate.is_file() {
                info!("Found stack file: {}", candidate.display());
                return Ok(candidate);
            }
        }
        if !current.pop() {
            break;
        }
    }

    Err(FngateError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
