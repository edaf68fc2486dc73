//! Stack validation.
//!
//! Checks value formats only. Structural problems between resources
//! (duplicates, dangling references, cycles) are reported by the graph
//! builder.

use tracing::debug;

use crate::error::{ConfigError, FngateError, Result};
use crate::resource::{CodeReference, ResourceSpec};

use super::spec::{ProjectConfig, ResourceConfig, StackConfig, StateBackend};

/// HTTP methods a binding may route.
const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS", "ANY"];

/// Validator for stack files.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Everything the validator found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Errors, in discovery order.
    pub errors: Vec<ValidationError>,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// Path of the offending field.
    pub field: String,
    /// What is wrong.
    pub message: String,
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if no error was found.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl ConfigValidator {
    /// Creates a validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Collects every problem without failing.
    #[must_use]
    pub fn check(&self, config: &StackConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_state(config, &mut result);
        Self::validate_orchestrator(config, &mut result);

        if config.resources.is_empty() {
            result.warnings.push(String::from("Stack declares no resources"));
        }
        for (i, resource) in config.resources.iter().enumerate() {
            Self::validate_resource(i, resource, &mut result);
        }

        let ids: std::collections::BTreeSet<_> = config.resources.iter().map(|r| &r.id).collect();
        for (i, fault) in config.sandbox.faults.iter().enumerate() {
            if !ids.contains(&fault.resource) {
                result.warnings.push(format!(
                    "sandbox.faults[{i}] targets unknown resource '{}'",
                    fault.resource
                ));
            }
        }

        result
    }

    /// Validates a stack, failing on the first error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for the first problem found.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let result = self.check(config);
        match result.errors.first() {
            None => {
                debug!("Stack validation passed");
                Ok(result)
            }
            Some(first) => Err(FngateError::Config(ConfigError::validation(
                first.message.clone(),
                first.field.clone(),
            ))),
        }
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }
        if !is_valid_name(&project.environment) {
            result.error(
                "project.environment",
                format!("Environment '{}' is invalid", project.environment),
            );
        }
        if let Some(account) = &project.account_id {
            if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
                result.error("project.account_id", "Account id must be 12 digits");
            }
        }
    }

    fn validate_state(config: &StackConfig, result: &mut ValidationResult) {
        let state = &config.state;
        if state.backend == StateBackend::S3 && state.bucket.as_deref().is_none_or(str::is_empty) {
            result.error("state.bucket", "S3 backend requires a bucket");
        }
        if state.backend == StateBackend::Local && state.bucket.is_some() {
            result
                .warnings
                .push(String::from("state.bucket is ignored by the local backend"));
        }
    }

    fn validate_orchestrator(config: &StackConfig, result: &mut ValidationResult) {
        let settings = &config.orchestrator;
        if settings.max_concurrency == Some(0) {
            result.error("orchestrator.max_concurrency", "Must be at least 1");
        }
        if settings.max_attempts == Some(0) {
            result.error("orchestrator.max_attempts", "Must be at least 1");
        }
        if let (Some(initial), Some(max)) = (settings.initial_backoff_ms, settings.max_backoff_ms) {
            if initial > max {
                result.error(
                    "orchestrator.initial_backoff_ms",
                    "Initial backoff exceeds max_backoff_ms",
                );
            }
        }
        if settings.ready_timeout_secs == Some(0) || settings.gone_timeout_secs == Some(0) {
            result.error("orchestrator", "Wait timeouts must be at least 1 second");
        }
    }

    fn validate_resource(index: usize, resource: &ResourceConfig, result: &mut ValidationResult) {
        let field = format!("resources[{index}]");

        if resource.id.as_str().trim().is_empty() {
            result.error(format!("{field}.id"), "Resource id cannot be empty");
        }
        if resource.depends_on.iter().any(|d| d.as_str().trim().is_empty()) {
            result.error(format!("{field}.depends_on"), "Dependency ids cannot be empty");
        }
        if let Some(name) = resource.spec.name() {
            if !is_valid_name(name) {
                result.error(
                    format!("{field}.name"),
                    format!("Name '{name}' is invalid. Must be lowercase alphanumeric with hyphens."),
                );
            }
        }

        match &resource.spec {
            ResourceSpec::Role(role) => {
                if role.trusted_service.trim().is_empty() {
                    result.error(format!("{field}.trusted_service"), "Trusted service cannot be empty");
                }
                for (i, arn) in role.managed_policy_arns.iter().enumerate() {
                    if !arn.starts_with("arn:") {
                        result.error(
                            format!("{field}.managed_policy_arns[{i}]"),
                            format!("'{arn}' is not an ARN"),
                        );
                    }
                }
                if let Some(boundary) = &role.permissions_boundary {
                    if !boundary.starts_with("arn:") {
                        result.error(
                            format!("{field}.permissions_boundary"),
                            format!("'{boundary}' is not an ARN"),
                        );
                    }
                }
            }
            ResourceSpec::Function(function) => {
                if function.runtime.trim().is_empty() {
                    result.error(format!("{field}.runtime"), "Runtime cannot be empty");
                }
                if function.handler.trim().is_empty() {
                    result.error(format!("{field}.handler"), "Handler cannot be empty");
                }
                match &function.code {
                    CodeReference::ZipFile { path } if path.trim().is_empty() => {
                        result.error(format!("{field}.code.path"), "Code path cannot be empty");
                    }
                    CodeReference::S3 { bucket, key } if bucket.is_empty() || key.is_empty() => {
                        result.error(format!("{field}.code"), "S3 code needs a bucket and a key");
                    }
                    _ => {}
                }
                if function.memory_mb.is_some_and(|mb| !(128..=10_240).contains(&mb)) {
                    result.error(format!("{field}.memory_mb"), "Memory must be between 128 and 10240 MB");
                }
                if function.timeout_secs.is_some_and(|secs| !(1..=900).contains(&secs)) {
                    result.error(format!("{field}.timeout_secs"), "Timeout must be between 1 and 900 seconds");
                }
            }
            ResourceSpec::Gateway(gateway) => {
                if gateway.stage.trim().is_empty() {
                    result.error(format!("{field}.stage"), "Stage cannot be empty");
                }
            }
            ResourceSpec::GatewayBinding(binding) => {
                if !binding.path.starts_with('/') {
                    result.error(
                        format!("{field}.path"),
                        format!("Path '{}' must start with '/'", binding.path),
                    );
                }
                if !HTTP_METHODS.contains(&binding.http_method.as_str()) {
                    result.error(
                        format!("{field}.http_method"),
                        format!("Unknown HTTP method '{}'", binding.http_method),
                    );
                }
            }
        }
    }
}

/// Names are lowercase alphanumeric with single hyphens, starting with a
/// letter and not ending with a hyphen.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    first.is_ascii_lowercase()
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-')
        && !name.contains("--")
}
