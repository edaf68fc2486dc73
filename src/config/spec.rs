//! Stack file types.
//!
//! These structs map one-to-one to `fngate.stack.yaml`. A stack declares the
//! project identity, where state is kept, how runs are tuned and the list of
//! resources to provision.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::orchestrator::{OrchestratorConfig, RetryPolicy};
use crate::provider::{Fault, SandboxConfig};
use crate::resource::{ResourceDescriptor, ResourceId, ResourceSpec};

/// The root of a stack file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Project identity.
    pub project: ProjectConfig,
    /// State backend.
    #[serde(default)]
    pub state: StateConfig,
    /// Run tuning.
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    /// Sandbox provider behavior.
    #[serde(default)]
    pub sandbox: SandboxSettings,
    /// Resources to provision.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// Project identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Project name.
    pub name: String,
    /// Environment, e.g. "dev" or "prod".
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Cloud region.
    #[serde(default)]
    pub region: Option<String>,
    /// Cloud account id.
    #[serde(default)]
    pub account_id: Option<String>,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// State file path for the local backend.
    #[serde(default)]
    pub path: Option<String>,
    /// Bucket for the s3 backend.
    #[serde(default)]
    pub bucket: Option<String>,
    /// Key prefix for the s3 backend.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Bucket region for the s3 backend.
    #[serde(default)]
    pub region: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// File next to the stack.
    #[default]
    Local,
    /// S3 bucket.
    S3,
}

/// Run tuning. Unset fields keep the orchestrator defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Maximum provider calls in flight.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Calls per operation, including the first.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// First backoff delay.
    #[serde(default)]
    pub initial_backoff_ms: Option<u64>,
    /// Backoff ceiling.
    #[serde(default)]
    pub max_backoff_ms: Option<u64>,
    /// Readiness wait bound.
    #[serde(default)]
    pub ready_timeout_secs: Option<u64>,
    /// Deletion wait bound.
    #[serde(default)]
    pub gone_timeout_secs: Option<u64>,
    /// Whole-run bound; 0 disables it.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
}

/// Sandbox provider settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SandboxSettings {
    /// Upper bound of the random latency added to each call.
    #[serde(default)]
    pub latency_ms: Option<u64>,
    /// Polls before a created resource is ready.
    #[serde(default)]
    pub ready_after_polls: Option<u32>,
    /// Injected faults.
    #[serde(default)]
    pub faults: Vec<FaultConfig>,
}

/// A fault bound to one resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaultConfig {
    /// Target resource.
    pub resource: ResourceId,
    /// The fault.
    #[serde(flatten)]
    pub fault: Fault,
}

/// One resource entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Stack-unique id.
    pub id: ResourceId,
    /// Ordering constraints on top of the implied references.
    #[serde(default)]
    pub depends_on: Vec<ResourceId>,
    /// Kind and attributes.
    #[serde(flatten)]
    pub spec: ResourceSpec,
}

impl StackConfig {
    /// Builds the descriptors for the graph builder.
    #[must_use]
    pub fn descriptors(&self) -> Vec<ResourceDescriptor> {
        self.resources
            .iter()
            .map(|r| ResourceDescriptor::new(r.id.clone(), r.spec.clone()).depends_on(r.depends_on.clone()))
            .collect()
    }

    /// Builds the orchestrator configuration.
    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let settings = &self.orchestrator;
        let defaults = OrchestratorConfig::default();

        let retry = RetryPolicy {
            max_attempts: settings.max_attempts.unwrap_or(defaults.retry.max_attempts),
            initial_backoff: settings
                .initial_backoff_ms
                .map_or(defaults.retry.initial_backoff, Duration::from_millis),
            max_backoff: settings
                .max_backoff_ms
                .map_or(defaults.retry.max_backoff, Duration::from_millis),
            ..defaults.retry
        };
        let run_timeout = match settings.run_timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.run_timeout,
        };

        OrchestratorConfig::default()
            .with_concurrency(settings.max_concurrency.unwrap_or(defaults.max_concurrency))
            .with_retry(retry)
            .with_wait_timeouts(
                settings
                    .ready_timeout_secs
                    .map_or(defaults.ready_timeout, Duration::from_secs),
                settings
                    .gone_timeout_secs
                    .map_or(defaults.gone_timeout, Duration::from_secs),
            )
            .with_run_timeout(run_timeout)
    }

    /// Builds the sandbox configuration.
    #[must_use]
    pub fn sandbox_config(&self) -> SandboxConfig {
        let defaults = SandboxConfig::default();
        SandboxConfig {
            region: self.project.region.clone().unwrap_or(defaults.region),
            account_id: self.project.account_id.clone().unwrap_or(defaults.account_id),
            ready_after_polls: self.sandbox.ready_after_polls.unwrap_or(defaults.ready_after_polls),
            max_latency: self.sandbox.latency_ms.map(Duration::from_millis),
            faults: self
                .sandbox
                .faults
                .iter()
                .map(|f| (f.resource.clone(), f.fault.clone()))
                .collect(),
            ..defaults
        }
    }
}

fn default_environment() -> String {
    String::from("dev")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    const STACK: &str = r"
project:
  name: shop
  region: eu-west-1
orchestrator:
  max_concurrency: 2
  max_attempts: 5
  run_timeout_secs: 0
sandbox:
  latency_ms: 20
  faults:
    - resource: f1
      type: never_ready
resources:
  - id: r1
    kind: role
    name: shop-role
  - id: f1
    kind: function
    name: shop-fn
    role: r1
    code:
      source: zip_file
      path: build/handler.zip
  - id: g1
    kind: gateway
    name: shop-api
    depends_on: [r1]
";

    #[test]
    fn test_descriptors_carry_implied_and_explicit_deps() {
        let config: StackConfig = serde_yaml::from_str(STACK).unwrap();
        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.state.backend, StateBackend::Local);

        let descriptors = config.descriptors();
        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors[1].kind(), ResourceKind::Function);
        assert!(descriptors[1].dependencies().contains(&ResourceId::new("r1")));
        assert!(descriptors[2].dependencies().contains(&ResourceId::new("r1")));
    }

    #[test]
    fn test_orchestrator_settings_override_defaults() {
        let config: StackConfig = serde_yaml::from_str(STACK).unwrap();
        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.max_concurrency, 2);
        assert_eq!(orchestrator.retry.max_attempts, 5);
        assert_eq!(orchestrator.run_timeout, None);
        assert_eq!(
            orchestrator.ready_timeout,
            OrchestratorConfig::default().ready_timeout
        );
    }

    #[test]
    fn test_sandbox_settings() {
        let config: StackConfig = serde_yaml::from_str(STACK).unwrap();
        let sandbox = config.sandbox_config();
        assert_eq!(sandbox.region, "eu-west-1");
        assert_eq!(sandbox.account_id, "000000000000");
        assert_eq!(sandbox.max_latency, Some(Duration::from_millis(20)));
        assert_eq!(sandbox.faults.get(&ResourceId::new("f1")), Some(&Fault::NeverReady));
    }
}
