//! Stack file configuration.
//!
//! - Parsing `fngate.stack.yaml` with `FNGATE_*` overrides and `.env`
//! - Validation of values before any graph is built
//! - Hashing for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, apply_env_overrides, find_config_file};
pub use spec::{
    FaultConfig, OrchestratorSettings, ProjectConfig, ResourceConfig, SandboxSettings,
    StackConfig, StateBackend, StateConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
