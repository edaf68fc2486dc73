//! Kind-specific resource attributes.
//!
//! These types map to the `resources` entries of `fngate.stack.yaml`. The
//! `kind` field selects the variant.

use serde::{Deserialize, Serialize};

use super::descriptor::ResourceId;

/// The kinds of resource a run can manage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// An identity/role the function executes as.
    Role,
    /// A compute function.
    Function,
    /// A public HTTP entry point.
    Gateway,
    /// The wiring that lets a gateway route invoke a function.
    GatewayBinding,
}

/// Kind-specific attributes of a resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    /// Role attributes.
    Role(RoleSpec),
    /// Function attributes.
    Function(FunctionSpec),
    /// Gateway attributes.
    Gateway(GatewaySpec),
    /// Gateway binding attributes.
    GatewayBinding(GatewayBindingSpec),
}

/// Attributes of a role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleSpec {
    /// Role name.
    pub name: String,
    /// Service principal allowed to assume the role.
    #[serde(default = "default_trusted_service")]
    pub trusted_service: String,
    /// Managed policies attached after creation.
    #[serde(default)]
    pub managed_policy_arns: Vec<String>,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional permissions boundary policy.
    #[serde(default)]
    pub permissions_boundary: Option<String>,
}

/// Attributes of a function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionSpec {
    /// Function name.
    pub name: String,
    /// Where the deployment package lives.
    pub code: CodeReference,
    /// Runtime identifier.
    #[serde(default = "default_runtime")]
    pub runtime: String,
    /// Entrypoint inside the package.
    #[serde(default = "default_handler")]
    pub handler: String,
    /// Role the function executes as.
    pub role: ResourceId,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Memory size in MB.
    #[serde(default)]
    pub memory_mb: Option<u32>,
    /// Execution timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u32>,
}

/// Location of a function deployment package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CodeReference {
    /// A local zip archive.
    ZipFile {
        /// Path to the archive.
        path: String,
    },
    /// An object in a bucket.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
    },
}

/// Attributes of a gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewaySpec {
    /// Gateway name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Deployment stage.
    #[serde(default = "default_stage")]
    pub stage: String,
}

/// Attributes of a gateway binding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayBindingSpec {
    /// Function invoked by the route.
    pub function: ResourceId,
    /// Gateway exposing the route.
    pub gateway: ResourceId,
    /// Route path, starting with `/`.
    pub path: String,
    /// HTTP method of the route.
    #[serde(default = "default_http_method")]
    pub http_method: String,
}

impl ResourceSpec {
    /// Returns the kind of this spec.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Role(_) => ResourceKind::Role,
            Self::Function(_) => ResourceKind::Function,
            Self::Gateway(_) => ResourceKind::Gateway,
            Self::GatewayBinding(_) => ResourceKind::GatewayBinding,
        }
    }

    /// Returns the resources this spec refers to by id.
    #[must_use]
    pub fn references(&self) -> Vec<&ResourceId> {
        match self {
            Self::Role(_) | Self::Gateway(_) => Vec::new(),
            Self::Function(f) => vec![&f.role],
            Self::GatewayBinding(b) => vec![&b.function, &b.gateway],
        }
    }

    /// Returns the provider-facing name of the resource, if it has one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Role(r) => Some(&r.name),
            Self::Function(f) => Some(&f.name),
            Self::Gateway(g) => Some(&g.name),
            Self::GatewayBinding(_) => None,
        }
    }
}

impl RoleSpec {
    /// Renders the trust policy allowing `trusted_service` to assume the role.
    #[must_use]
    pub fn trust_policy_document(&self) -> String {
        serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": self.trusted_service },
                "Action": "sts:AssumeRole"
            }]
        })
        .to_string()
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Role => "role",
            Self::Function => "function",
            Self::Gateway => "gateway",
            Self::GatewayBinding => "gateway_binding",
        };
        write!(f, "{s}")
    }
}

fn default_trusted_service() -> String {
    String::from("lambda.amazonaws.com")
}

fn default_runtime() -> String {
    String::from("go1.x")
}

fn default_handler() -> String {
    String::from("main")
}

fn default_stage() -> String {
    String::from("prod")
}

fn default_http_method() -> String {
    String::from("POST")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_function_spec() {
        let yaml = r"
kind: function
name: eks-setup
role: r1
code:
  source: zip_file
  path: ./build/function.zip
";
        let spec: ResourceSpec = serde_yaml::from_str(yaml).expect("valid spec");
        assert_eq!(spec.kind(), ResourceKind::Function);

        let ResourceSpec::Function(f) = &spec else {
            panic!("expected function spec");
        };
        assert_eq!(f.runtime, "go1.x");
        assert_eq!(f.handler, "main");
        assert_eq!(spec.references(), vec![&ResourceId::new("r1")]);
    }

    #[test]
    fn test_binding_references_both_ends() {
        let spec = ResourceSpec::GatewayBinding(GatewayBindingSpec {
            function: ResourceId::new("f1"),
            gateway: ResourceId::new("g1"),
            path: String::from("/eks-setup"),
            http_method: String::from("POST"),
        });
        let refs: Vec<&str> = spec.references().into_iter().map(ResourceId::as_str).collect();
        assert_eq!(refs, vec!["f1", "g1"]);
        assert!(spec.name().is_none());
    }

    #[test]
    fn test_trust_policy_names_service() {
        let role = RoleSpec {
            name: String::from("lambda-eks-role"),
            trusted_service: String::from("lambda.amazonaws.com"),
            managed_policy_arns: vec![],
            description: None,
            permissions_boundary: None,
        };
        let doc = role.trust_policy_document();
        assert!(doc.contains("lambda.amazonaws.com"));
        assert!(doc.contains("sts:AssumeRole"));
    }
}
