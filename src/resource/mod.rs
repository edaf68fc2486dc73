//! Resource descriptors.
//!
//! A descriptor is the immutable, caller-owned description of one cloud
//! resource: its identity, its kind-specific attributes and the other
//! resources it depends on.

mod descriptor;
mod spec;

pub use descriptor::{ResourceDescriptor, ResourceId};
pub use spec::{
    CodeReference, FunctionSpec, GatewayBindingSpec, GatewaySpec, ResourceKind, ResourceSpec,
    RoleSpec,
};
