//! # Tenant-side Resources
//!
//! Objects written into the virtual cluster. Both are fully owned by this
//! controller: every field is produced by the synthesizer and overwritten on
//! each reconcile.

use crate::crd::{ControllerResource, DeploymentPolicy, OciRepository};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Registration making the extension's resource kinds discoverable in the tenant
#[derive(kube::CustomResource, Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default, JsonSchema)]
#[kube(
    kind = "ControllerRegistration",
    group = "core.extensions.dev",
    version = "v1beta1",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ControllerRegistrationSpec {
    /// Resource kinds served by the extension
    #[serde(default)]
    pub resources: Vec<ControllerResource>,
    /// Deployment references and policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<ControllerRegistrationDeployment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControllerRegistrationDeployment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<DeploymentPolicy>,
    #[serde(default)]
    pub deployment_refs: Vec<DeploymentRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct DeploymentRef {
    pub name: String,
}

/// Deployment record describing how to fetch and run the extension chart
#[derive(kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, Default, JsonSchema)]
#[kube(
    kind = "ControllerDeployment",
    group = "core.extensions.dev",
    version = "v1",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ControllerDeploymentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmControllerDeployment>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HelmControllerDeployment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oci_repository: Option<OciRepository>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::crd::preserve_unknown_fields")]
    pub values: Option<serde_json::Value>,
}
