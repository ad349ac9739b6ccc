//! # Extension Spec
//!
//! The management-side resource describing an extension that must be registered
//! in the tenant (virtual) cluster.

use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};

/// Extension Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: operator.extensions.dev/v1alpha1
/// kind: Extension
/// metadata:
///   name: provider-local
/// spec:
///   resources:
///     - kind: Worker
///       type: local
///   deployment:
///     extension:
///       helm:
///         ociRepository:
///           ref: registry.example.com/charts/provider-local:v1.2.0
///       policy: Always
/// ```
#[derive(
    kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, Default, JsonSchema,
)]
#[kube(
    kind = "Extension",
    group = "operator.extensions.dev",
    version = "v1alpha1",
    status = "crate::crd::ExtensionStatus",
    shortname = "ext",
    printcolumn = r#"{"name":"Reconciled", "type":"string", "jsonPath":".status.conditions[?(@.type==\"VirtualClusterExtensionReconciled\")].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSpec {
    /// Resource kinds handled by this extension
    #[serde(default)]
    pub resources: Vec<ControllerResource>,
    /// Deployment descriptor pointing at the packaged extension content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
}

/// A resource kind/type pair served by an extension
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControllerResource {
    /// Kind of the extension resource (e.g. Worker, Infrastructure, DNSRecord)
    pub kind: String,
    /// Type of the extension resource (e.g. aws, local)
    pub r#type: String,
    /// Whether this extension is the primary controller for the kind/type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,
    /// Enable the resource for all tenants regardless of their own configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub globally_enabled: Option<bool>,
    /// Timeout for reconciling resources of this kind (duration string, e.g. "10m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconcile_timeout: Option<String>,
    /// Lifecycle ordering relative to the tenant's control plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<ControllerResourceLifecycle>,
    /// Whether the resource is also supported for workerless tenants
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workerless_supported: Option<bool>,
}

/// Strategy for each lifecycle phase
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControllerResourceLifecycle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<LifecycleStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<LifecycleStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrate: Option<LifecycleStrategy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum LifecycleStrategy {
    BeforeKubeAPIServer,
    AfterKubeAPIServer,
    AfterWorker,
}

/// Deployment descriptor of an extension
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Deployment of the extension controller itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<ExtensionDeploymentSpec>,
}

/// How the extension controller is deployed into tenant clusters
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionDeploymentSpec {
    /// Helm chart reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<ExtensionHelm>,
    /// Values passed to the chart
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub values: Option<serde_json::Value>,
    /// When the extension should be installed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<DeploymentPolicy>,
}

/// Helm chart location
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionHelm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oci_repository: Option<OciRepository>,
}

/// Reference to a chart stored in an OCI registry.
///
/// Either `ref` alone, or `repository` together with `tag` and/or `digest`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OciRepository {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl OciRepository {
    /// Full chart reference as pulled by tenant-side installers
    #[must_use]
    pub fn full_ref(&self) -> Option<String> {
        if let Some(r) = self.r#ref.as_deref().filter(|r| !r.is_empty()) {
            return Some(r.to_string());
        }
        let repository = self.repository.as_deref().filter(|r| !r.is_empty())?;
        let mut full = repository.to_string();
        if let Some(tag) = self.tag.as_deref().filter(|t| !t.is_empty()) {
            full.push(':');
            full.push_str(tag);
        }
        if let Some(digest) = self.digest.as_deref().filter(|d| !d.is_empty()) {
            full.push('@');
            full.push_str(digest);
        }
        Some(full)
    }
}

/// Installation policy for an extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum DeploymentPolicy {
    /// Install only where a tenant references one of the resources
    OnDemand,
    /// Install everywhere
    Always,
    /// Install everywhere except on tenants without workloads
    AlwaysExceptNoShoots,
}

impl Extension {
    /// Whether the object has been marked for deletion
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the object carries the given finalizer
    #[must_use]
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|s| s == finalizer))
    }

    /// Conditions currently recorded on the status
    #[must_use]
    pub fn conditions(&self) -> &[crate::crd::Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}

/// Schema for free-form JSON values (chart values)
pub(crate) fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}
