//! # Garden
//!
//! The readiness dependency: a cluster-scoped singleton describing the tenant
//! (virtual) control plane. This controller only reads it.

use serde::{Deserialize, Serialize};

/// Garden Custom Resource Definition
///
/// Only the parts of the resource this controller consumes are modelled; the
/// spec sections are kept as free-form JSON.
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[kube(
    kind = "Garden",
    group = "operator.extensions.dev",
    version = "v1alpha1",
    status = "GardenStatus",
    printcolumn = r#"{"name":"Last Operation", "type":"string", "jsonPath":".status.lastOperation.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GardenSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::crd::preserve_unknown_fields")]
    pub runtime_cluster: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::crd::preserve_unknown_fields")]
    pub virtual_cluster: Option<serde_json::Value>,
}

/// Observed state of the Garden
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GardenStatus {
    /// Last operation performed on the Garden
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,
    /// Access information for the virtual cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_cluster: Option<VirtualClusterAccess>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Summary of the last operation performed on a resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    pub r#type: LastOperationType,
    pub state: LastOperationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum LastOperationType {
    Create,
    Reconcile,
    Delete,
    Migrate,
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum LastOperationState {
    Processing,
    Succeeded,
    Error,
    Failed,
    Pending,
    Aborted,
}

/// Where the kubeconfig for the virtual cluster can be found
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualClusterAccess {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_secret_ref: Option<KubeconfigSecretRef>,
}

/// Reference to a Secret holding a kubeconfig
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeconfigSecretRef {
    pub name: String,
    pub namespace: String,
    /// Data key within the Secret (defaults to `kubeconfig`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Garden {
    /// Whether the last reconcile of the Garden succeeded
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.last_operation.as_ref())
            .is_some_and(|op| {
                op.r#type == LastOperationType::Reconcile
                    && op.state == LastOperationState::Succeeded
            })
    }

    /// Whether the Garden has been marked for deletion
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Connection parameters for the virtual cluster, if already published
    #[must_use]
    pub fn kubeconfig_secret_ref(&self) -> Option<&KubeconfigSecretRef> {
        self.status
            .as_ref()
            .and_then(|s| s.virtual_cluster.as_ref())
            .and_then(|v| v.kubeconfig_secret_ref.as_ref())
    }
}
