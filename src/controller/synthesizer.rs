//! # Resource Synthesizer
//!
//! Maps an `Extension` to the `ControllerRegistration` and `ControllerDeployment`
//! that must exist in the virtual cluster.
//!
//! The mapping is pure: the same extension spec always yields identical objects,
//! so repeated reconciles produce no-op updates on the tenant side.

use crate::constants::{LABEL_EXTENSION_NAME, LABEL_MANAGED_BY, MANAGED_BY_VALUE};
use crate::crd::{
    ControllerDeployment, ControllerDeploymentSpec, ControllerRegistration,
    ControllerRegistrationDeployment, ControllerRegistrationSpec, DeploymentRef, Extension,
    ExtensionDeploymentSpec, HelmControllerDeployment,
};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("extension has no name")]
    MissingName,
}

/// The tenant-side pair derived from one extension
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedResources {
    pub registration: ControllerRegistration,
    pub deployment: ControllerDeployment,
}

/// Name shared by the registration and deployment of an extension
#[must_use]
pub fn derived_name(extension_name: &str) -> String {
    extension_name.to_string()
}

/// Synthesize the derived pair for `extension`
pub fn synthesize(extension: &Extension) -> Result<DerivedResources, SynthesisError> {
    let name = extension
        .metadata
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or(SynthesisError::MissingName)?;
    let derived = derived_name(name);
    let extension_deployment = extension
        .spec
        .deployment
        .as_ref()
        .and_then(|d| d.extension.as_ref());

    let registration = ControllerRegistration {
        metadata: object_meta(&derived, name),
        spec: ControllerRegistrationSpec {
            resources: extension.spec.resources.clone(),
            deployment: extension_deployment.map(|d| ControllerRegistrationDeployment {
                policy: d.policy,
                deployment_refs: vec![DeploymentRef {
                    name: derived.clone(),
                }],
            }),
        },
    };

    let deployment = ControllerDeployment {
        metadata: object_meta(&derived, name),
        spec: ControllerDeploymentSpec {
            helm: extension_deployment.and_then(helm_deployment),
        },
    };

    Ok(DerivedResources {
        registration,
        deployment,
    })
}

fn helm_deployment(spec: &ExtensionDeploymentSpec) -> Option<HelmControllerDeployment> {
    let oci_repository = spec.helm.as_ref().and_then(|h| h.oci_repository.clone());
    if oci_repository.is_none() && spec.values.is_none() {
        return None;
    }
    Some(HelmControllerDeployment {
        oci_repository,
        values: spec.values.clone(),
    })
}

fn object_meta(name: &str, extension_name: &str) -> ObjectMeta {
    let labels = BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string()),
        (LABEL_EXTENSION_NAME.to_string(), extension_name.to_string()),
    ]);
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(labels),
        ..ObjectMeta::default()
    }
}
