//! # Kubernetes Stores
//!
//! `ManagementStore` and `TenantStore` backed by the Kubernetes API, plus the
//! connector that builds tenant clients from the kubeconfig a Garden publishes.
//!
//! Finalizer changes and tenant applies are read-modify-write cycles guarded by
//! `resourceVersion`; a 409 Conflict re-reads and retries up to the configured
//! number of attempts.

use super::{ManagementStore, StoreError, TenantStore};
use crate::constants::{DEFAULT_KUBECONFIG_SECRET_KEY, FIELD_MANAGER};
use crate::controller::registry::{RegistryError, TenantConnector};
use crate::crd::{ControllerDeployment, ControllerRegistration, Extension, ExtensionStatus, Garden};
use crate::observability;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

fn is_status(error: &kube::Error, code: u16) -> bool {
    matches!(error, kube::Error::Api(api_err) if api_err.code == code)
}

/// Treat 404 Not Found as `Ok(None)`
fn not_found_as_none<T>(result: Result<T, kube::Error>) -> Result<Option<T>, kube::Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if is_status(&e, 404) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Run a read-modify-write `attempt` until it finishes without a 409 Conflict,
/// at most `max_attempts` times. Any other error ends the loop.
async fn retry_on_conflict<T, F, Fut>(
    max_attempts: u32,
    kind: &'static str,
    name: &str,
    mut attempt: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    for n in 1..=max_attempts.max(1) {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if is_status(&e, 409) => {
                debug!(kind, name, attempt = n, "Conflict on read-modify-write, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(StoreError::ConflictRetriesExhausted {
        kind,
        name: name.to_string(),
    })
}

/// Management cluster access through the Kubernetes API
#[derive(Clone)]
pub struct KubeManagementStore {
    client: Client,
    max_conflict_retries: u32,
}

impl std::fmt::Debug for KubeManagementStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeManagementStore")
            .field("max_conflict_retries", &self.max_conflict_retries)
            .finish_non_exhaustive()
    }
}

impl KubeManagementStore {
    #[must_use]
    pub fn new(client: Client, max_conflict_retries: u32) -> Self {
        Self {
            client,
            max_conflict_retries: max_conflict_retries.max(1),
        }
    }

    fn extensions(&self) -> Api<Extension> {
        Api::all(self.client.clone())
    }

    /// Apply `mutate` to the stored extension and replace it.
    /// `mutate` returns false when no write is needed.
    async fn modify_extension<F>(
        &self,
        name: &str,
        mutate: F,
    ) -> Result<Option<Extension>, StoreError>
    where
        F: Fn(&mut Extension) -> bool + Send + Sync,
    {
        let api = &self.extensions();
        let mutate = &mutate;
        retry_on_conflict(self.max_conflict_retries, "Extension", name, move || async move {
            let Some(mut extension) = api.get_opt(name).await? else {
                return Ok(None);
            };
            if !mutate(&mut extension) {
                return Ok(Some(extension));
            }
            not_found_as_none(api.replace(name, &PostParams::default(), &extension).await)
        })
        .await
    }
}

#[async_trait]
impl ManagementStore for KubeManagementStore {
    async fn get_extension(&self, name: &str) -> Result<Option<Extension>, StoreError> {
        Ok(self.extensions().get_opt(name).await?)
    }

    async fn get_garden(&self, name: &str) -> Result<Option<Garden>, StoreError> {
        let api: Api<Garden> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn add_finalizer(&self, name: &str, finalizer: &str) -> Result<Extension, StoreError> {
        self.modify_extension(name, |ext| {
            if ext.has_finalizer(finalizer) {
                return false;
            }
            ext.finalizers_mut().push(finalizer.to_string());
            true
        })
        .await?
        .ok_or_else(|| StoreError::NotFound {
            kind: "Extension",
            name: name.to_string(),
        })
    }

    async fn remove_finalizer(&self, name: &str, finalizer: &str) -> Result<(), StoreError> {
        self.modify_extension(name, |ext| {
            if !ext.has_finalizer(finalizer) {
                return false;
            }
            ext.finalizers_mut().retain(|f| f != finalizer);
            true
        })
        .await?;
        Ok(())
    }

    async fn update_status(&self, name: &str, status: &ExtensionStatus) -> Result<(), StoreError> {
        let patch = serde_json::json!({
            "status": status
        });
        match self
            .extensions()
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(StoreError::NotFound {
                kind: "Extension",
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// Tenant objects that can be applied with create-or-replace
trait DerivedObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: &'static str;

    /// Whether `self` already carries everything `desired` declares
    fn matches(&self, desired: &Self) -> bool;
}

fn labels_match<K: Resource>(existing: &K, desired: &K) -> bool {
    let existing = existing.labels();
    desired
        .labels()
        .iter()
        .all(|(k, v)| existing.get(k) == Some(v))
}

impl DerivedObject for ControllerRegistration {
    const KIND: &'static str = "ControllerRegistration";

    fn matches(&self, desired: &Self) -> bool {
        self.spec == desired.spec && labels_match(self, desired)
    }
}

impl DerivedObject for ControllerDeployment {
    const KIND: &'static str = "ControllerDeployment";

    fn matches(&self, desired: &Self) -> bool {
        self.spec == desired.spec && labels_match(self, desired)
    }
}

/// One virtual cluster reached through its own `kube::Client`
#[derive(Clone)]
pub struct KubeTenantStore {
    client: Client,
    max_conflict_retries: u32,
}

impl std::fmt::Debug for KubeTenantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeTenantStore")
            .field("max_conflict_retries", &self.max_conflict_retries)
            .finish_non_exhaustive()
    }
}

impl KubeTenantStore {
    #[must_use]
    pub fn new(client: Client, max_conflict_retries: u32) -> Self {
        Self {
            client,
            max_conflict_retries: max_conflict_retries.max(1),
        }
    }

    /// Create the object if absent, otherwise update it in place
    async fn apply<K: DerivedObject>(&self, desired: &K) -> Result<(), StoreError> {
        let name = desired
            .meta()
            .name
            .clone()
            .ok_or_else(|| StoreError::Other(format!("{} has no name", K::KIND)))?;
        let api: &Api<K> = &Api::all(self.client.clone());
        let object_name = name.as_str();

        // Ok(false) when the stored object already matches
        let written = retry_on_conflict(
            self.max_conflict_retries,
            K::KIND,
            &name,
            move || async move {
                match api.get_opt(object_name).await? {
                    None => api.create(&PostParams::default(), desired).await.map(|_| true),
                    Some(existing) if existing.matches(desired) => Ok(false),
                    Some(existing) => {
                        let mut updated = desired.clone();
                        updated.meta_mut().resource_version =
                            existing.meta().resource_version.clone();
                        api.replace(object_name, &PostParams::default(), &updated)
                            .await
                            .map(|_| true)
                    }
                }
            },
        )
        .await?;

        if written {
            observability::metrics::increment_tenant_operations("apply");
            debug!(kind = K::KIND, name = %name, "Applied tenant object");
        } else {
            debug!(kind = K::KIND, name = %name, "Tenant object up to date");
        }
        Ok(())
    }

    async fn delete<K: DerivedObject>(&self, name: &str) -> Result<(), StoreError> {
        let api: Api<K> = Api::all(self.client.clone());
        match not_found_as_none(api.delete(name, &DeleteParams::default()).await)? {
            Some(_) => {
                observability::metrics::increment_tenant_operations("delete");
                debug!(kind = K::KIND, name, "Deleted tenant object");
            }
            None => debug!(kind = K::KIND, name, "Tenant object already absent"),
        }
        Ok(())
    }
}

#[async_trait]
impl TenantStore for KubeTenantStore {
    async fn apply_registration(
        &self,
        registration: &ControllerRegistration,
    ) -> Result<(), StoreError> {
        self.apply(registration).await
    }

    async fn delete_registration(&self, name: &str) -> Result<(), StoreError> {
        self.delete::<ControllerRegistration>(name).await
    }

    async fn apply_deployment(&self, deployment: &ControllerDeployment) -> Result<(), StoreError> {
        self.apply(deployment).await
    }

    async fn delete_deployment(&self, name: &str) -> Result<(), StoreError> {
        self.delete::<ControllerDeployment>(name).await
    }
}

/// Builds tenant clients from the kubeconfig Secret referenced by the Garden
#[derive(Clone)]
pub struct KubeTenantConnector {
    client: Client,
    max_conflict_retries: u32,
}

impl std::fmt::Debug for KubeTenantConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeTenantConnector").finish_non_exhaustive()
    }
}

impl KubeTenantConnector {
    /// `client` talks to the management cluster where the Secret lives
    #[must_use]
    pub fn new(client: Client, max_conflict_retries: u32) -> Self {
        Self {
            client,
            max_conflict_retries,
        }
    }

    async fn read_kubeconfig(&self, garden: &Garden) -> Result<Vec<u8>, RegistryError> {
        let secret_ref = garden.kubeconfig_secret_ref().ok_or_else(|| {
            RegistryError::EndpointUnavailable(
                "garden does not publish a virtual cluster kubeconfig".to_string(),
            )
        })?;
        let key = secret_ref
            .key
            .as_deref()
            .unwrap_or(DEFAULT_KUBECONFIG_SECRET_KEY);

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &secret_ref.namespace);
        let secret = match secrets.get_opt(&secret_ref.name).await {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                return Err(RegistryError::EndpointUnavailable(format!(
                    "kubeconfig secret {}/{} not found",
                    secret_ref.namespace, secret_ref.name
                )))
            }
            Err(e) => return Err(e.into()),
        };

        secret
            .data
            .and_then(|mut data| data.remove(key))
            .map(|bytes| bytes.0)
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| {
                RegistryError::EndpointUnavailable(format!(
                    "kubeconfig secret {}/{} has no key {key}",
                    secret_ref.namespace, secret_ref.name
                ))
            })
    }
}

/// Build a client from raw kubeconfig bytes
pub async fn client_from_kubeconfig(kubeconfig_data: &[u8]) -> Result<Client, RegistryError> {
    let kubeconfig_str = std::str::from_utf8(kubeconfig_data)
        .map_err(|e| RegistryError::ConnectionFailed(format!("invalid kubeconfig UTF-8: {e}")))?;
    let kubeconfig: Kubeconfig = serde_yaml::from_str(kubeconfig_str)
        .map_err(|e| RegistryError::ConnectionFailed(format!("invalid kubeconfig YAML: {e}")))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| RegistryError::ConnectionFailed(format!("failed to build config: {e}")))?;
    Ok(Client::try_from(config)?)
}

#[async_trait]
impl TenantConnector for KubeTenantConnector {
    async fn connect(&self, garden: &Garden) -> Result<Arc<dyn TenantStore>, RegistryError> {
        let kubeconfig = self.read_kubeconfig(garden).await?;
        let client = client_from_kubeconfig(&kubeconfig).await?;
        info!(
            garden = garden.metadata.name.as_deref().unwrap_or("unknown"),
            "Built virtual cluster client"
        );
        Ok(Arc::new(KubeTenantStore::new(client, self.max_conflict_retries)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ControllerRegistrationSpec, DeploymentRef, ControllerRegistrationDeployment};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn registration(labels: &[(&str, &str)], refs: &[&str]) -> ControllerRegistration {
        let mut reg = ControllerRegistration::new(
            "provider-local",
            ControllerRegistrationSpec {
                resources: Vec::new(),
                deployment: Some(ControllerRegistrationDeployment {
                    policy: None,
                    deployment_refs: refs
                        .iter()
                        .map(|n| DeploymentRef {
                            name: (*n).to_string(),
                        })
                        .collect(),
                }),
            },
        );
        reg.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
        reg
    }

    #[test]
    fn test_matches_ignores_foreign_labels_and_metadata() {
        let desired = registration(&[("a", "1")], &["provider-local"]);
        let mut existing = registration(&[("a", "1"), ("other", "x")], &["provider-local"]);
        existing.metadata.resource_version = Some("7".to_string());

        assert!(existing.matches(&desired));
    }

    #[test]
    fn test_matches_detects_spec_and_label_drift() {
        let desired = registration(&[("a", "1")], &["provider-local"]);

        assert!(!registration(&[("a", "2")], &["provider-local"]).matches(&desired));
        assert!(!registration(&[("a", "1")], &["other"]).matches(&desired));
    }

    #[tokio::test]
    async fn test_client_from_kubeconfig_rejects_garbage() {
        let Err(err) = client_from_kubeconfig(b"\xff\xfe").await else {
            panic!("non UTF-8 kubeconfig was accepted");
        };
        assert!(matches!(err, RegistryError::ConnectionFailed(_)));

        let Err(err) = client_from_kubeconfig(b"clusters: [unterminated").await else {
            panic!("malformed kubeconfig was accepted");
        };
        assert!(matches!(err, RegistryError::ConnectionFailed(_)));
    }

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("request failed with {code}"),
            reason: "Test".to_string(),
            code,
        })
    }

    #[tokio::test]
    async fn test_retry_on_conflict_retries_until_write_succeeds() {
        let calls = AtomicU32::new(0);

        let result = retry_on_conflict(5, "Extension", "ext", || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(api_error(409))
                } else {
                    Ok(call)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_on_conflict_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);

        let err = retry_on_conflict(3, "ControllerRegistration", "ext", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(api_error(409)) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            err,
            StoreError::ConflictRetriesExhausted { kind: "ControllerRegistration", ref name } if name == "ext"
        ));
    }

    #[tokio::test]
    async fn test_retry_on_conflict_stops_on_other_errors() {
        let calls = AtomicU32::new(0);

        let err = retry_on_conflict(5, "Extension", "ext", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(api_error(500)) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, StoreError::Kube(kube::Error::Api(ref e)) if e.code == 500));
    }

    #[test]
    fn test_not_found_is_absent_not_an_error() {
        assert!(matches!(not_found_as_none::<()>(Err(api_error(404))), Ok(None)));
        assert!(matches!(not_found_as_none(Ok(7)), Ok(Some(7))));
        assert!(not_found_as_none::<()>(Err(api_error(500))).is_err());
    }
}
