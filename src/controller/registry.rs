//! # Tenant Client Registry
//!
//! Resolves a Garden to a live connection to its virtual cluster.
//!
//! Connections are cached per tenant key. Establishment is single-flight: each
//! key owns a `OnceCell`, so concurrent first resolutions for the same tenant
//! wait on one connection attempt and all observe the same connection. A failed
//! attempt drops the empty cell and the next resolution retries.

use crate::controller::store::TenantStore;
use crate::crd::Garden;
use crate::observability;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The Garden does not (yet) publish usable connection parameters
    #[error("tenant endpoint unavailable: {0}")]
    EndpointUnavailable(String),
    /// Connection parameters exist but a client could not be built from them
    #[error("failed to connect to tenant: {0}")]
    ConnectionFailed(String),
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl RegistryError {
    /// Whether the failure means "not ready yet" rather than a real error
    #[must_use]
    pub fn is_not_ready(&self) -> bool {
        matches!(self, RegistryError::EndpointUnavailable(_))
    }
}

/// Identity of a tenant connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantKey(String);

impl TenantKey {
    /// Key for a Garden. The UID is included when known so a recreated Garden
    /// does not reuse the connection of its predecessor.
    #[must_use]
    pub fn for_garden(garden: &Garden) -> Self {
        let name = garden.metadata.name.as_deref().unwrap_or_default();
        match garden.metadata.uid.as_deref() {
            Some(uid) if !uid.is_empty() => Self(format!("garden/{name}/{uid}")),
            _ => Self(format!("garden/{name}")),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Establishes new tenant connections from a Garden's connection parameters
#[async_trait]
pub trait TenantConnector: Send + Sync {
    async fn connect(&self, garden: &Garden) -> Result<Arc<dyn TenantStore>, RegistryError>;
}

type Slot = Arc<OnceCell<Arc<dyn TenantStore>>>;

/// Cache of tenant connections keyed by tenant identity
pub struct TenantRegistry {
    connector: Arc<dyn TenantConnector>,
    slots: Mutex<HashMap<TenantKey, Slot>>,
}

impl fmt::Debug for TenantRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantRegistry")
            .field("cached", &self.cached_keys())
            .finish_non_exhaustive()
    }
}

impl TenantRegistry {
    #[must_use]
    pub fn new(connector: Arc<dyn TenantConnector>) -> Self {
        Self {
            connector,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the connection for `garden`, establishing it on first use
    pub async fn resolve(&self, garden: &Garden) -> Result<Arc<dyn TenantStore>, RegistryError> {
        let key = TenantKey::for_garden(garden);
        let slot = self.slot(&key);

        if let Some(store) = slot.get() {
            return Ok(Arc::clone(store));
        }

        let established = slot
            .get_or_try_init(|| async {
                debug!(tenant = %key, "Establishing tenant connection");
                let store = self.connector.connect(garden).await?;
                info!(tenant = %key, "Tenant connection established");
                observability::metrics::increment_tenant_connections_established();
                Ok::<_, RegistryError>(store)
            })
            .await;
        let store = match established {
            Ok(store) => store,
            Err(e) => {
                self.discard_empty(&key, &slot);
                return Err(e);
            }
        };

        observability::metrics::set_tenant_connections_cached(self.len());
        Ok(Arc::clone(store))
    }

    /// Drop the cached connection for `key`
    pub fn invalidate(&self, key: &TenantKey) -> bool {
        let removed = self.lock_slots().remove(key).is_some();
        if removed {
            info!(tenant = %key, "Dropped cached tenant connection");
            observability::metrics::set_tenant_connections_cached(self.len());
        }
        removed
    }

    /// Drop every cached connection whose key belongs to the Garden `name`
    pub fn invalidate_garden(&self, name: &str) -> usize {
        let exact = format!("garden/{name}");
        let prefix = format!("garden/{name}/");
        let keys: Vec<TenantKey> = self
            .lock_slots()
            .keys()
            .filter(|k| k.as_str() == exact || k.as_str().starts_with(&prefix))
            .cloned()
            .collect();
        keys.iter().filter(|k| self.invalidate(k)).count()
    }

    /// Number of established connections
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_slots()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached_keys(&self) -> Vec<TenantKey> {
        let mut keys: Vec<_> = self.lock_slots().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Forget `slot` if it is still the one stored for `key` and holds no connection
    fn discard_empty(&self, key: &TenantKey, slot: &Slot) {
        let mut slots = self.lock_slots();
        if slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized())
        {
            slots.remove(key);
        }
    }

    fn slot(&self, key: &TenantKey) -> Slot {
        let mut slots = self.lock_slots();
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<TenantKey, Slot>> {
        // The map is only mutated by short, non-panicking sections.
        self.slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
