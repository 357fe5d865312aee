// ABOUTME: Registry of active providers keyed by name@version.
// ABOUTME: Register and unregister run as single critical sections over the map and allocator.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::allocator::{AllocationError, AllocationKind, Endpoint, EndpointAllocator};

/// Unique key of a registration: provider name and version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderKey {
    pub name: String,
    pub version: String,
}

impl ProviderKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// One active provider binding. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRegistration {
    pub key: ProviderKey,
    /// Token presented at registration, required again to unregister.
    pub identity: String,
    pub endpoint: Endpoint,
    /// Capability flags, stored as declared.
    pub features: BTreeSet<String>,
}

/// Errors from registering a provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("provider with same name and version ({0}) already registered")]
    Duplicate(ProviderKey),

    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

impl From<RegistryError> for tonic::Status {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Duplicate(_) => tonic::Status::already_exists(err.to_string()),
            RegistryError::Allocation(AllocationError::Exhausted { .. }) => {
                tonic::Status::resource_exhausted(err.to_string())
            }
            RegistryError::Allocation(AllocationError::InvalidRange { .. }) => {
                tonic::Status::internal(err.to_string())
            }
        }
    }
}

/// Outcome of an unregister request.
///
/// An unknown key and a wrong identity both report `NotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unregistration {
    Removed,
    NotFound,
}

struct RegistryInner {
    providers: HashMap<ProviderKey, ProviderRegistration>,
    allocator: EndpointAllocator,
}

/// Owns every active registration and the allocator that hands out endpoints.
pub struct ProviderRegistry {
    inner: Mutex<RegistryInner>,
    kind: AllocationKind,
}

impl ProviderRegistry {
    /// Create an empty registry using `allocator` for new endpoints.
    pub fn new(allocator: EndpointAllocator) -> Self {
        let kind = allocator.kind();
        Self {
            inner: Mutex::new(RegistryInner {
                providers: HashMap::new(),
                allocator,
            }),
            kind,
        }
    }

    /// Kind of endpoint handed out by this registry.
    pub fn allocation_kind(&self) -> AllocationKind {
        self.kind
    }

    /// Register a provider and return its endpoint.
    ///
    /// The duplicate check, port conflict scan, and insert happen under one
    /// lock, so concurrent callers can never share a key or a port.
    pub async fn register(
        &self,
        key: ProviderKey,
        identity: impl Into<String>,
        features: BTreeSet<String>,
    ) -> Result<Endpoint, RegistryError> {
        let mut inner = self.inner.lock().await;
        let RegistryInner {
            providers,
            allocator,
        } = &mut *inner;

        if providers.contains_key(&key) {
            debug!(provider = %key, "Rejected duplicate registration");
            return Err(RegistryError::Duplicate(key));
        }

        let endpoint = allocator.allocate(|port| {
            providers
                .values()
                .any(|p| p.endpoint == Endpoint::Port(port))
        })?;

        info!(provider = %key, endpoint = %endpoint, "Provider registered");
        providers.insert(
            key.clone(),
            ProviderRegistration {
                key,
                identity: identity.into(),
                endpoint: endpoint.clone(),
                features,
            },
        );
        Ok(endpoint)
    }

    /// Remove a registration if `identity` matches the one it was created with.
    pub async fn unregister(&self, key: &ProviderKey, identity: &str) -> Unregistration {
        let mut inner = self.inner.lock().await;
        let matches = inner
            .providers
            .get(key)
            .is_some_and(|existing| existing.identity.as_bytes() == identity.as_bytes());
        if matches {
            inner.providers.remove(key);
            info!(provider = %key, "Provider unregistered");
            Unregistration::Removed
        } else {
            debug!(provider = %key, "Unregister did not match a registration");
            Unregistration::NotFound
        }
    }

    /// Snapshot of one registration.
    pub async fn get(&self, key: &ProviderKey) -> Option<ProviderRegistration> {
        self.inner.lock().await.providers.get(key).cloned()
    }

    /// Snapshot of all registrations, sorted by key.
    pub async fn list(&self) -> Vec<ProviderRegistration> {
        let inner = self.inner.lock().await;
        let mut all: Vec<_> = inner.providers.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Number of active registrations.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.providers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
