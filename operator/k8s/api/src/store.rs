use kube::{
    api::{Api, PostParams},
    core::NamespaceResourceScope,
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// A namespaced object type that can be read from and written to the cluster.
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
}

impl<K> Object for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static
{
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} object has no namespace")]
    MissingNamespace { kind: String },

    #[error(transparent)]
    Api(#[from] kube::Error),
}

/// Reads and writes whole cluster objects.
///
/// Implemented by [`kube::Client`]; tests use an in-memory store.
#[async_trait::async_trait]
pub trait ObjectStore: Clone + Send + Sync + 'static {
    /// Fetches an object, returning `None` if it does not exist.
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError>;

    /// Replaces an existing object. Fails with [`StoreError::NotFound`] if the object does not
    /// exist; objects are never created.
    async fn update<K: Object>(&self, object: &K) -> Result<(), StoreError>;
}

// === impl StoreError ===

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Api(kube::Error::Api(rsp)) => rsp.code == 404,
            _ => false,
        }
    }

    pub fn not_found<K: Object>(namespace: &str, name: &str) -> Self {
        Self::NotFound {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

// === impl kube::Client ===

#[async_trait::async_trait]
impl ObjectStore for kube::Client {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        let api = Api::<K>::namespaced(self.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update<K: Object>(&self, object: &K) -> Result<(), StoreError> {
        let namespace = object
            .namespace()
            .ok_or_else(|| StoreError::MissingNamespace {
                kind: K::kind(&()).to_string(),
            })?;
        let name = object.name_any();
        let api = Api::<K>::namespaced(self.clone(), &namespace);
        match api.replace(&name, &PostParams::default(), object).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(rsp)) if rsp.code == 404 => {
                Err(StoreError::not_found::<K>(&namespace, &name))
            }
            Err(error) => Err(error.into()),
        }
    }
}
