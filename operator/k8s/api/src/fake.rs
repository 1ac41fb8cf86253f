//! An in-memory [`ObjectStore`] for tests.

use crate::{Object, ObjectStore, StoreError};
use kube::ResourceExt;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

type ObjectId = (String, String, String);

#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<Mutex<Inner>>);

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<ObjectId, serde_json::Value>,
    updates: Vec<ObjectId>,
    failing: HashSet<ObjectId>,
}

// === impl MemoryStore ===

impl MemoryStore {
    pub fn with<K: Object>(objects: impl IntoIterator<Item = K>) -> Self {
        let store = Self::default();
        for obj in objects {
            store.insert(obj);
        }
        store
    }

    /// Adds or replaces an object without recording an update.
    pub fn insert<K: Object>(&self, obj: K) {
        let id = id_of(&obj);
        let value = serde_json::to_value(&obj).expect("object must serialize");
        self.0.lock().objects.insert(id, value);
    }

    pub fn remove<K: Object>(&self, namespace: &str, name: &str) {
        self.0.lock().objects.remove(&id::<K>(namespace, name));
    }

    /// Returns the stored object without going through the async API.
    pub fn snapshot<K: Object>(&self, namespace: &str, name: &str) -> Option<K> {
        self.0
            .lock()
            .objects
            .get(&id::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).expect("object must deserialize"))
    }

    /// Causes subsequent updates of the named object to fail.
    pub fn fail_updates<K: Object>(&self, namespace: &str, name: &str) {
        self.0.lock().failing.insert(id::<K>(namespace, name));
    }

    /// The number of successful updates applied to objects of kind `K`.
    pub fn updates<K: Object>(&self) -> usize {
        let kind = K::kind(&());
        self.0
            .lock()
            .updates
            .iter()
            .filter(|(k, _, _)| *k == kind)
            .count()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self.snapshot(namespace, name))
    }

    async fn update<K: Object>(&self, object: &K) -> Result<(), StoreError> {
        let id = id_of(object);
        let mut inner = self.0.lock();
        if !inner.objects.contains_key(&id) {
            return Err(StoreError::not_found::<K>(&id.1, &id.2));
        }
        if inner.failing.contains(&id) {
            return Err(StoreError::Api(kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: format!("{} {}/{}: injected failure", id.0, id.1, id.2),
                reason: "InternalError".to_string(),
                code: 500,
            })));
        }
        let value = serde_json::to_value(object).expect("object must serialize");
        inner.objects.insert(id.clone(), value);
        inner.updates.push(id);
        Ok(())
    }
}

fn id<K: Object>(namespace: &str, name: &str) -> ObjectId {
    (
        K::kind(&()).to_string(),
        namespace.to_string(),
        name.to_string(),
    )
}

fn id_of<K: Object>(obj: &K) -> ObjectId {
    id::<K>(&obj.namespace().unwrap_or_default(), &obj.name_any())
}
