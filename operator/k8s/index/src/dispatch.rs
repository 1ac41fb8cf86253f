use crate::Notification;
use parking_lot::RwLock;
use pomerium_operator_k8s_api::{Resource, ResourceKey, Watched};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Forwards watch events for a kind to its reconciler.
///
/// Watch events are applied synchronously by `kubert::index`, while reconciliation may need to
/// look up other objects, so events are queued for an async task.
#[derive(Debug)]
pub struct Dispatch {
    tx: UnboundedSender<Notification>,
}

pub type SharedDispatch = Arc<RwLock<Dispatch>>;

// === impl Dispatch ===

impl Dispatch {
    pub fn shared(tx: UnboundedSender<Notification>) -> SharedDispatch {
        Arc::new(RwLock::new(Self { tx }))
    }

    fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::warn!("Reconciler has stopped; dropping update");
        }
    }
}

impl<K> kubert::index::IndexNamespacedResource<K> for Dispatch
where
    K: Resource<DynamicType = ()> + Into<Watched>,
{
    fn apply(&mut self, resource: K) {
        let key = ResourceKey::of(&resource);
        tracing::trace!(%key, "Applied");
        self.send(Notification {
            key,
            object: Some(resource.into()),
        });
    }

    fn delete(&mut self, namespace: String, name: String) {
        let key = ResourceKey::new::<K>(namespace, name);
        tracing::trace!(%key, "Deleted");
        self.send(Notification { key, object: None });
    }
}
