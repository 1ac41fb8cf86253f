use crate::{ClassFilter, TranslationFailure, Translator};
use pomerium_operator_k8s_api::{ObjectStore, ResourceKey, Watched};
use pomerium_operator_k8s_config::{Error as ConfigError, SharedAggregator};
use tokio::sync::mpsc;

/// Reports that an object changed. `object` is `None` when it was deleted.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub key: ResourceKey,
    pub object: Option<Watched>,
}

/// Keeps a resource's policies in the aggregator in sync with the resource.
pub struct Reconciler<S> {
    filter: ClassFilter,
    translator: Translator<S>,
    aggregator: SharedAggregator<S>,
    on_failure: TranslationFailure,
}

// === impl Reconciler ===

impl<S: ObjectStore> Reconciler<S> {
    pub fn new(
        filter: ClassFilter,
        translator: Translator<S>,
        aggregator: SharedAggregator<S>,
        on_failure: TranslationFailure,
    ) -> Self {
        Self {
            filter,
            translator,
            aggregator,
            on_failure,
        }
    }

    /// Processes notifications in the order they are received until all senders are dropped.
    pub async fn run(self, mut notifications: mpsc::UnboundedReceiver<Notification>) {
        while let Some(Notification { key, object }) = notifications.recv().await {
            self.handle(key, object).await;
        }
        tracing::debug!("Notifications closed");
    }

    pub async fn handle(&self, key: ResourceKey, object: Option<Watched>) {
        let obj = match object {
            Some(obj) => obj,
            None => {
                tracing::debug!(%key, "Resource deleted");
                self.remove(&key);
                return;
            }
        };

        if !self.filter.matches(obj.annotations()) {
            tracing::debug!(%key, "Ignoring resource owned by another controller");
            return;
        }

        match self.translator.translate(&obj).await {
            Ok(policies) if policies.is_empty() => {
                tracing::debug!(%key, "Resource produces no policies");
                self.remove(&key);
            }
            Ok(policies) => {
                tracing::info!(%key, policies = policies.len(), "Updated policies");
                self.aggregator.set(key, policies);
            }
            Err(error) => {
                tracing::warn!(
                    %key,
                    %error,
                    on_failure = %self.on_failure,
                    "Failed to translate resource",
                );
                if self.on_failure == TranslationFailure::Clear {
                    self.remove(&key);
                }
            }
        }
    }

    fn remove(&self, key: &ResourceKey) {
        match self.aggregator.remove(key) {
            Ok(()) => tracing::info!(%key, "Removed policies"),
            Err(ConfigError::NotIndexed(_)) => {}
            Err(error) => tracing::warn!(%key, %error, "Failed to remove policies"),
        }
    }
}
