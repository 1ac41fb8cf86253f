use crate::RolloutMetrics;
use pomerium_operator_core::Options;
use pomerium_operator_k8s_api::{Deployment, ObjectStore, StoreError};
use tokio::sync::mpsc;

/// The pod template annotation that records the checksum of the configuration settings.
pub const CHECKSUM_ANNOTATION: &str = "pomerium.io/config-checksum";

/// Restarts the proxy's deployments when its settings change.
///
/// The proxy reloads policies on its own, but other settings only take effect on restart, so
/// each deployment's pod template is stamped with a checksum of the settings. The checksum only
/// changes when the settings do, in which case the deployment controller rolls the pods.
#[derive(Clone, Debug)]
pub struct Rollout<S> {
    store: S,
    namespace: String,
    deployments: Vec<String>,
    metrics: RolloutMetrics,
}

// === impl Rollout ===

impl<S: ObjectStore> Rollout<S> {
    pub fn new(
        store: S,
        namespace: impl Into<String>,
        deployments: Vec<String>,
        metrics: RolloutMetrics,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            deployments,
            metrics,
        }
    }

    /// Stamps every configured deployment until the channel closes.
    pub async fn run(self, mut configs: mpsc::UnboundedReceiver<Options>) {
        while let Some(config) = configs.recv().await {
            self.stamp(&config).await;
        }
        tracing::debug!("Configuration updates closed");
    }

    /// Writes the settings checksum of `config` to each deployment's pod template.
    ///
    /// Failures are logged and do not prevent the remaining deployments from being updated.
    pub async fn stamp(&self, config: &Options) {
        let checksum = match config.checksum() {
            Ok(checksum) => checksum,
            Err(error) => {
                tracing::error!(%error, "Failed to compute configuration checksum");
                return;
            }
        };

        for name in &self.deployments {
            match self.stamp_deployment(name, &checksum).await {
                Ok(()) => {
                    self.metrics.updates.inc();
                    tracing::info!(
                        namespace = %self.namespace,
                        %name,
                        %checksum,
                        "Updated deployment",
                    );
                }
                Err(error) => {
                    self.metrics.errors.inc();
                    tracing::warn!(
                        namespace = %self.namespace,
                        %name,
                        %error,
                        "Failed to update deployment",
                    );
                }
            }
        }
    }

    async fn stamp_deployment(&self, name: &str, checksum: &str) -> Result<(), StoreError> {
        let mut deployment = self
            .store
            .get::<Deployment>(&self.namespace, name)
            .await?
            .ok_or_else(|| StoreError::not_found::<Deployment>(&self.namespace, name))?;

        let template = &mut deployment.spec.get_or_insert_with(Default::default).template;
        template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(Default::default)
            .insert(CHECKSUM_ANNOTATION.to_string(), checksum.to_string());

        self.store.update(&deployment).await
    }
}
