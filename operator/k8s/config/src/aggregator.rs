use crate::AggregatorMetrics;
use parking_lot::{Mutex, RwLock};
use pomerium_operator_core::{Options, Policy};
use pomerium_operator_k8s_api::{ByteString, ObjectStore, ResourceKey, Secret, StoreError};
use std::{collections::BTreeMap, future::Future, sync::Arc};
use tokio::{sync::mpsc, time};

/// The key under which the configuration document is stored in the Secret.
pub const CONFIG_KEY: &str = "config.yaml";

pub type SharedAggregator<S> = Arc<Aggregator<S>>;

/// Identifies the Secret that holds the proxy's configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigTarget {
    pub namespace: String,
    pub name: String,
}

/// Tracks the policies produced for each resource and persists them, merged with a base
/// configuration, to the proxy's Secret.
///
/// Updates are held in memory until the next [`Aggregator::save`], which is normally driven by
/// [`Aggregator::run`] so that bursts of resource changes are coalesced into a single write.
pub struct Aggregator<S> {
    store: S,
    target: ConfigTarget,
    state: RwLock<State>,

    /// Serializes saves so that at most one write is in flight.
    saving: tokio::sync::Mutex<()>,

    /// Notified, in registration order, after each successful save.
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Options>>>,

    metrics: AggregatorMetrics,
}

#[derive(Debug, Default)]
struct State {
    /// The base configuration, exactly as supplied.
    base: Option<Vec<u8>>,
    policies: BTreeMap<ResourceKey, Vec<Policy>>,
    pending: bool,

    /// Incremented on every mutation so that a save only clears `pending` if nothing changed
    /// while it was writing.
    generation: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("base configuration has not been set")]
    BaseUnset,

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("no policies indexed for {0}")]
    NotIndexed(ResourceKey),

    #[error("configuration Secret {namespace}/{name} not found")]
    RecordNotFound { namespace: String, name: String },

    #[error("configuration Secret {namespace}/{name} has no config.yaml entry")]
    MissingData { namespace: String, name: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

// === impl Aggregator ===

impl<S: ObjectStore> Aggregator<S> {
    pub fn shared(
        store: S,
        target: ConfigTarget,
        metrics: AggregatorMetrics,
    ) -> SharedAggregator<S> {
        Arc::new(Self {
            store,
            target,
            state: RwLock::new(State::default()),
            saving: tokio::sync::Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
            metrics,
        })
    }

    /// Sets the configuration that policies are merged into.
    ///
    /// The document is validated but stored verbatim; an invalid document leaves the previous
    /// base configuration in place.
    pub fn set_base_config(&self, bytes: impl Into<Vec<u8>>) -> Result<(), Error> {
        let bytes = bytes.into();
        Options::from_yaml(&bytes)?;

        let mut state = self.state.write();
        state.base = Some(bytes);
        state.touch();
        Ok(())
    }

    /// Adds or replaces the policies associated with a resource.
    pub fn set(&self, key: ResourceKey, policies: Vec<Policy>) {
        tracing::debug!(%key, policies = policies.len(), "Setting policies");
        let mut state = self.state.write();
        state.policies.insert(key, policies);
        state.touch();
    }

    /// Removes the policies associated with a resource.
    ///
    /// Fails with [`Error::NotIndexed`] if the resource has no policies.
    pub fn remove(&self, key: &ResourceKey) -> Result<(), Error> {
        let mut state = self.state.write();
        if state.policies.remove(key).is_none() {
            return Err(Error::NotIndexed(key.clone()));
        }
        state.touch();
        tracing::debug!(%key, "Removed policies");
        Ok(())
    }

    /// Indicates whether there are changes that have not yet been saved.
    pub fn is_pending(&self) -> bool {
        self.state.read().pending
    }

    /// Renders the configuration as it would be saved now.
    pub fn current_config(&self) -> Result<Options, Error> {
        self.state.read().render()
    }

    /// Registers a subscriber that receives the configuration after every successful save.
    ///
    /// Subscribers are never removed; a subscriber that drops its receiver simply stops
    /// receiving updates.
    pub fn on_save(&self) -> mpsc::UnboundedReceiver<Options> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Writes the current configuration to the Secret and notifies subscribers.
    ///
    /// The Secret must already exist. On failure, pending changes remain pending so that the
    /// next save retries them.
    pub async fn save(&self) -> Result<(), Error> {
        let _saving = self.saving.lock().await;

        match self.write().await {
            Ok(config) => {
                self.metrics.saves.inc();
                self.metrics.policies.set(config.policy.len() as i64);
                tracing::info!(
                    secret = %self.target.name,
                    namespace = %self.target.namespace,
                    policies = config.policy.len(),
                    "Saved configuration",
                );
                self.notify(&config);
                Ok(())
            }
            Err(error) => {
                self.metrics.save_errors.inc();
                Err(error)
            }
        }
    }

    /// Reads and parses the configuration currently stored in the Secret.
    pub async fn persisted_config(&self) -> Result<Options, Error> {
        let secret = self.get_secret().await?;
        let data = secret
            .data
            .as_ref()
            .and_then(|data| data.get(CONFIG_KEY))
            .ok_or_else(|| Error::MissingData {
                namespace: self.target.namespace.clone(),
                name: self.target.name.clone(),
            })?;
        Ok(Options::from_yaml(&data.0)?)
    }

    /// Saves pending changes every `period` until `shutdown` completes, and then saves once
    /// more before returning.
    ///
    /// Saves are only attempted while `is_leader` returns true; changes made while another
    /// replica leads stay pending until this one takes over.
    ///
    /// The value produced by `shutdown` is held until the final save completes, so a drain
    /// handle may be passed to delay process shutdown until the configuration is written.
    pub async fn run<L, F>(self: Arc<Self>, period: time::Duration, is_leader: L, shutdown: F)
    where
        L: Fn() -> bool,
        F: Future,
    {
        let mut ticks = time::interval(period);
        ticks.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                release = &mut shutdown => {
                    if is_leader() {
                        tracing::debug!("Saving configuration before shutdown");
                        self.save_logged().await;
                    }
                    drop(release);
                    return;
                }

                _ = ticks.tick() => {
                    if !self.is_pending() {
                        continue;
                    }
                    if is_leader() {
                        self.save_logged().await;
                    } else {
                        tracing::debug!("Not the leader; deferring save");
                    }
                }
            }
        }
    }

    async fn save_logged(&self) {
        if let Err(error) = self.save().await {
            tracing::error!(
                secret = %self.target.name,
                namespace = %self.target.namespace,
                %error,
                "Failed to save configuration",
            );
        }
    }

    async fn write(&self) -> Result<Options, Error> {
        let (config, generation) = {
            let state = self.state.read();
            (state.render()?, state.generation)
        };
        let yaml = config.to_yaml()?;

        let mut secret = self.get_secret().await?;
        secret.data = Some(
            [(CONFIG_KEY.to_string(), ByteString(yaml.into_bytes()))]
                .into_iter()
                .collect(),
        );
        secret.string_data = None;

        self.store.update(&secret).await.map_err(|error| {
            if error.is_not_found() {
                self.record_not_found()
            } else {
                error.into()
            }
        })?;

        let mut state = self.state.write();
        if state.generation == generation {
            state.pending = false;
        }
        Ok(config)
    }

    async fn get_secret(&self) -> Result<Secret, Error> {
        let ConfigTarget { namespace, name } = &self.target;
        self.store
            .get::<Secret>(namespace, name)
            .await?
            .ok_or_else(|| self.record_not_found())
    }

    fn record_not_found(&self) -> Error {
        Error::RecordNotFound {
            namespace: self.target.namespace.clone(),
            name: self.target.name.clone(),
        }
    }

    fn notify(&self, config: &Options) {
        for tx in self.subscribers.lock().iter() {
            if tx.send(config.clone()).is_err() {
                tracing::debug!("Configuration subscriber has gone away");
            }
        }
    }
}

// === impl State ===

impl State {
    fn touch(&mut self) {
        self.pending = true;
        self.generation += 1;
    }

    fn render(&self) -> Result<Options, Error> {
        let base = self.base.as_deref().ok_or(Error::BaseUnset)?;
        let mut options = Options::from_yaml(base)?;
        options
            .policy
            .extend(self.policies.values().flatten().cloned());
        Ok(options)
    }
}
