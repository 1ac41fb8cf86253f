use crate::{
    config::{Aggregator, AggregatorMetrics, ConfigTarget, Rollout, RolloutMetrics},
    index::{ClassFilter, Dispatch, Reconciler, TranslationFailure, Translator},
    k8s::{Ingress, Kind, Object, Service},
    lease::{self, Leadership},
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::{stream::BoxStream, StreamExt};
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::path::PathBuf;
use tokio::{sync::mpsc, time::Duration};
use tracing::{info, info_span, Instrument};

/// How long changes are batched before the configuration is written.
const SAVE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[clap(
    name = "pomerium-operator",
    about = "Configures Pomerium from Ingress and Service resources"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "pomerium=info,warn",
        env = "POMERIUM_OPERATOR_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Only watch resources in this namespace. All namespaces are watched by default.
    #[clap(long, short = 'n')]
    namespace: Option<String>,

    /// The base Pomerium configuration that policies are merged into.
    #[clap(long, default_value = "./pomerium-base.yaml")]
    base_config_file: PathBuf,

    /// The Secret that Pomerium reads its configuration from. It must already exist.
    #[clap(long, default_value = "pomerium")]
    pomerium_secret: String,

    /// The namespace of the configuration Secret and of Pomerium's deployments.
    #[clap(long, default_value = "kube-system")]
    pomerium_namespace: String,

    /// Deployments to restart when the configuration's settings change.
    #[clap(long, value_delimiter = ',')]
    pomerium_deployments: Vec<String>,

    /// The Ingress class handled by this operator; `/pattern/` matches a regular expression.
    #[clap(long, short = 'i', default_value = "pomerium")]
    ingress_class: String,

    /// The Service class handled by this operator; `/pattern/` matches a regular expression.
    #[clap(long, short = 's', default_value = "pomerium")]
    service_class: String,

    /// Whether resources without a class annotation are handled by this operator.
    #[clap(long, default_value = "true", action = clap::ArgAction::Set)]
    claim_unclassified: bool,

    /// What to do with a resource's policies when it can no longer be translated:
    /// `preserve` or `clear`.
    #[clap(long, default_value = "preserve")]
    on_translation_failure: TranslationFailure,

    #[clap(long, default_value = "cluster.local")]
    cluster_domain: String,

    /// Only write configuration while holding the election lease.
    #[clap(long)]
    election: bool,

    #[clap(long, default_value = "operator-leader-pomerium")]
    election_lease: String,

    #[clap(long, default_value = "kube-system")]
    election_namespace: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            namespace,
            base_config_file,
            pomerium_secret,
            pomerium_namespace,
            pomerium_deployments,
            ingress_class,
            service_class,
            claim_unclassified,
            on_translation_failure,
            cluster_domain,
            election,
            election_lease,
            election_namespace,
        } = self;

        let ingress_filter = ClassFilter::new(Kind::Ingress, &ingress_class, claim_unclassified)?;
        let service_filter = ClassFilter::new(Kind::Service, &service_class, claim_unclassified)?;

        let mut prom = <Registry>::default();
        let config_registry = prom.sub_registry_with_prefix("config");
        let aggregator_metrics = AggregatorMetrics::register(config_registry);
        let rollout_metrics = RolloutMetrics::register(config_registry);
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let base = std::fs::read(&base_config_file).with_context(|| {
            format!(
                "failed to read base configuration from {}",
                base_config_file.display()
            )
        })?;

        let client = runtime.client();
        let aggregator = Aggregator::shared(
            client.clone(),
            ConfigTarget {
                namespace: pomerium_namespace.clone(),
                name: pomerium_secret,
            },
            aggregator_metrics,
        );
        aggregator.set_base_config(base).with_context(|| {
            format!(
                "invalid base configuration in {}",
                base_config_file.display()
            )
        })?;

        let leadership = if election {
            let hostname = std::env::var("HOSTNAME")
                .context("the HOSTNAME environment variable must be set for leader election")?;
            let claims =
                lease::init(&runtime, &election_namespace, &election_lease, &hostname).await?;
            info!(%hostname, "Competing for leadership");
            Some(Leadership::new(claims, hostname))
        } else {
            None
        };

        // Spawn resource watches, each feeding its own reconciler.

        let (ingress_tx, ingress_rx) = mpsc::unbounded_channel();
        let ingresses = watch::<Ingress, _>(&mut runtime, namespace.as_deref());
        tokio::spawn(
            kubert::index::namespaced(Dispatch::shared(ingress_tx), ingresses)
                .instrument(info_span!("ingresses")),
        );
        let reconciler = Reconciler::new(
            ingress_filter,
            Translator::new(client.clone(), cluster_domain.clone()),
            aggregator.clone(),
            on_translation_failure,
        );
        tokio::spawn(
            reconciler
                .run(ingress_rx)
                .instrument(info_span!("reconcile", kind = %Kind::Ingress)),
        );

        let (service_tx, service_rx) = mpsc::unbounded_channel();
        let services = watch::<Service, _>(&mut runtime, namespace.as_deref());
        tokio::spawn(
            kubert::index::namespaced(Dispatch::shared(service_tx), services)
                .instrument(info_span!("services")),
        );
        let reconciler = Reconciler::new(
            service_filter,
            Translator::new(client.clone(), cluster_domain),
            aggregator.clone(),
            on_translation_failure,
        );
        tokio::spawn(
            reconciler
                .run(service_rx)
                .instrument(info_span!("reconcile", kind = %Kind::Service)),
        );

        // Restart Pomerium's deployments as saved settings change.
        let rollout = Rollout::new(
            client,
            pomerium_namespace,
            pomerium_deployments,
            rollout_metrics,
        );
        tokio::spawn(
            rollout
                .run(aggregator.on_save())
                .instrument(info_span!("rollout")),
        );

        // Write the configuration periodically while this replica is the leader. The shutdown
        // handle is held until the final write completes.
        let shutdown = runtime.shutdown_handle();
        let is_leader = move || match &leadership {
            Some(leadership) => leadership.is_current(),
            None => true,
        };
        tokio::spawn(
            aggregator
                .run(SAVE_PERIOD, is_leader, shutdown.signaled())
                .instrument(info_span!("aggregator")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background
        // tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Watches a kind in one namespace, or in all namespaces.
fn watch<K, S: 'static>(
    runtime: &mut kubert::Runtime<S>,
    namespace: Option<&str>,
) -> BoxStream<'static, watcher::Event<K>>
where
    K: Object,
{
    match namespace {
        Some(ns) => runtime.watch_namespaced::<K>(ns.to_string(), watcher::Config::default()).boxed(),
        None => runtime.watch_all::<K>(watcher::Config::default()).boxed(),
    }
}
