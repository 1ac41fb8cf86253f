use crate::k8s::{self, Lease, ObjectMeta, Patch, PatchParams};
use anyhow::Result;
use std::sync::Arc;
use tokio::{sync::watch, time};

const LEASE_DURATION: time::Duration = time::Duration::from_secs(30);
const RENEW_GRACE_PERIOD: time::Duration = time::Duration::from_secs(1);
const FIELD_MANAGER: &str = "pomerium-operator";

pub type Claims = watch::Receiver<Arc<kubert::lease::Claim>>;

/// Tracks whether a claimant currently holds the election lease.
#[derive(Clone, Debug)]
pub struct Leadership {
    claims: Claims,
    hostname: String,
}

/// Ensures the election Lease exists and starts competing for it.
pub async fn init<T>(
    runtime: &kubert::Runtime<T>,
    ns: &str,
    name: &str,
    hostname: &str,
) -> Result<Claims> {
    let lease = Lease {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            // Specifying a resource version of "0" means that we will
            // only create the Lease if it does not already exist.
            resource_version: Some("0".to_string()),
            labels: Some(
                [(
                    "app.kubernetes.io/name".to_string(),
                    "pomerium-operator".to_string(),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        spec: None,
    };
    let api = k8s::Api::<Lease>::namespaced(runtime.client(), ns);
    match api
        .patch(
            name,
            &PatchParams {
                field_manager: Some(FIELD_MANAGER.to_string()),
                ..Default::default()
            },
            &Patch::Apply(lease),
        )
        .await
    {
        Ok(lease) => tracing::info!(?lease, "Created Lease resource"),
        Err(k8s::Error::Api(_)) => tracing::debug!("Lease already exists, no need to create it"),
        Err(error) => {
            return Err(error.into());
        }
    };

    let params = kubert::lease::ClaimParams {
        lease_duration: LEASE_DURATION,
        renew_grace_period: RENEW_GRACE_PERIOD,
    };
    let (claims, _task) = kubert::lease::LeaseManager::init(api, name)
        .await?
        .spawn(hostname, params)
        .await?;
    Ok(claims)
}

// === impl Leadership ===

impl Leadership {
    pub fn new(claims: Claims, hostname: impl Into<String>) -> Self {
        Self {
            claims,
            hostname: hostname.into(),
        }
    }

    /// Returns true while the latest claim is held by this claimant and has not expired.
    pub fn is_current(&self) -> bool {
        self.claims.borrow().is_current_for(&self.hostname)
    }
}
