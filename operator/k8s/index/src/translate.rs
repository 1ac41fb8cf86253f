use crate::overrides::{InvalidOverride, Overrides};
use pomerium_operator_core::Policy;
use pomerium_operator_k8s_api::{
    Ingress, IngressBackend, ObjectStore, ResourceExt, Service, StoreError, Watched,
};

/// Selects the scheme used to reach an object's backends.
pub const BACKEND_PROTOCOL_ANNOTATION: &str = "pomerium.ingress.kubernetes.io/backend-protocol";

const DEFAULT_SCHEME: &str = "http";

/// Produces proxy policies from Ingress and Service objects.
#[derive(Clone, Debug)]
pub struct Translator<S> {
    store: S,
    cluster_domain: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error(transparent)]
    InvalidOverride(#[from] InvalidOverride),

    #[error("ingress backend does not reference a service")]
    MissingBackendService,

    #[error("ingress backend service {service} does not specify a port")]
    MissingBackendPort { service: String },

    #[error("service {namespace}/{name} not found")]
    ServiceNotFound { namespace: String, name: String },

    #[error("service {namespace}/{name} has no port named {port:?}")]
    PortNotFound {
        namespace: String,
        name: String,
        port: String,
    },

    #[error("failed to look up service: {0}")]
    Store(#[from] StoreError),
}

// === impl Translator ===

impl<S: ObjectStore> Translator<S> {
    pub fn new(store: S, cluster_domain: impl Into<String>) -> Self {
        Self {
            store,
            cluster_domain: cluster_domain.into(),
        }
    }

    /// Builds the policies for an object, in a stable order.
    ///
    /// A Service yields a policy for each of its ports. An Ingress yields a policy for each path
    /// of each rule, plus one for its default backend. Annotation overrides are applied to every
    /// policy. If any backend cannot be resolved, no policies are produced.
    pub async fn translate(&self, obj: &Watched) -> Result<Vec<Policy>, TranslateError> {
        let annotations = obj.annotations();
        let overrides = Overrides::from_annotations(annotations)?;
        let scheme = annotations
            .and_then(|a| a.get(BACKEND_PROTOCOL_ANNOTATION))
            .map(|s| s.to_lowercase())
            .unwrap_or_else(|| DEFAULT_SCHEME.to_string());

        let mut policies = match obj {
            Watched::Service(svc) => self.service(svc, &scheme),
            Watched::Ingress(ing) => self.ingress(ing, &scheme).await?,
        };
        for policy in &mut policies {
            overrides.apply(policy);
        }
        Ok(policies)
    }

    fn service(&self, svc: &Service, scheme: &str) -> Vec<Policy> {
        let namespace = svc.namespace().unwrap_or_default();
        let name = svc.name_any();
        svc.spec
            .iter()
            .flat_map(|spec| spec.ports.iter().flatten())
            .map(|port| Policy::to(self.url(scheme, &name, &namespace, port.port)))
            .collect()
    }

    async fn ingress(&self, ing: &Ingress, scheme: &str) -> Result<Vec<Policy>, TranslateError> {
        let namespace = ing.namespace().unwrap_or_default();
        let mut policies = Vec::new();
        let spec = match ing.spec.as_ref() {
            Some(spec) => spec,
            None => return Ok(policies),
        };

        for rule in spec.rules.iter().flatten() {
            let from = format!("https://{}", rule.host.as_deref().unwrap_or_default());
            for path in rule.http.iter().flat_map(|http| &http.paths) {
                let to = self.backend(&namespace, &path.backend, scheme).await?;
                policies.push(Policy::route(from.clone(), to));
            }
        }

        if let Some(backend) = &spec.default_backend {
            let to = self.backend(&namespace, backend, scheme).await?;
            policies.push(Policy::to(to));
        }

        Ok(policies)
    }

    async fn backend(
        &self,
        namespace: &str,
        backend: &IngressBackend,
        scheme: &str,
    ) -> Result<String, TranslateError> {
        let service = backend
            .service
            .as_ref()
            .ok_or(TranslateError::MissingBackendService)?;

        let port = match service.port.as_ref() {
            Some(port) => match (port.number, port.name.as_deref()) {
                (Some(number), _) => number,
                (None, Some(name)) => self.named_port(namespace, &service.name, name).await?,
                (None, None) => {
                    return Err(TranslateError::MissingBackendPort {
                        service: service.name.clone(),
                    })
                }
            },
            None => {
                return Err(TranslateError::MissingBackendPort {
                    service: service.name.clone(),
                })
            }
        };

        Ok(self.url(scheme, &service.name, namespace, port))
    }

    async fn named_port(
        &self,
        namespace: &str,
        service: &str,
        port: &str,
    ) -> Result<i32, TranslateError> {
        let svc = self
            .store
            .get::<Service>(namespace, service)
            .await?
            .ok_or_else(|| TranslateError::ServiceNotFound {
                namespace: namespace.to_string(),
                name: service.to_string(),
            })?;

        svc.spec
            .iter()
            .flat_map(|spec| spec.ports.iter().flatten())
            .find(|p| p.name.as_deref() == Some(port))
            .map(|p| p.port)
            .ok_or_else(|| TranslateError::PortNotFound {
                namespace: namespace.to_string(),
                name: service.to_string(),
                port: port.to_string(),
            })
    }

    fn url(&self, scheme: &str, service: &str, namespace: &str, port: i32) -> String {
        format!(
            "{scheme}://{service}.{namespace}.svc.{}:{port}",
            self.cluster_domain
        )
    }
}
