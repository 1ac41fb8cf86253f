use crate::ResourceKey;
use k8s_openapi::api::{core::v1::Service, networking::v1::Ingress};
use kube::{
    api::{DynamicObject, ObjectMeta},
    Resource,
};
use serde::de::DeserializeOwned;
use std::{collections::BTreeMap, fmt};

/// The kinds of objects that may produce proxy policies.
#[derive(Clone, Debug, PartialEq)]
pub enum Watched {
    Ingress(Ingress),
    Service(Service),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Ingress,
    Service,
}

#[derive(Debug, thiserror::Error)]
pub enum UnsupportedKind {
    #[error("unsupported object kind: {0}")]
    Kind(String),

    #[error("invalid {kind} object: {source}")]
    Invalid {
        kind: Kind,
        #[source]
        source: serde_json::Error,
    },
}

// === impl Kind ===

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingress => "Ingress",
            Self::Service => "Service",
        }
    }

    /// The annotation naming the controller class that owns an object of this kind, e.g.
    /// `kubernetes.io/ingress.class`.
    pub fn class_annotation(&self) -> String {
        format!("kubernetes.io/{}.class", self.as_str().to_lowercase())
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

// === impl Watched ===

impl Watched {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Ingress(_) => Kind::Ingress,
            Self::Service(_) => Kind::Service,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Ingress(ing) => &ing.metadata,
            Self::Service(svc) => &svc.metadata,
        }
    }

    pub fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata().annotations.as_ref()
    }

    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn key(&self) -> ResourceKey {
        match self {
            Self::Ingress(ing) => ResourceKey::of(ing),
            Self::Service(svc) => ResourceKey::of(svc),
        }
    }
}

impl From<Ingress> for Watched {
    fn from(ing: Ingress) -> Self {
        Self::Ingress(ing)
    }
}

impl From<Service> for Watched {
    fn from(svc: Service) -> Self {
        Self::Service(svc)
    }
}

impl TryFrom<DynamicObject> for Watched {
    type Error = UnsupportedKind;

    fn try_from(obj: DynamicObject) -> Result<Self, Self::Error> {
        let (api_version, kind) = obj
            .types
            .as_ref()
            .map(|t| (t.api_version.clone(), t.kind.clone()))
            .unwrap_or_default();

        if api_version == Ingress::api_version(&()) && kind == Ingress::kind(&()) {
            return decode(&obj, Kind::Ingress).map(Self::Ingress);
        }
        if api_version == Service::api_version(&()) && kind == Service::kind(&()) {
            return decode(&obj, Kind::Service).map(Self::Service);
        }

        Err(UnsupportedKind::Kind(format!("{api_version}/{kind}")))
    }
}

fn decode<K: DeserializeOwned>(obj: &DynamicObject, kind: Kind) -> Result<K, UnsupportedKind> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|source| UnsupportedKind::Invalid { kind, source })
}
