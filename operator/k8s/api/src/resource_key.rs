use kube::{Resource, ResourceExt};
use std::fmt;

/// Uniquely identifies a namespaced cluster object by its type and name.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResourceKey {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

// === impl ResourceKey ===

impl ResourceKey {
    /// Builds a key for an object of type `K` from the type's static metadata.
    pub fn new<K>(namespace: impl ToString, name: impl ToString) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self {
            group: K::group(&()).to_string(),
            version: K::version(&()).to_string(),
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn of<K>(resource: &K) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self::new::<K>(resource.namespace().unwrap_or_default(), resource.name_any())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.group.is_empty() {
            write!(f, "{}/", self.group)?;
        }
        write!(
            f,
            "{}/{} {}/{}",
            self.version, self.kind, self.namespace, self.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::{core::v1::Service, networking::v1::Ingress};
    use kube::api::ObjectMeta;

    #[test]
    fn from_type_info() {
        let key = ResourceKey::new::<Ingress>("ns", "ing-a");
        assert_eq!(key.group, "networking.k8s.io");
        assert_eq!(key.version, "v1");
        assert_eq!(key.kind, "Ingress");
        assert_eq!(key.to_string(), "networking.k8s.io/v1/Ingress ns/ing-a");

        let svc = Service {
            metadata: ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some("svc-a".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let key = ResourceKey::of(&svc);
        assert_eq!(key, ResourceKey::new::<Service>("ns", "svc-a"));
        assert_eq!(key.to_string(), "v1/Service ns/svc-a");
    }

    #[test]
    fn kinds_are_distinct() {
        assert_ne!(
            ResourceKey::new::<Ingress>("ns", "a"),
            ResourceKey::new::<Service>("ns", "a"),
        );
    }
}
