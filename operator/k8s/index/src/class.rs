use anyhow::{anyhow, Error, Result};
use pomerium_operator_k8s_api::Kind;
use regex::Regex;
use std::collections::BTreeMap;

/// Decides whether an object is owned by this operator from its controller class annotation.
#[derive(Clone, Debug)]
pub struct ClassFilter {
    annotation: String,
    class: Class,
    claim_unclassified: bool,
}

#[derive(Clone, Debug)]
enum Class {
    Exact(String),
    Pattern(Regex),
}

/// Determines what happens to a resource's existing policies when it can no longer be
/// translated.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TranslationFailure {
    /// Keep serving the last policies that were successfully produced.
    #[default]
    Preserve,

    /// Drop the resource's policies.
    Clear,
}

// === impl ClassFilter ===

impl ClassFilter {
    /// Builds a filter for objects of the given kind.
    ///
    /// A class of the form `/pattern/` matches any annotation value containing a match of the
    /// regular expression; any other class must match exactly.
    pub fn new(kind: Kind, class: &str, claim_unclassified: bool) -> Result<Self> {
        let class = match class
            .strip_prefix('/')
            .and_then(|c| c.strip_suffix('/'))
        {
            Some(pattern) => Class::Pattern(
                Regex::new(pattern)
                    .map_err(|error| anyhow!("invalid {kind} class {class:?}: {error}"))?,
            ),
            None => Class::Exact(class.to_string()),
        };

        Ok(Self {
            annotation: kind.class_annotation(),
            class,
            claim_unclassified,
        })
    }

    pub fn matches(&self, annotations: Option<&BTreeMap<String, String>>) -> bool {
        match annotations.and_then(|a| a.get(&self.annotation)) {
            None => self.claim_unclassified,
            Some(value) => match &self.class {
                Class::Exact(class) => value == class,
                Class::Pattern(re) => re.is_match(value),
            },
        }
    }
}

// === impl TranslationFailure ===

impl std::str::FromStr for TranslationFailure {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "preserve" => Ok(Self::Preserve),
            "clear" => Ok(Self::Clear),
            s => Err(anyhow!("invalid translation failure policy: {:?}", s)),
        }
    }
}

impl std::fmt::Display for TranslationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preserve => "preserve".fmt(f),
            Self::Clear => "clear".fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn annotated(key: &str, value: &str) -> BTreeMap<String, String> {
        btreemap! { key.to_string() => value.to_string() }
    }

    #[test]
    fn exact_class() {
        let filter = ClassFilter::new(Kind::Ingress, "pomerium", true).unwrap();
        assert!(filter.matches(Some(&annotated("kubernetes.io/ingress.class", "pomerium"))));
        assert!(!filter.matches(Some(&annotated("kubernetes.io/ingress.class", "nginx"))));
        assert!(!filter.matches(Some(&annotated("kubernetes.io/ingress.class", "pomerium-2"))));

        // The annotation is specific to the kind.
        assert!(filter.matches(Some(&annotated("kubernetes.io/service.class", "nginx"))));
    }

    #[test]
    fn pattern_class() {
        let filter = ClassFilter::new(Kind::Service, "/^pom.*$/", true).unwrap();
        assert!(filter.matches(Some(&annotated("kubernetes.io/service.class", "pomerium"))));
        assert!(!filter.matches(Some(&annotated("kubernetes.io/service.class", "nginx"))));

        // Patterns are not anchored implicitly.
        let filter = ClassFilter::new(Kind::Service, "/pom/", true).unwrap();
        assert!(filter.matches(Some(&annotated("kubernetes.io/service.class", "my-pomerium"))));
    }

    #[test]
    fn unclassified() {
        let claim = ClassFilter::new(Kind::Ingress, "pomerium", true).unwrap();
        assert!(claim.matches(None));
        assert!(claim.matches(Some(&BTreeMap::new())));

        let ignore = ClassFilter::new(Kind::Ingress, "pomerium", false).unwrap();
        assert!(!ignore.matches(None));
        assert!(!ignore.matches(Some(&BTreeMap::new())));
    }

    #[test]
    fn invalid_pattern() {
        assert!(ClassFilter::new(Kind::Ingress, "/(/", true).is_err());
        // A lone slash is a literal class.
        assert!(ClassFilter::new(Kind::Ingress, "/", true).is_ok());
    }

    #[test]
    fn translation_failure_modes() {
        for mode in [TranslationFailure::Preserve, TranslationFailure::Clear] {
            assert_eq!(mode.to_string().parse::<TranslationFailure>().unwrap(), mode);
        }
        assert_eq!(TranslationFailure::default(), TranslationFailure::Preserve);
        assert!("drop".parse::<TranslationFailure>().is_err());
    }
}
