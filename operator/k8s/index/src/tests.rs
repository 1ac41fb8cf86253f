use crate::*;
use kubert::index::IndexNamespacedResource;
use maplit::btreemap;
use pomerium_operator_core::Policy;
use pomerium_operator_k8s_api::{
    fake::MemoryStore, HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend,
    IngressRule, IngressServiceBackend, IngressSpec, Kind, ObjectMeta, ResourceKey,
    ServiceBackendPort, Service, ServicePort, ServiceSpec, Watched,
};
use pomerium_operator_k8s_config::{
    Aggregator, AggregatorMetrics, ConfigTarget, SharedAggregator,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

fn meta(name: &str, annotations: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        namespace: Some("default".to_string()),
        name: Some(name.to_string()),
        annotations: Some(annotations),
        ..Default::default()
    }
}

fn service(name: &str, ports: &[(&str, i32)], annotations: BTreeMap<String, String>) -> Service {
    Service {
        metadata: meta(name, annotations),
        spec: Some(ServiceSpec {
            ports: Some(
                ports
                    .iter()
                    .map(|(name, port)| ServicePort {
                        name: Some(name.to_string()),
                        port: *port,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn backend(service: &str, port: ServiceBackendPort) -> IngressBackend {
    IngressBackend {
        service: Some(IngressServiceBackend {
            name: service.to_string(),
            port: Some(port),
        }),
        ..Default::default()
    }
}

fn named(name: &str) -> ServiceBackendPort {
    ServiceBackendPort {
        name: Some(name.to_string()),
        number: None,
    }
}

fn number(number: i32) -> ServiceBackendPort {
    ServiceBackendPort {
        name: None,
        number: Some(number),
    }
}

fn rule(host: &str, backends: Vec<IngressBackend>) -> IngressRule {
    IngressRule {
        host: Some(host.to_string()),
        http: Some(HTTPIngressRuleValue {
            paths: backends
                .into_iter()
                .map(|backend| HTTPIngressPath {
                    backend,
                    path: Some("/".to_string()),
                    path_type: "Prefix".to_string(),
                })
                .collect(),
        }),
    }
}

fn ingress(
    name: &str,
    rules: Vec<IngressRule>,
    default_backend: Option<IngressBackend>,
    annotations: BTreeMap<String, String>,
) -> Ingress {
    Ingress {
        metadata: meta(name, annotations),
        spec: Some(IngressSpec {
            rules: Some(rules),
            default_backend,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn translator(store: &MemoryStore) -> Translator<MemoryStore> {
    Translator::new(store.clone(), "cluster.local")
}

fn aggregator(store: &MemoryStore) -> SharedAggregator<MemoryStore> {
    let target = ConfigTarget {
        namespace: "kube-system".to_string(),
        name: "pomerium".to_string(),
    };
    let agg = Aggregator::shared(store.clone(), target, AggregatorMetrics::default());
    agg.set_base_config("").expect("empty base config must parse");
    agg
}

fn reconciler(
    store: &MemoryStore,
    agg: &SharedAggregator<MemoryStore>,
    kind: Kind,
    on_failure: TranslationFailure,
) -> Reconciler<MemoryStore> {
    Reconciler::new(
        ClassFilter::new(kind, "pomerium", true).unwrap(),
        translator(store),
        agg.clone(),
        on_failure,
    )
}

fn policies(agg: &SharedAggregator<MemoryStore>) -> Vec<Policy> {
    agg.current_config().expect("config must render").policy
}

#[tokio::test]
async fn ingress_named_port() {
    let store = MemoryStore::with(Some(service("svc-a", &[("https", 443)], BTreeMap::new())));
    let ing = ingress(
        "ing-a",
        vec![rule("app.example.org", vec![backend("svc-a", named("https"))])],
        None,
        btreemap! {
            BACKEND_PROTOCOL_ANNOTATION.to_string() => "HTTPS".to_string(),
        },
    );

    let policies = translator(&store)
        .translate(&ing.into())
        .await
        .expect("ingress must translate");
    assert_eq!(
        policies,
        vec![Policy::route(
            "https://app.example.org",
            "https://svc-a.default.svc.cluster.local:443"
        )]
    );
}

#[tokio::test]
async fn ingress_named_port_defaults_to_http() {
    let store = MemoryStore::with(Some(service("svc-a", &[("https", 443)], BTreeMap::new())));
    let ing = ingress(
        "ing-a",
        vec![rule("app.example.org", vec![backend("svc-a", named("https"))])],
        None,
        BTreeMap::new(),
    );

    let policies = translator(&store)
        .translate(&ing.into())
        .await
        .expect("ingress must translate");
    assert_eq!(
        policies,
        vec![Policy::route(
            "https://app.example.org",
            "http://svc-a.default.svc.cluster.local:443"
        )]
    );
}

#[tokio::test]
async fn ingress_rules_and_default_backend() {
    let store = MemoryStore::default();
    let ing = ingress(
        "ing-a",
        vec![
            rule(
                "a.example.org",
                vec![backend("svc-a", number(80)), backend("svc-b", number(8080))],
            ),
            rule("b.example.org", vec![backend("svc-c", number(9090))]),
        ],
        Some(backend("fallback", number(80))),
        BTreeMap::new(),
    );

    let policies = Translator::new(store, "example.internal")
        .translate(&ing.into())
        .await
        .unwrap();
    assert_eq!(
        policies,
        vec![
            Policy::route(
                "https://a.example.org",
                "http://svc-a.default.svc.example.internal:80"
            ),
            Policy::route(
                "https://a.example.org",
                "http://svc-b.default.svc.example.internal:8080"
            ),
            Policy::route(
                "https://b.example.org",
                "http://svc-c.default.svc.example.internal:9090"
            ),
            Policy::to("http://fallback.default.svc.example.internal:80"),
        ]
    );
}

#[tokio::test]
async fn service_ports_with_overrides() {
    let store = MemoryStore::default();
    let svc = service(
        "svc-a",
        &[("http", 80), ("admin", 9000)],
        btreemap! {
            "ingress.pomerium.io/from".to_string() => "https://svc-a.example.org".to_string(),
            "ingress.pomerium.io/allowed_groups".to_string() => r#"["admins"]"#.to_string(),
        },
    );

    let policies = translator(&store).translate(&svc.into()).await.unwrap();
    let expected = |to: &str| Policy {
        allowed_groups: vec!["admins".to_string()],
        ..Policy::route("https://svc-a.example.org", to)
    };
    assert_eq!(
        policies,
        vec![
            expected("http://svc-a.default.svc.cluster.local:80"),
            expected("http://svc-a.default.svc.cluster.local:9000"),
        ]
    );
}

#[tokio::test]
async fn named_port_failures() {
    let store = MemoryStore::with(Some(service("svc-a", &[("http", 80)], BTreeMap::new())));
    let translator = translator(&store);

    // One unresolvable backend fails the whole ingress.
    let ing = ingress(
        "ing-a",
        vec![rule(
            "app.example.org",
            vec![backend("svc-a", number(80)), backend("svc-a", named("https"))],
        )],
        None,
        BTreeMap::new(),
    );
    match translator.translate(&ing.into()).await {
        Err(TranslateError::PortNotFound { name, port, .. }) => {
            assert_eq!(name, "svc-a");
            assert_eq!(port, "https");
        }
        res => panic!("unexpected result: {res:?}"),
    }

    let ing = ingress(
        "ing-b",
        vec![rule("app.example.org", vec![backend("svc-b", named("http"))])],
        None,
        BTreeMap::new(),
    );
    assert!(matches!(
        translator.translate(&ing.into()).await,
        Err(TranslateError::ServiceNotFound { .. })
    ));
}

#[tokio::test]
async fn backend_without_service() {
    let ing = ingress(
        "ing-a",
        vec![rule("app.example.org", vec![IngressBackend::default()])],
        None,
        BTreeMap::new(),
    );
    assert!(matches!(
        translator(&MemoryStore::default())
            .translate(&ing.into())
            .await,
        Err(TranslateError::MissingBackendService)
    ));
}

#[tokio::test]
async fn invalid_override() {
    let svc = service(
        "svc-a",
        &[("http", 80)],
        btreemap! {
            "ingress.pomerium.io/allowed_users".to_string() => "{}".to_string(),
        },
    );
    assert!(matches!(
        translator(&MemoryStore::default()).translate(&svc.into()).await,
        Err(TranslateError::InvalidOverride(_))
    ));
}

#[tokio::test]
async fn reconciles_services() {
    let store = MemoryStore::default();
    let agg = aggregator(&store);
    let reconciler = reconciler(&store, &agg, Kind::Service, TranslationFailure::Preserve);

    let svc = service("svc-a", &[("http", 80)], BTreeMap::new());
    let key = ResourceKey::of(&svc);
    reconciler.handle(key.clone(), Some(svc.into())).await;
    assert_eq!(
        policies(&agg),
        vec![Policy::to("http://svc-a.default.svc.cluster.local:80")]
    );

    // Deletion removes the policies, and repeated deletions are ignored.
    reconciler.handle(key.clone(), None).await;
    assert!(policies(&agg).is_empty());
    reconciler.handle(key, None).await;
    assert!(policies(&agg).is_empty());
}

#[tokio::test]
async fn ignores_other_classes() {
    let store = MemoryStore::default();
    let agg = aggregator(&store);
    let reconciler = reconciler(&store, &agg, Kind::Service, TranslationFailure::Preserve);

    let svc = service("svc-a", &[("http", 80)], BTreeMap::new());
    let key = ResourceKey::of(&svc);
    reconciler.handle(key.clone(), Some(svc.into())).await;
    let before = policies(&agg);

    let other = service(
        "svc-a",
        &[("http", 8080)],
        btreemap! {
            "kubernetes.io/service.class".to_string() => "nginx".to_string(),
        },
    );
    reconciler.handle(key, Some(other.into())).await;
    assert_eq!(policies(&agg), before);
}

#[tokio::test]
async fn empty_translation_removes() {
    let store = MemoryStore::default();
    let agg = aggregator(&store);
    let reconciler = reconciler(&store, &agg, Kind::Service, TranslationFailure::Preserve);

    let svc = service("svc-a", &[("http", 80)], BTreeMap::new());
    let key = ResourceKey::of(&svc);
    reconciler.handle(key.clone(), Some(svc.into())).await;
    assert_eq!(policies(&agg).len(), 1);

    let svc = service("svc-a", &[], BTreeMap::new());
    reconciler.handle(key.clone(), Some(svc.into())).await;
    assert!(policies(&agg).is_empty());
    assert!(matches!(
        agg.remove(&key),
        Err(pomerium_operator_k8s_config::Error::NotIndexed(_))
    ));
}

#[tokio::test]
async fn translation_failures() {
    let broken = |name: &str| {
        ingress(
            name,
            vec![rule("app.example.org", vec![backend("missing", named("http"))])],
            None,
            BTreeMap::new(),
        )
    };
    let working = |name: &str| {
        ingress(
            name,
            vec![rule("app.example.org", vec![backend("svc-a", number(80))])],
            None,
            BTreeMap::new(),
        )
    };

    for (on_failure, expected) in [
        (TranslationFailure::Preserve, 1),
        (TranslationFailure::Clear, 0),
    ] {
        let store = MemoryStore::default();
        let agg = aggregator(&store);
        let reconciler = reconciler(&store, &agg, Kind::Ingress, on_failure);

        let key = ResourceKey::new::<Ingress>("default", "ing-a");
        reconciler
            .handle(key.clone(), Some(working("ing-a").into()))
            .await;
        reconciler.handle(key, Some(broken("ing-a").into())).await;
        assert_eq!(policies(&agg).len(), expected, "{on_failure}");
    }
}

#[tokio::test]
async fn dispatches_to_reconciler() {
    let store = MemoryStore::default();
    let agg = aggregator(&store);
    let (tx, rx) = mpsc::unbounded_channel();
    let dispatch = Dispatch::shared(tx);

    let svc = service("svc-a", &[("http", 80)], BTreeMap::new());
    let key = ResourceKey::of(&svc);
    dispatch.write().apply(svc.clone());
    IndexNamespacedResource::<Service>::delete(
        &mut *dispatch.write(),
        "default".to_string(),
        "svc-b".to_string(),
    );
    dispatch.write().apply(service("svc-c", &[("http", 80)], BTreeMap::new()));

    let mut rx = rx;
    assert_eq!(
        rx.recv().await,
        Some(Notification {
            key: key.clone(),
            object: Some(Watched::Service(svc)),
        })
    );
    assert_eq!(
        rx.recv().await,
        Some(Notification {
            key: ResourceKey::new::<Service>("default", "svc-b"),
            object: None,
        })
    );

    // The reconciler drains the remaining notifications and stops once the dispatcher is gone.
    drop(dispatch);
    reconciler(&store, &agg, Kind::Service, TranslationFailure::Preserve)
        .run(rx)
        .await;
    assert_eq!(
        policies(&agg),
        vec![Policy::to("http://svc-c.default.svc.cluster.local:80")]
    );
}
