#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod resource_key;
mod store;
mod watched;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use self::{
    resource_key::ResourceKey,
    store::{Object, ObjectStore, StoreError},
    watched::{Kind, UnsupportedKind, Watched},
};
pub use k8s_openapi::{
    api::{
        self,
        apps::v1::{Deployment, DeploymentSpec},
        coordination::v1::Lease,
        core::v1::{PodTemplateSpec, Secret, Service, ServicePort, ServiceSpec},
        networking::v1::{
            HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
            IngressServiceBackend, IngressSpec, ServiceBackendPort,
        },
    },
    ByteString,
};
pub use kube::{
    api::{Api, DynamicObject, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt, TypeMeta},
    Client, Error, Resource,
};
