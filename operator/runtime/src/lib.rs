#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use pomerium_operator_core as core;
pub use pomerium_operator_k8s_api as k8s;
pub use pomerium_operator_k8s_config as config;
pub use pomerium_operator_k8s_index as index;

mod args;
mod lease;

pub use self::args::Args;
