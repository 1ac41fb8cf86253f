//! Pomerium configuration model shared by the operator's controllers.
//!
//! The proxy's configuration schema is large and owned by the proxy itself. The operator only
//! needs to write its `policy` list, so everything else is carried as opaque YAML values and
//! round-trips untouched.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod options;
mod policy;

pub use self::{
    options::Options,
    policy::{Attributes, Policy},
};
pub use serde_yaml::{Error as YamlError, Value};
