//! Derives proxy policies from cluster resources.
//!
//! Ingress and Service watches are applied to a [`Dispatch`] index, which queues each change for
//! the kind's [`Reconciler`]. The reconciler checks that the object belongs to this operator's
//! controller class, translates it into policies, and records them in the configuration
//! aggregator:
//!
//! ```text
//! [ watch ] -> [ Dispatch ] -> [ Reconciler ] -> [ Translator ] -> [ Aggregator ]
//! ```

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod class;
mod dispatch;
mod overrides;
mod reconcile;
mod translate;

#[cfg(test)]
mod tests;

pub use self::{
    class::{ClassFilter, TranslationFailure},
    dispatch::{Dispatch, SharedDispatch},
    overrides::{InvalidOverride, OVERRIDE_PREFIX},
    reconcile::{Notification, Reconciler},
    translate::{TranslateError, Translator, BACKEND_PROTOCOL_ANNOTATION},
};
