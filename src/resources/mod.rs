pub mod certificate;
pub mod common;
pub mod deployment;
pub mod drift;
pub mod service;
pub mod units;
pub mod webhook_config;

pub use common::{API_VERSION, FIELD_MANAGER, owner_reference, standard_labels};
pub use drift::{DerivedResource, EnsureOutcome, converge, ensure};
