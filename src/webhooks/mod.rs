//! Admission webhooks for pods and PolicyClasses
//!
//! The pod mutating endpoint applies overcommit through
//! [`crate::admission::AdmissionEngine`]. The validating endpoints run the
//! policies in [`policies`].

pub mod policies;
mod server;

pub use policies::{ClassValidationContext, ValidationEngine, ValidationResult};
pub use server::{
    WEBHOOK_PORT, WebhookError, WebhookState, create_webhook_router, mutate_pod,
    run_webhook_server, validate_pod, validate_policy_class,
};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
