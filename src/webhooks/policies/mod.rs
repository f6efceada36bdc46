//! Admission validation policies
//!
//! Each policy module exports a `validate` function that checks one rule.
//! [`ValidationEngine`] gathers the cluster state a policy needs and runs them.

pub mod class;
pub mod pod;

pub use class::{validate_default_uniqueness, validate_excluded_namespaces, validate_ratios};
pub use pod::validate_class_label;

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tracing::warn;

use crate::controller::store::OvercommitStore;
use crate::crd::PolicyClass;

/// Result of a policy validation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationResult {
    pub allowed: bool,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }
}

/// Context for PolicyClass validation including the old object for UPDATE
pub struct ClassValidationContext<'a> {
    pub class: &'a PolicyClass,
    pub old_class: Option<&'a PolicyClass>,
    /// Every PolicyClass currently stored
    pub existing_classes: &'a [PolicyClass],
}

impl<'a> ClassValidationContext<'a> {
    pub fn new(
        class: &'a PolicyClass,
        old_class: Option<&'a PolicyClass>,
        existing_classes: &'a [PolicyClass],
    ) -> Self {
        Self {
            class,
            old_class,
            existing_classes,
        }
    }

    pub fn is_create(&self) -> bool {
        self.old_class.is_none()
    }
}

/// Run all PolicyClass policies and return the first failure
pub fn validate_all(ctx: &ClassValidationContext) -> ValidationResult {
    let policies: Vec<fn(&ClassValidationContext) -> ValidationResult> = vec![
        validate_ratios,
        validate_excluded_namespaces,
        validate_default_uniqueness,
    ];

    for policy in policies {
        let result = policy(ctx);
        if !result.allowed {
            return result;
        }
    }
    ValidationResult::allowed()
}

/// Runs admission validation against the live cluster state
#[derive(Clone)]
pub struct ValidationEngine {
    store: Arc<dyn OvercommitStore>,
}

impl ValidationEngine {
    pub fn new(store: Arc<dyn OvercommitStore>) -> Self {
        Self { store }
    }

    /// Validate a PolicyClass CREATE or UPDATE
    ///
    /// Denies when the stored classes cannot be listed, since default
    /// uniqueness cannot be checked without them.
    pub async fn validate_class(
        &self,
        class: &PolicyClass,
        old_class: Option<&PolicyClass>,
    ) -> ValidationResult {
        let existing = match self.store.list_policy_classes().await {
            Ok(classes) => classes,
            Err(e) => {
                warn!(error = %e, "Failed to list PolicyClasses");
                return ValidationResult::denied(
                    "ClassListFailed",
                    &format!("unable to list PolicyClasses: {e}"),
                );
            }
        };
        validate_all(&ClassValidationContext::new(class, old_class, &existing))
    }

    /// Validate a Pod CREATE or UPDATE
    ///
    /// Allows the pod when the ClusterPolicy cannot be read.
    pub async fn validate_pod(&self, pod: &Pod) -> ValidationResult {
        match self.store.get_cluster_policy().await {
            Ok(Some(policy)) => validate_class_label(pod, &policy.spec.selector_label),
            Ok(None) => {
                warn!("ClusterPolicy not found, allowing pod");
                ValidationResult::allowed()
            }
            Err(e) => {
                warn!(error = %e, "Failed to read ClusterPolicy, allowing pod");
                ValidationResult::allowed()
            }
        }
    }
}
