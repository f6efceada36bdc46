//! Unit tests for PolicyClass and Pod admission validation
//!
//! These tests use the public policy API to verify enforcement from an
//! external perspective. Internal policy tests are in src/webhooks/policies/.

use crate::common::*;
use overcommit_operator::webhooks::policies::{
    ClassValidationContext, validate_all, validate_class_label,
};
use std::collections::BTreeMap;

fn check(class: &overcommit_operator::crd::PolicyClass) -> overcommit_operator::webhooks::ValidationResult {
    validate_all(&ClassValidationContext::new(class, None, &[]))
}

#[test]
fn test_valid_class_passes_all_policies() {
    let class = PolicyClassBuilder::new("standard").ratios(0.25, 0.8).excluding("^kube-").build();
    assert!(check(&class).allowed);
}

#[test]
fn test_ratio_of_one_is_valid() {
    let class = PolicyClassBuilder::new("noop").ratios(1.0, 1.0).build();
    assert!(check(&class).allowed);
}

#[test]
fn test_out_of_range_names_the_field() {
    let result = check(&PolicyClassBuilder::new("bad").ratios(0.5, 0.0).build());
    assert_eq!(
        result.message.as_deref(),
        Some("memoryRatio must be greater than 0 and equal or lower than 1, failed creating bad class")
    );

    let result = check(&PolicyClassBuilder::new("bad").ratios(-0.1, 0.5).build());
    assert!(result.message.unwrap().starts_with("cpuRatio"));
}

#[test]
fn test_five_decimals_rejected() {
    let result = check(&PolicyClassBuilder::new("bad").ratios(0.5, 0.33333).build());
    assert_eq!(result.reason.as_deref(), Some("InvalidPrecision"));
}

#[test]
fn test_float_noise_within_four_decimals_accepted() {
    // 0.1 + 0.2 is not exactly 0.3 in binary
    let class = PolicyClassBuilder::new("noisy").ratios(0.1 + 0.2, 0.7).build();
    assert!(check(&class).allowed);
}

#[test]
fn test_duplicate_default() {
    let existing = vec![PolicyClassBuilder::new("standard").default_class().build()];
    let new = PolicyClassBuilder::new("burst").default_class().build();
    let result = validate_all(&ClassValidationContext::new(&new, None, &existing));
    assert_eq!(result.reason.as_deref(), Some("DuplicateDefault"));
    assert!(ClassValidationContext::new(&new, None, &existing).is_create());
}

#[test]
fn test_pod_label_rule() {
    let mut pod = pod_with_limits(&[]);
    assert!(!validate_class_label(&pod, SELECTOR_LABEL).allowed);

    pod.metadata.labels = Some(BTreeMap::from([(
        SELECTOR_LABEL.to_string(),
        "anything".to_string(),
    )]));
    assert!(validate_class_label(&pod, SELECTOR_LABEL).allowed);
}
