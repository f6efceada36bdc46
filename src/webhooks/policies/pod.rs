//! Pod class-label policy

use k8s_openapi::api::core::v1::Pod;

use super::ValidationResult;

/// Rule: the pod carries the ClusterPolicy's selector label
pub fn validate_class_label(pod: &Pod, selector_label: &str) -> ValidationResult {
    let labelled = pod
        .metadata
        .labels
        .as_ref()
        .is_some_and(|labels| labels.contains_key(selector_label));
    if labelled {
        ValidationResult::allowed()
    } else {
        ValidationResult::denied(
            "MissingClassLabel",
            &format!("Pod without overcommit class label '{selector_label}'"),
        )
    }
}
