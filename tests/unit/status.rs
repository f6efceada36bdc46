//! Unit tests for status aggregation and conditions

use overcommit_operator::controller::status::{
    ConditionBuilder, class_status, cluster_policy_status, condition_status, condition_types,
};
use overcommit_operator::crd::{ManagedKind, ResourceStatus, all_ready};

fn resources(ready: bool) -> Vec<ResourceStatus> {
    vec![
        ResourceStatus::new(ManagedKind::Certificate, "burst-webhook-certificate", true),
        ResourceStatus::new(ManagedKind::Deployment, "burst-overcommit-webhook", ready),
    ]
}

#[test]
fn test_all_ready() {
    assert!(all_ready(&resources(true)));
    assert!(!all_ready(&resources(false)));
}

#[test]
fn test_not_ready_message_lists_missing_objects() {
    let status = class_status(resources(false), None, Some(2));
    let ready = &status.conditions[0];
    assert_eq!(ready.type_, condition_types::READY);
    assert_eq!(ready.status, condition_status::FALSE);
    assert_eq!(ready.message, "Resources not ready: Deployment/burst-overcommit-webhook");
    assert_eq!(ready.observed_generation, Some(2));
}

#[test]
fn test_transition_time_kept_while_status_unchanged() {
    let first = cluster_policy_status(resources(true), None, Some(1));
    let second = cluster_policy_status(resources(true), Some(&first), Some(2));
    assert_eq!(
        first.conditions[0].last_transition_time,
        second.conditions[0].last_transition_time
    );
    assert_eq!(second.conditions[0].observed_generation, Some(2));
}

#[test]
fn test_status_flip_updates_condition_in_place() {
    let conditions = ConditionBuilder::new(Some(1))
        .ready(false, "ResourcesNotReady", "waiting")
        .ready(true, "AllResourcesReady", "done")
        .build();
    assert_eq!(conditions.len(), 1);
    assert_eq!(conditions[0].status, condition_status::TRUE);
    assert_eq!(conditions[0].reason, "AllResourcesReady");
}

#[test]
fn test_resource_status_serializes_kind_name() {
    let value = serde_json::to_value(ResourceStatus::new(
        ManagedKind::MutatingWebhookConfiguration,
        "burst-overcommit-webhook",
        true,
    ))
    .unwrap();
    assert_eq!(
        value,
        serde_json::json!({
            "kind": "MutatingWebhookConfiguration",
            "name": "burst-overcommit-webhook",
            "ready": true
        })
    );
}
