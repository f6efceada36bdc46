//! Unit tests for request mutation arithmetic

use crate::common::*;
use json_patch::PatchOperation;
use overcommit_operator::admission::{Ratios, has_limits, mutation_patch};
use serde_json::json;

fn apply(pod: &k8s_openapi::api::core::v1::Pod, ratios: Ratios) -> serde_json::Value {
    let ops = mutation_patch(pod, ratios).unwrap();
    let mut value = serde_json::to_value(pod).unwrap();
    json_patch::patch(&mut value, &ops).unwrap();
    value
}

#[test]
fn test_half_ratios_on_one_cpu_one_gibibyte() {
    let pod = pod_with_limits(&[("cpu", "1000m"), ("memory", "1Gi")]);
    let patched = apply(&pod, Ratios::new(0.5, 0.5));
    let resources = &patched["spec"]["containers"][0]["resources"];
    assert_eq!(resources["requests"], json!({"cpu": "500m", "memory": "536870912"}));
    assert_eq!(resources["limits"], json!({"cpu": "1000m", "memory": "1Gi"}));
}

#[test]
fn test_requests_floor() {
    let pod = pod_with_limits(&[("cpu", "333m"), ("memory", "1000")]);
    let patched = apply(&pod, Ratios::new(0.5, 0.3333));
    let requests = &patched["spec"]["containers"][0]["resources"]["requests"];
    assert_eq!(requests["cpu"], "166m");
    assert_eq!(requests["memory"], "333");
}

#[test]
fn test_identity_ratios_produce_no_operations() {
    let pod = pod_with_limits(&[("cpu", "1"), ("memory", "1Gi")]);
    assert!(Ratios::new(1.0, 1.0).is_identity());
    assert!(mutation_patch(&pod, Ratios::new(1.0, 1.0)).unwrap().is_empty());
}

#[test]
fn test_init_containers_are_scaled_and_sidecars_skipped() {
    let pod = pod_with_init(&[("cpu", "2")]);
    let ops = mutation_patch(&pod, Ratios::new(0.25, 1.0)).unwrap();
    let paths: Vec<String> = ops
        .iter()
        .map(|op| match op {
            PatchOperation::Replace(r) => r.path.to_string(),
            other => panic!("unexpected operation {other:?}"),
        })
        .collect();
    assert_eq!(
        paths,
        vec!["/spec/containers/0/resources", "/spec/initContainers/0/resources"]
    );

    let patched = apply(&pod, Ratios::new(0.25, 1.0));
    assert_eq!(patched["spec"]["initContainers"][0]["resources"]["requests"]["cpu"], "500m");
    assert!(patched["spec"]["containers"][1]["resources"]["requests"].is_null());
}

#[test]
fn test_pod_without_limits() {
    let pod = pod_with_limits(&[]);
    assert!(!has_limits(&pod));
    assert!(mutation_patch(&pod, Ratios::new(0.5, 0.5)).unwrap().is_empty());
}

#[test]
fn test_four_decimal_ratios_floor_exactly() {
    let pod = pod_with_limits(&[("cpu", "100m"), ("memory", "100")]);
    let patched = apply(&pod, Ratios::new(0.29, 0.29));
    let requests = &patched["spec"]["containers"][0]["resources"]["requests"];
    assert_eq!(requests, &json!({"cpu": "29m", "memory": "29"}));
}
