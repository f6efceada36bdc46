//! Common utilities for derived resource generation
//!
//! Shared names, labels and owner references used by every generator so
//! that the controllers and their tests agree on how objects are named.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::{ClusterPolicy, PolicyClass};

/// API version for the overcommit CRDs
pub const API_VERSION: &str = "overcommit.example.com/v1alpha1";

/// Kind of the singleton owner
pub const CLUSTER_POLICY_KIND: &str = "ClusterPolicy";

/// Kind owning each class webhook unit
pub const POLICY_CLASS_KIND: &str = "PolicyClass";

/// Operator field manager name
pub const FIELD_MANAGER: &str = "overcommit-operator";

/// Self-signed issuer shared by every webhook certificate
pub const ISSUER_NAME: &str = "overcommit-issuer";

/// Port the admission server listens on inside each pod
pub const WEBHOOK_PORT: i32 = 9443;

/// Port of the health and metrics server
pub const METRICS_PORT: i32 = 8080;

/// Mount path of the serving certificate inside webhook pods
pub const WEBHOOK_CERT_DIR: &str = "/etc/webhook/certs";

pub const POD_MUTATING_PATH: &str = "/mutate--v1-pod";
pub const POD_VALIDATING_PATH: &str = "/validate--v1-pod";
pub const CLASS_VALIDATING_PATH: &str = "/validate-overcommit-example-com-v1alpha1-policyclass";

/// Names of the objects generated for one PolicyClass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassUnitNames {
    pub certificate: String,
    pub secret: String,
    pub deployment: String,
    pub service: String,
    pub webhook_configuration: String,
    pub webhook: String,
    pub default_webhook: String,
}

impl ClassUnitNames {
    pub fn new(class: &str) -> Self {
        Self {
            certificate: format!("{class}-webhook-certificate"),
            secret: format!("{class}-webhook-secret"),
            deployment: format!("{class}-overcommit-webhook"),
            service: format!("{class}-webhook-service"),
            webhook_configuration: format!("{class}-overcommit-webhook"),
            webhook: format!("{class}-overcommit.overcommit.example.com"),
            default_webhook: format!("default-{class}-overcommit.overcommit.example.com"),
        }
    }
}

/// Names of one shared validating unit owned by the ClusterPolicy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatingUnitNames {
    pub deployment: &'static str,
    pub service: &'static str,
    pub certificate: &'static str,
    pub secret: &'static str,
    pub webhook: &'static str,
}

pub const CLASS_VALIDATING_UNIT: ValidatingUnitNames = ValidatingUnitNames {
    deployment: "overcommit-class-validating-webhook",
    service: "overcommit-class-validating-webhook-service",
    certificate: "class-validating-webhook",
    secret: "class-validating-webhook",
    webhook: "policyclass.overcommit.example.com",
};

pub const POD_VALIDATING_UNIT: ValidatingUnitNames = ValidatingUnitNames {
    deployment: "overcommit-pod-validating-webhook",
    service: "overcommit-pod-validating-webhook-service",
    certificate: "pod-validating-webhook",
    secret: "pod-validating-webhook",
    webhook: "podvalidation.overcommit.example.com",
};

/// Deployment running the PolicyClass controller role
pub const CLASS_CONTROLLER_DEPLOYMENT: &str = "overcommit-class-controller";

/// Generate a controller owner reference to the ClusterPolicy
pub fn owner_reference(policy: &ClusterPolicy) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: CLUSTER_POLICY_KIND.to_string(),
        name: policy.name_any(),
        uid: policy.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Generate a controller owner reference to a PolicyClass
pub fn class_owner_reference(class: &PolicyClass) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: POLICY_CLASS_KIND.to_string(),
        name: class.name_any(),
        uid: class.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Whether `refs` already carries a current controller reference to `policy`
pub fn has_owner_reference(refs: &[OwnerReference], policy: &ClusterPolicy) -> bool {
    let uid = policy.metadata.uid.as_deref().unwrap_or_default();
    refs.iter().any(|r| {
        r.kind == CLUSTER_POLICY_KIND
            && r.api_version == API_VERSION
            && r.uid == uid
            && r.controller == Some(true)
    })
}

/// Replace any ClusterPolicy reference in `refs` with the current one
///
/// Owner references to other kinds are kept as they are.
pub fn merge_owner_reference(refs: &[OwnerReference], policy: &ClusterPolicy) -> Vec<OwnerReference> {
    let mut merged: Vec<OwnerReference> = refs
        .iter()
        .filter(|r| r.kind != CLUSTER_POLICY_KIND)
        .cloned()
        .collect();
    merged.push(owner_reference(policy));
    merged
}

/// Standard labels for every derived object
pub fn standard_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), app.to_string()),
        ("app.kubernetes.io/name".to_string(), app.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
    ])
}

/// Selector matching the pods of a derived Deployment
pub fn app_selector(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app.to_string())])
}

/// Pod template labels: user labels first, then `app` which cannot be overridden
pub fn template_labels(app: &str, user: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut labels = user.clone();
    labels.insert("app".to_string(), app.to_string());
    labels
}

/// DNS names a webhook certificate must cover for `service`
pub fn service_dns_names(service: &str, namespace: &str) -> Vec<String> {
    vec![
        format!("{service}.{namespace}.svc"),
        format!("{service}.{namespace}.svc.cluster.local"),
    ]
}
