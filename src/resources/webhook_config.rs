//! Admission webhook registration generation
//!
//! Registrations carry a `cert-manager.io/inject-ca-from` annotation; the
//! CA bundle injected by cert-manager is preserved when drift is corrected.

use std::collections::BTreeMap;

use json_patch::{AddOperation, PatchOperation};
use k8s_openapi::api::admissionregistration::v1::{
    MatchCondition, MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations,
    ServiceReference, ValidatingWebhook, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, OwnerReference,
};
use kube::core::ObjectMeta;
use serde::Serialize;
use serde_json::{Value, json};

use crate::controller::error::Result;
use crate::crd::ManagedKind;
use crate::resources::common::standard_labels;
use crate::resources::drift::{DerivedResource, pointer, sync_map_entries, sync_owner_references};

pub const INJECT_CA_ANNOTATION: &str = "cert-manager.io/inject-ca-from";

/// Derived MutatingWebhookConfiguration
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PodMutatingWebhook(pub MutatingWebhookConfiguration);

/// Derived ValidatingWebhookConfiguration
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidatingRegistration(pub ValidatingWebhookConfiguration);

/// Where the API server reaches a webhook
#[derive(Clone, Debug)]
pub struct WebhookTarget<'a> {
    pub service: &'a str,
    pub namespace: &'a str,
    pub path: &'a str,
    pub certificate: &'a str,
}

impl WebhookTarget<'_> {
    fn client_config(&self) -> WebhookClientConfig {
        WebhookClientConfig {
            service: Some(ServiceReference {
                name: self.service.to_string(),
                namespace: self.namespace.to_string(),
                path: Some(self.path.to_string()),
                port: Some(443),
            }),
            ..Default::default()
        }
    }

    fn metadata(&self, name: &str, owner: Option<OwnerReference>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(standard_labels(name)),
            annotations: Some(BTreeMap::from([(
                INJECT_CA_ANNOTATION.to_string(),
                format!("{}/{}", self.namespace, self.certificate),
            )])),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        }
    }
}

fn rule(operations: &[&str], api_group: &str, version: &str, resource: &str) -> RuleWithOperations {
    RuleWithOperations {
        operations: Some(operations.iter().map(|o| o.to_string()).collect()),
        api_groups: Some(vec![api_group.to_string()]),
        api_versions: Some(vec![version.to_string()]),
        resources: Some(vec![resource.to_string()]),
        ..Default::default()
    }
}

fn label_selector(key: &str, operator: &str, values: Option<Vec<String>>) -> LabelSelector {
    LabelSelector {
        match_expressions: Some(vec![LabelSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values,
        }]),
        ..Default::default()
    }
}

/// Quote `value` as a single-quoted CEL string literal
pub fn cel_string(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

/// Match condition skipping namespaces matched by `pattern`; None when empty
pub fn exclude_namespaces_condition(pattern: &str) -> Option<MatchCondition> {
    if pattern.is_empty() {
        return None;
    }
    Some(MatchCondition {
        name: "exclude-namespaces".to_string(),
        expression: format!("!object.metadata.namespace.matches({})", cel_string(pattern)),
    })
}

/// Inputs for a PolicyClass's pod-mutating registration
#[derive(Clone, Debug)]
pub struct ClassWebhookParams<'a> {
    pub name: &'a str,
    pub webhook: &'a str,
    pub default_webhook: &'a str,
    pub class: &'a str,
    pub selector_label: &'a str,
    pub excluded_namespaces: &'a str,
    pub is_default: bool,
    pub target: WebhookTarget<'a>,
    pub owner: Option<OwnerReference>,
}

fn mutating_webhook(
    name: &str,
    target: &WebhookTarget<'_>,
    object_selector: LabelSelector,
    excluded_namespaces: &str,
) -> MutatingWebhook {
    MutatingWebhook {
        name: name.to_string(),
        admission_review_versions: vec!["v1".to_string()],
        client_config: target.client_config(),
        failure_policy: Some("Fail".to_string()),
        side_effects: "None".to_string(),
        rules: Some(vec![rule(&["CREATE"], "", "v1", "pods")]),
        object_selector: Some(object_selector),
        match_conditions: exclude_namespaces_condition(excluded_namespaces).map(|c| vec![c]),
        ..Default::default()
    }
}

/// Generate the pod-mutating registration for one PolicyClass
///
/// A default class adds a second webhook catching pods without the class label.
pub fn generate_class_webhook(params: ClassWebhookParams<'_>) -> PodMutatingWebhook {
    let mut webhooks = vec![mutating_webhook(
        params.webhook,
        &params.target,
        label_selector(params.selector_label, "In", Some(vec![params.class.to_string()])),
        params.excluded_namespaces,
    )];

    if params.is_default {
        webhooks.push(mutating_webhook(
            params.default_webhook,
            &params.target,
            label_selector(params.selector_label, "DoesNotExist", None),
            params.excluded_namespaces,
        ));
    }

    PodMutatingWebhook(MutatingWebhookConfiguration {
        metadata: params.target.metadata(params.name, params.owner),
        webhooks: Some(webhooks),
    })
}

/// Generate the registration validating PolicyClass writes
pub fn generate_class_validating_webhook(
    name: &str,
    webhook: &str,
    target: WebhookTarget<'_>,
    owner: Option<OwnerReference>,
) -> ValidatingRegistration {
    let hook = ValidatingWebhook {
        name: webhook.to_string(),
        admission_review_versions: vec!["v1".to_string()],
        client_config: target.client_config(),
        failure_policy: Some("Fail".to_string()),
        side_effects: "None".to_string(),
        rules: Some(vec![rule(
            &["CREATE", "UPDATE"],
            "overcommit.example.com",
            "v1alpha1",
            "policyclasses",
        )]),
        ..Default::default()
    };

    ValidatingRegistration(ValidatingWebhookConfiguration {
        metadata: target.metadata(name, owner),
        webhooks: Some(vec![hook]),
    })
}

/// Generate the registration validating pod writes
///
/// Only pods carrying the selector label are sent, and the operator's own
/// namespace is never checked.
pub fn generate_pod_validating_webhook(
    name: &str,
    webhook: &str,
    selector_label: &str,
    target: WebhookTarget<'_>,
    owner: Option<OwnerReference>,
) -> ValidatingRegistration {
    let hook = ValidatingWebhook {
        name: webhook.to_string(),
        admission_review_versions: vec!["v1".to_string()],
        client_config: target.client_config(),
        failure_policy: Some("Fail".to_string()),
        side_effects: "None".to_string(),
        rules: Some(vec![rule(&["CREATE", "UPDATE"], "", "v1", "pods")]),
        object_selector: Some(label_selector(selector_label, "Exists", None)),
        match_conditions: Some(vec![MatchCondition {
            name: "exclude-operator-namespace".to_string(),
            expression: format!("object.metadata.namespace != {}", cel_string(target.namespace)),
        }]),
        ..Default::default()
    };

    ValidatingRegistration(ValidatingWebhookConfiguration {
        metadata: target.metadata(name, owner),
        webhooks: Some(vec![hook]),
    })
}

// =============================================================================
// Drift
// =============================================================================

fn or_default(value: Option<&Value>, default: Value) -> Value {
    match value {
        Some(Value::Null) | None => default,
        Some(v) => v.clone(),
    }
}

/// A webhook reduced to the fields the operator sets, with API defaults applied
fn project_webhook(hook: &Value) -> Value {
    let service = hook.pointer("/clientConfig/service");
    let rules: Vec<Value> = hook
        .get("rules")
        .and_then(Value::as_array)
        .map(|rules| {
            rules
                .iter()
                .map(|r| {
                    json!({
                        "operations": or_default(r.get("operations"), json!([])),
                        "apiGroups": or_default(r.get("apiGroups"), json!([])),
                        "apiVersions": or_default(r.get("apiVersions"), json!([])),
                        "resources": or_default(r.get("resources"), json!([])),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    json!({
        "name": or_default(hook.get("name"), Value::Null),
        "service": {
            "name": or_default(service.and_then(|s| s.get("name")), Value::Null),
            "namespace": or_default(service.and_then(|s| s.get("namespace")), Value::Null),
            "path": or_default(service.and_then(|s| s.get("path")), Value::Null),
            "port": or_default(service.and_then(|s| s.get("port")), json!(443)),
        },
        "rules": rules,
        "failurePolicy": or_default(hook.get("failurePolicy"), json!("Fail")),
        "sideEffects": or_default(hook.get("sideEffects"), Value::Null),
        "admissionReviewVersions": or_default(hook.get("admissionReviewVersions"), json!([])),
        "objectSelector": or_default(hook.get("objectSelector"), json!({})),
        "matchConditions": or_default(hook.get("matchConditions"), json!([])),
    })
}

fn project_webhooks(config: &Value) -> Vec<Value> {
    config
        .get("webhooks")
        .and_then(Value::as_array)
        .map(|hooks| hooks.iter().map(project_webhook).collect())
        .unwrap_or_default()
}

/// Desired webhooks carrying the CA bundle already injected into `live`
fn with_live_ca_bundles(desired: &Value, live: &Value) -> Value {
    let mut hooks = desired.get("webhooks").cloned().unwrap_or_else(|| json!([]));
    let live_hooks = live.get("webhooks").and_then(Value::as_array);

    if let (Some(hooks), Some(live_hooks)) = (hooks.as_array_mut(), live_hooks) {
        for hook in hooks.iter_mut() {
            let bundle = live_hooks
                .iter()
                .find(|l| l.get("name") == hook.get("name"))
                .and_then(|l| l.pointer("/clientConfig/caBundle"))
                .cloned();
            if let (Some(bundle), Some(client_config)) = (bundle, hook.get_mut("clientConfig")) {
                client_config["caBundle"] = bundle;
            }
        }
    }
    hooks
}

fn registration_drift(desired: &Value, live: &Value) -> Vec<PatchOperation> {
    let mut ops = Vec::new();
    sync_map_entries(&mut ops, desired, live, &["metadata", "annotations"]);

    if project_webhooks(desired) != project_webhooks(live) {
        ops.push(PatchOperation::Add(AddOperation {
            path: pointer(&["webhooks"]),
            value: with_live_ca_bundles(desired, live),
        }));
    }

    sync_owner_references(&mut ops, desired, live);
    ops
}

impl DerivedResource for PodMutatingWebhook {
    const KIND: ManagedKind = ManagedKind::MutatingWebhookConfiguration;

    fn name(&self) -> &str {
        self.0.metadata.name.as_deref().unwrap_or_default()
    }

    fn drift(&self, live: &Value) -> Result<Vec<PatchOperation>> {
        let desired = serde_json::to_value(&self.0)?;
        Ok(registration_drift(&desired, live))
    }
}

impl DerivedResource for ValidatingRegistration {
    const KIND: ManagedKind = ManagedKind::ValidatingWebhookConfiguration;

    fn name(&self) -> &str {
        self.0.metadata.name.as_deref().unwrap_or_default()
    }

    fn drift(&self, live: &Value) -> Result<Vec<PatchOperation>> {
        let desired = serde_json::to_value(&self.0)?;
        Ok(registration_drift(&desired, live))
    }
}
