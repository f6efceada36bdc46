//! Pod admission: class resolution and request mutation
//!
//! [`AdmissionEngine::mutate`] never fails. Anything that goes wrong while
//! resolving or computing the patch is logged and the pod is admitted as is.

pub mod mutation;
pub mod owner;
pub mod quantity;
pub mod resolution;

use std::sync::Arc;

use json_patch::PatchOperation;
use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use kube::ResourceExt;
use kube::runtime::events::EventType;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::controller::store::OvercommitStore;
use crate::events::{EventPublisher, actions, reasons};
use crate::health::Metrics;

pub use mutation::{MutationError, Ratios, has_limits, mutation_patch};
pub use owner::{MAX_OWNER_DEPTH, PodOwner, pod_display_name, resolve_owner};
pub use quantity::QuantityError;
pub use resolution::{Resolution, ResolutionError, ResolutionSource, resolve_class};

/// Why a pod was admitted without changes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnchangedReason {
    IdentityRatios,
    NamespaceExcluded,
    NoLimits,
    /// Resolution or patch computation failed; the message is logged
    Failed(String),
}

impl UnchangedReason {
    /// Value of the `reason` label on `pods_not_mutated_total`
    pub fn label(&self) -> &'static str {
        match self {
            UnchangedReason::IdentityRatios => "overcommit values = 1",
            UnchangedReason::NamespaceExcluded => "namespace excluded",
            UnchangedReason::NoLimits => "no limits",
            UnchangedReason::Failed(_) => "error",
        }
    }
}

/// Result of running a pod through the engine
#[derive(Clone, Debug)]
pub enum MutationOutcome {
    Patched {
        class: String,
        ratios: Ratios,
        operations: Vec<PatchOperation>,
    },
    Unchanged {
        class: Option<String>,
        reason: UnchangedReason,
    },
}

impl MutationOutcome {
    /// Patch operations to send back, empty when the pod is unchanged
    pub fn operations(&self) -> &[PatchOperation] {
        match self {
            MutationOutcome::Patched { operations, .. } => operations,
            MutationOutcome::Unchanged { .. } => &[],
        }
    }
}

/// Message attached to the `OvercommitApplied` event
pub fn overcommit_message(pod: &str, class: &str, ratios: Ratios) -> String {
    format!(
        "Applied overcommit to containers of Pod '{pod}': PolicyClass = {class}, CPU Overcommit = {:.2}, Memory Overcommit = {:.2}",
        ratios.cpu, ratios.memory
    )
}

/// Whether `pattern` excludes `namespace`; an empty pattern excludes nothing
fn namespace_excluded(pattern: &str, namespace: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    match Regex::new(pattern) {
        Ok(re) => re.is_match(namespace),
        Err(e) => {
            warn!(pattern, error = %e, "Invalid excludedNamespaces pattern, not excluding");
            false
        }
    }
}

fn pod_reference(pod: &Pod, namespace: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("Pod".to_string()),
        name: Some(pod_display_name(pod)),
        namespace: Some(namespace.to_string()),
        uid: pod.metadata.uid.clone(),
        ..Default::default()
    }
}

/// Applies PolicyClass ratios to pods at admission time
#[derive(Clone)]
pub struct AdmissionEngine {
    store: Arc<dyn OvercommitStore>,
    events: Arc<dyn EventPublisher>,
    metrics: Arc<Metrics>,
    /// Class this webhook serves, used to label metrics before resolution
    serving_class: String,
}

impl AdmissionEngine {
    pub fn new(
        store: Arc<dyn OvercommitStore>,
        events: Arc<dyn EventPublisher>,
        metrics: Arc<Metrics>,
        serving_class: Option<String>,
    ) -> Self {
        Self {
            store,
            events,
            metrics,
            serving_class: serving_class.unwrap_or_default(),
        }
    }

    /// Compute the mutation for `pod` being admitted into `namespace`
    pub async fn mutate(&self, pod: &Pod, namespace: &str) -> MutationOutcome {
        self.metrics.record_pod_requested(&self.serving_class);
        let generate_name = pod.metadata.generate_name.clone().unwrap_or_default();

        let outcome = self.compute(pod, namespace).await;
        match &outcome {
            MutationOutcome::Patched {
                class,
                ratios,
                operations,
            } => {
                let owner = resolve_owner(self.store.as_ref(), pod, namespace).await;
                self.metrics
                    .record_pod_mutated(class, &owner.kind, &owner.name, namespace);
                info!(
                    pod = %pod_display_name(pod),
                    namespace,
                    class = %class,
                    owner_kind = %owner.kind,
                    owner = %owner.name,
                    containers = operations.len(),
                    "Applied overcommit"
                );
                self.events
                    .publish(
                        &pod_reference(pod, namespace),
                        EventType::Normal,
                        reasons::OVERCOMMIT_APPLIED,
                        actions::MUTATE,
                        Some(overcommit_message(&pod_display_name(pod), class, *ratios)),
                    )
                    .await;
            }
            MutationOutcome::Unchanged { class, reason } => {
                if let UnchangedReason::Failed(message) = reason {
                    warn!(pod = %pod_display_name(pod), namespace, error = %message, "Admitting pod unchanged");
                } else {
                    debug!(pod = %pod_display_name(pod), namespace, reason = reason.label(), "Pod not mutated");
                }
                let class = class.as_deref().unwrap_or(&self.serving_class);
                self.metrics
                    .record_pod_not_mutated(class, &generate_name, namespace, reason.label());
            }
        }
        outcome
    }

    async fn compute(&self, pod: &Pod, namespace: &str) -> MutationOutcome {
        let failed = |class: Option<String>, message: String| MutationOutcome::Unchanged {
            class,
            reason: UnchangedReason::Failed(message),
        };

        let selector_label = match self.store.get_cluster_policy().await {
            Ok(Some(policy)) => policy.spec.selector_label,
            Ok(None) => return failed(None, ResolutionError::NoClusterPolicy.to_string()),
            Err(e) => return failed(None, ResolutionError::from(e).to_string()),
        };

        let resolution = match resolve_class(
            self.store.as_ref(),
            &selector_label,
            pod.metadata.labels.as_ref(),
            namespace,
        )
        .await
        {
            Ok(resolution) => resolution,
            Err(e) => return failed(None, e.to_string()),
        };
        let class_name = resolution.class.name_any();
        debug!(class = %class_name, source = %resolution.source, "Resolved PolicyClass");

        let unchanged = |reason| MutationOutcome::Unchanged {
            class: Some(class_name.clone()),
            reason,
        };

        if namespace_excluded(&resolution.class.spec.excluded_namespaces, namespace) {
            return unchanged(UnchangedReason::NamespaceExcluded);
        }
        let ratios = Ratios::from(&resolution.class.spec);
        if ratios.is_identity() {
            return unchanged(UnchangedReason::IdentityRatios);
        }
        if !has_limits(pod) {
            return unchanged(UnchangedReason::NoLimits);
        }

        match mutation_patch(pod, ratios) {
            Ok(operations) if operations.is_empty() => unchanged(UnchangedReason::NoLimits),
            Ok(operations) => MutationOutcome::Patched {
                class: class_name,
                ratios,
                operations,
            },
            Err(e) => failed(Some(class_name), e.to_string()),
        }
    }
}
