use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: String,

    /// Generation observed when condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Kinds of objects the operator derives from policy objects
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManagedKind {
    Issuer,
    Certificate,
    Deployment,
    Service,
    MutatingWebhookConfiguration,
    ValidatingWebhookConfiguration,
}

impl ManagedKind {
    /// Whether objects of this kind live in the operator namespace
    pub fn is_namespaced(&self) -> bool {
        !matches!(
            self,
            ManagedKind::MutatingWebhookConfiguration | ManagedKind::ValidatingWebhookConfiguration
        )
    }
}

impl std::fmt::Display for ManagedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagedKind::Issuer => write!(f, "Issuer"),
            ManagedKind::Certificate => write!(f, "Certificate"),
            ManagedKind::Deployment => write!(f, "Deployment"),
            ManagedKind::Service => write!(f, "Service"),
            ManagedKind::MutatingWebhookConfiguration => write!(f, "MutatingWebhookConfiguration"),
            ManagedKind::ValidatingWebhookConfiguration => {
                write!(f, "ValidatingWebhookConfiguration")
            }
        }
    }
}

/// Readiness of one derived object
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    pub kind: ManagedKind,
    pub name: String,
    pub ready: bool,
}

impl ResourceStatus {
    pub fn new(kind: ManagedKind, name: impl Into<String>, ready: bool) -> Self {
        Self {
            kind,
            name: name.into(),
            ready,
        }
    }
}

/// Whether every entry in a resource list is ready
///
/// An empty list is never ready.
pub fn all_ready(resources: &[ResourceStatus]) -> bool {
    !resources.is_empty() && resources.iter().all(|r| r.ready)
}
