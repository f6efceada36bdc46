use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Condition, ResourceStatus};

/// PolicyClass is a named bundle of CPU and memory overcommit ratios
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "overcommit.example.com",
    version = "v1alpha1",
    kind = "PolicyClass",
    plural = "policyclasses",
    shortname = "pc",
    status = "PolicyClassStatus",
    printcolumn = r#"{"name":"CPU", "type":"number", "jsonPath":".spec.cpuRatio"}"#,
    printcolumn = r#"{"name":"Memory", "type":"number", "jsonPath":".spec.memoryRatio"}"#,
    printcolumn = r#"{"name":"Default", "type":"boolean", "jsonPath":".spec.isDefault"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyClassSpec {
    /// Fraction of the CPU limit requested, in (0, 1] with at most 4 decimals
    #[schemars(range(min = 0.0001, max = 1.0))]
    pub cpu_ratio: f64,

    /// Fraction of the memory limit requested, in (0, 1] with at most 4 decimals
    #[schemars(range(min = 0.0001, max = 1.0))]
    pub memory_ratio: f64,

    /// Regular expression of namespaces this class never applies to
    #[serde(default)]
    pub excluded_namespaces: String,

    /// Whether pods without a class label fall back to this class
    #[serde(default)]
    pub is_default: bool,

    /// Extra labels added to the pod template of the class webhook
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Extra annotations added to the pod template of the class webhook
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Status of the PolicyClass
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyClassStatus {
    /// Readiness of the class webhook unit, in a fixed order
    #[serde(default)]
    pub resources: Vec<ResourceStatus>,

    /// Conditions representing the current state
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
