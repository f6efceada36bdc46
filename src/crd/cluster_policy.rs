use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Condition, ResourceStatus};

/// Name of the only ClusterPolicy the operator acts on
pub const CLUSTER_POLICY_NAME: &str = "cluster";

/// ClusterPolicy is the singleton that configures overcommit for the whole cluster
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "overcommit.example.com",
    version = "v1alpha1",
    kind = "ClusterPolicy",
    plural = "clusterpolicies",
    shortname = "ocp",
    status = "ClusterPolicyStatus",
    printcolumn = r#"{"name":"Label", "type":"string", "jsonPath":".spec.selectorLabel"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPolicySpec {
    /// Label key carrying the PolicyClass name on pods and namespaces
    #[schemars(length(min = 1))]
    pub selector_label: String,

    /// Extra labels added to the pod template of every generated workload
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Extra annotations added to the pod template of every generated workload
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Status of the ClusterPolicy
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPolicyStatus {
    /// Readiness of every shared resource, in a fixed order
    #[serde(default)]
    pub resources: Vec<ResourceStatus>,

    /// Conditions representing the current state
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ClusterPolicy {
    /// Whether this object is the singleton the operator manages
    pub fn is_singleton(&self) -> bool {
        self.metadata.name.as_deref() == Some(CLUSTER_POLICY_NAME)
    }
}
