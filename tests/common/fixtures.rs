//! Builders for ClusterPolicy, PolicyClass and Pod test objects
//!
//! ```rust,ignore
//! let class = PolicyClassBuilder::new("burst").ratios(0.2, 0.4).default_class().build();
//! let pod = pod_with_limits(&[("cpu", "1"), ("memory", "1Gi")]);
//! ```

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::core::ObjectMeta;
use overcommit_operator::config::OperatorConfig;
use overcommit_operator::crd::{ClusterPolicy, ClusterPolicySpec, PolicyClass, PolicyClassSpec};

pub const SELECTOR_LABEL: &str = "overcommit.example.com/class";
pub const OPERATOR_NAMESPACE: &str = "overcommit-system";

/// Singleton ClusterPolicy with the standard selector label
pub fn cluster_policy() -> ClusterPolicy {
    let mut policy = ClusterPolicy::new(
        "cluster",
        ClusterPolicySpec {
            selector_label: SELECTOR_LABEL.to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        },
    );
    policy.metadata.uid = Some("cluster-uid".to_string());
    policy.metadata.generation = Some(1);
    policy
}

pub fn operator_config() -> OperatorConfig {
    OperatorConfig {
        namespace: OPERATOR_NAMESPACE.to_string(),
        ..Default::default()
    }
}

/// Builder for PolicyClass objects
pub struct PolicyClassBuilder {
    name: String,
    spec: PolicyClassSpec,
}

impl PolicyClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            spec: PolicyClassSpec {
                cpu_ratio: 0.5,
                memory_ratio: 0.5,
                excluded_namespaces: String::new(),
                is_default: false,
                labels: BTreeMap::new(),
                annotations: BTreeMap::new(),
            },
        }
    }

    pub fn ratios(mut self, cpu: f64, memory: f64) -> Self {
        self.spec.cpu_ratio = cpu;
        self.spec.memory_ratio = memory;
        self
    }

    pub fn default_class(mut self) -> Self {
        self.spec.is_default = true;
        self
    }

    pub fn excluding(mut self, pattern: &str) -> Self {
        self.spec.excluded_namespaces = pattern.to_string();
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.spec.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> PolicyClass {
        PolicyClass {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                uid: Some(format!("{}-uid", self.name)),
                generation: Some(1),
                ..Default::default()
            },
            spec: self.spec,
            status: None,
        }
    }
}

fn container(name: &str, limits: &[(&str, &str)]) -> Container {
    let limits: BTreeMap<String, Quantity> = limits
        .iter()
        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
        .collect();
    Container {
        name: name.to_string(),
        resources: Some(ResourceRequirements {
            limits: (!limits.is_empty()).then_some(limits),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod with one container declaring `limits`
pub fn pod_with_limits(limits: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            generate_name: Some("web-".to_string()),
            namespace: Some("apps".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container("app", limits)],
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod with an init container and a sidecar without limits
pub fn pod_with_init(limits: &[(&str, &str)]) -> Pod {
    let mut pod = pod_with_limits(limits);
    if let Some(spec) = pod.spec.as_mut() {
        spec.containers.push(container("sidecar", &[]));
        spec.init_containers = Some(vec![container("migrate", limits)]);
    }
    pod
}
