//! Request arithmetic for pod containers

use std::collections::BTreeMap;

use json_patch::{PatchOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::{Container, Pod, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use thiserror::Error;

use crate::admission::quantity::{
    QuantityError, cpu_millis, format_cpu_millis, format_memory_bytes, memory_bytes, scale,
};
use crate::crd::PolicyClassSpec;

const CPU: &str = "cpu";
const MEMORY: &str = "memory";

/// Why a pod's requests could not be rewritten
#[derive(Debug, Error)]
pub enum MutationError {
    #[error(transparent)]
    Quantity(#[from] QuantityError),

    #[error("failed to serialize container resources: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// CPU and memory request-to-limit ratios
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ratios {
    pub cpu: f64,
    pub memory: f64,
}

impl Ratios {
    pub fn new(cpu: f64, memory: f64) -> Self {
        Self { cpu, memory }
    }

    /// Both ratios are exactly 1, so requests stay as declared
    pub fn is_identity(&self) -> bool {
        self.cpu == 1.0 && self.memory == 1.0
    }
}

impl From<&PolicyClassSpec> for Ratios {
    fn from(spec: &PolicyClassSpec) -> Self {
        Self::new(spec.cpu_ratio, spec.memory_ratio)
    }
}

/// Requests derived from the limits of one container
///
/// Returns None when the container declares no limits or nothing changes.
pub fn scaled_resources(
    resources: Option<&ResourceRequirements>,
    ratios: Ratios,
) -> Result<Option<ResourceRequirements>, QuantityError> {
    let Some(resources) = resources else {
        return Ok(None);
    };
    let Some(limits) = resources.limits.as_ref().filter(|l| !l.is_empty()) else {
        return Ok(None);
    };

    let mut requests: BTreeMap<String, Quantity> = resources.requests.clone().unwrap_or_default();
    let mut changed = false;

    if ratios.cpu != 1.0
        && let Some(limit) = limits.get(CPU)
    {
        let millis = scale(cpu_millis(&limit.0)?, ratios.cpu);
        requests.insert(CPU.to_string(), Quantity(format_cpu_millis(millis)));
        changed = true;
    }
    if ratios.memory != 1.0
        && let Some(limit) = limits.get(MEMORY)
    {
        let bytes = scale(memory_bytes(&limit.0)?, ratios.memory);
        requests.insert(MEMORY.to_string(), Quantity(format_memory_bytes(bytes)));
        changed = true;
    }

    if !changed {
        return Ok(None);
    }
    Ok(Some(ResourceRequirements {
        requests: Some(requests),
        ..resources.clone()
    }))
}

fn container_ops(
    field: &str,
    containers: &[Container],
    ratios: Ratios,
) -> Result<Vec<PatchOperation>, MutationError> {
    let mut ops = Vec::new();
    for (i, container) in containers.iter().enumerate() {
        if let Some(resources) = scaled_resources(container.resources.as_ref(), ratios)? {
            let index = i.to_string();
            ops.push(PatchOperation::Replace(ReplaceOperation {
                path: PointerBuf::from_tokens(["spec", field, index.as_str(), "resources"]),
                value: serde_json::to_value(&resources)?,
            }));
        }
    }
    Ok(ops)
}

/// Whether any container or init container declares limits
pub fn has_limits(pod: &Pod) -> bool {
    let Some(spec) = pod.spec.as_ref() else {
        return false;
    };
    spec.containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .any(|c| {
            c.resources
                .as_ref()
                .and_then(|r| r.limits.as_ref())
                .is_some_and(|l| !l.is_empty())
        })
}

/// Replace operations scaling the requests of every container with limits
pub fn mutation_patch(pod: &Pod, ratios: Ratios) -> Result<Vec<PatchOperation>, MutationError> {
    let Some(spec) = pod.spec.as_ref() else {
        return Ok(Vec::new());
    };
    let mut ops = container_ops("containers", &spec.containers, ratios)?;
    if let Some(init) = spec.init_containers.as_deref() {
        ops.extend(container_ops("initContainers", init, ratios)?);
    }
    Ok(ops)
}
