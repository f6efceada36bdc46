//! Owner-chain resolution for admission telemetry
//!
//! Pods created by a Deployment are attributed to the Deployment rather
//! than its ReplicaSet; other pods are attributed to the root of their
//! owner chain. Lookups never block admission: on any failure the deepest
//! owner reached so far is used.

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::debug;

use crate::controller::store::OvercommitStore;

/// Owner chains deeper than this are cut short
pub const MAX_OWNER_DEPTH: usize = 8;

/// Workload a pod is attributed to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodOwner {
    pub kind: String,
    pub name: String,
}

impl PodOwner {
    fn from_ref(owner: &OwnerReference) -> Self {
        Self {
            kind: owner.kind.clone(),
            name: owner.name.clone(),
        }
    }
}

/// Display name of a pod, falling back to its generateName on CREATE
pub fn pod_display_name(pod: &Pod) -> String {
    pod.metadata
        .name
        .clone()
        .or_else(|| pod.metadata.generate_name.clone())
        .unwrap_or_default()
}

async fn owners_of(
    store: &dyn OvercommitStore,
    owner: &OwnerReference,
    namespace: &str,
) -> Option<OwnerReference> {
    match store
        .object_owners(&owner.api_version, &owner.kind, namespace, &owner.name)
        .await
    {
        Ok(owners) => owners.and_then(|o| o.into_iter().next()),
        Err(e) => {
            debug!(kind = %owner.kind, name = %owner.name, error = %e, "Owner lookup failed");
            None
        }
    }
}

/// Resolve the workload that owns `pod`
pub async fn resolve_owner(store: &dyn OvercommitStore, pod: &Pod, namespace: &str) -> PodOwner {
    let Some(first) = pod.metadata.owner_references.as_ref().and_then(|o| o.first()) else {
        return PodOwner {
            kind: "pod".to_string(),
            name: pod_display_name(pod),
        };
    };

    if first.kind == "ReplicaSet" {
        return match owners_of(store, first, namespace).await {
            Some(parent) if parent.kind == "Deployment" => PodOwner::from_ref(&parent),
            _ => PodOwner::from_ref(first),
        };
    }

    let mut current = first.clone();
    for _ in 0..MAX_OWNER_DEPTH {
        match owners_of(store, &current, namespace).await {
            Some(parent) => current = parent,
            None => break,
        }
    }
    PodOwner::from_ref(&current)
}
