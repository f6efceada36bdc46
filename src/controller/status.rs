//! Status and conditions management for policy objects
//!
//! Status writes re-read the latest object, skip the write when nothing
//! changed and send a merge patch pinned to the fresh `resourceVersion`.
//! Conflicts are retried with a short exponential backoff.

use std::future::Future;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::controller::error::{BackoffConfig, Result};
use crate::controller::store::OvercommitStore;
use crate::crd::{ClusterPolicyStatus, Condition, PolicyClassStatus, ResourceStatus, all_ready};

/// Standard condition types following Kubernetes conventions
pub mod condition_types {
    /// Every derived resource exists
    pub const READY: &str = "Ready";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Maximum status write attempts before giving up on a conflict
pub const STATUS_WRITE_ATTEMPTS: u32 = 3;

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    /// Create from existing conditions
    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't
    ///
    /// `lastTransitionTime` only moves when the status flips.
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = Utc::now().to_rfc3339();
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: Utc::now().to_rfc3339(),
                observed_generation: self.generation,
            });
        }
        self
    }

    /// Set the Ready condition
    pub fn ready(self, is_ready: bool, reason: &str, message: &str) -> Self {
        let status = if is_ready {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(condition_types::READY, status, reason, message)
    }

    /// Set Ready from the aggregated readiness of `resources`
    pub fn resources_ready(self, resources: &[ResourceStatus]) -> Self {
        if all_ready(resources) {
            self.ready(true, "AllResourcesReady", "All managed resources are ready")
        } else {
            let missing: Vec<String> = resources
                .iter()
                .filter(|r| !r.ready)
                .map(|r| format!("{}/{}", r.kind, r.name))
                .collect();
            self.ready(
                false,
                "ResourcesNotReady",
                &format!("Resources not ready: {}", missing.join(", ")),
            )
        }
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Outcome of a status update
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusWrite {
    Written,
    /// The computed status already matched the stored one
    Unchanged,
    /// The object disappeared before the write
    Gone,
}

/// Run `attempt` until it succeeds, retrying write conflicts with backoff
pub async fn retry_on_conflict<F, Fut>(backoff: &BackoffConfig, mut attempt: F) -> Result<StatusWrite>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<StatusWrite>>,
{
    let mut tries = 0;
    loop {
        match attempt().await {
            Err(e) if e.is_conflict() && tries + 1 < STATUS_WRITE_ATTEMPTS => {
                let delay = backoff.delay_for_attempt(tries);
                debug!(attempt = tries + 1, ?delay, "Status write conflict, retrying");
                tokio::time::sleep(delay).await;
                tries += 1;
            }
            other => return other,
        }
    }
}

/// Writes status subresources through the store
pub struct StatusManager<'a> {
    store: &'a dyn OvercommitStore,
    backoff: BackoffConfig,
}

impl<'a> StatusManager<'a> {
    /// Create a new status manager
    pub fn new(store: &'a dyn OvercommitStore) -> Self {
        Self {
            store,
            backoff: BackoffConfig::status_conflict(),
        }
    }

    /// Recompute and store the status of a PolicyClass
    ///
    /// `build` receives the latest stored status and generation.
    pub async fn update_class<F>(&self, name: &str, build: F) -> Result<StatusWrite>
    where
        F: Fn(Option<&PolicyClassStatus>, Option<i64>) -> PolicyClassStatus + Send + Sync,
    {
        let store = self.store;
        let build = &build;
        retry_on_conflict(&self.backoff, || async move {
            let Some(latest) = store.get_policy_class(name).await? else {
                return Ok(StatusWrite::Gone);
            };
            let desired = build(latest.status.as_ref(), latest.metadata.generation);
            if latest.status.as_ref() == Some(&desired) {
                return Ok(StatusWrite::Unchanged);
            }
            let patch = json!({
                "metadata": { "resourceVersion": latest.metadata.resource_version },
                "status": desired,
            });
            store.patch_policy_class_status(name, &patch).await?;
            Ok(StatusWrite::Written)
        })
        .await
    }

    /// Recompute and store the status of the ClusterPolicy
    pub async fn update_cluster_policy<F>(&self, build: F) -> Result<StatusWrite>
    where
        F: Fn(Option<&ClusterPolicyStatus>, Option<i64>) -> ClusterPolicyStatus + Send + Sync,
    {
        let store = self.store;
        let build = &build;
        retry_on_conflict(&self.backoff, || async move {
            let Some(latest) = store.get_cluster_policy().await? else {
                return Ok(StatusWrite::Gone);
            };
            let desired = build(latest.status.as_ref(), latest.metadata.generation);
            if latest.status.as_ref() == Some(&desired) {
                return Ok(StatusWrite::Unchanged);
            }
            let patch = json!({
                "metadata": { "resourceVersion": latest.metadata.resource_version },
                "status": desired,
            });
            store.patch_cluster_policy_status(&patch).await?;
            Ok(StatusWrite::Written)
        })
        .await
    }
}

/// Log a status write failure that should not fail the pass
pub fn tolerate_conflict(result: Result<StatusWrite>, object: &str) -> Result<StatusWrite> {
    match result {
        Err(e) if e.is_conflict() => {
            warn!(object, error = %e, "Giving up on status write after repeated conflicts");
            Ok(StatusWrite::Unchanged)
        }
        other => other,
    }
}

/// Class status computed from the readiness of its unit
pub fn class_status(
    resources: Vec<ResourceStatus>,
    existing: Option<&PolicyClassStatus>,
    generation: Option<i64>,
) -> PolicyClassStatus {
    let existing_conditions = existing.map(|s| s.conditions.clone()).unwrap_or_default();
    let conditions = ConditionBuilder::from_existing(existing_conditions, generation)
        .resources_ready(&resources)
        .build();
    PolicyClassStatus {
        resources,
        conditions,
    }
}

/// ClusterPolicy status computed from the readiness of the shared objects
pub fn cluster_policy_status(
    resources: Vec<ResourceStatus>,
    existing: Option<&ClusterPolicyStatus>,
    generation: Option<i64>,
) -> ClusterPolicyStatus {
    let existing_conditions = existing.map(|s| s.conditions.clone()).unwrap_or_default();
    let conditions = ConditionBuilder::from_existing(existing_conditions, generation)
        .resources_ready(&resources)
        .build();
    ClusterPolicyStatus {
        resources,
        conditions,
    }
}
