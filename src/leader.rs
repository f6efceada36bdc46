//! Leader election over a coordination.k8s.io/v1 Lease
//!
//! Every write carries the resourceVersion that was read, so two replicas
//! racing for an expired lease cannot both win: the loser gets a 409.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::Client;
use kube::api::{Api, PostParams};
use thiserror::Error;
use tracing::{debug, info};

/// Lease errors
#[derive(Debug, Error)]
pub enum LeaderElectionError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("lease {0} has no resourceVersion")]
    MissingResourceVersion(String),
}

/// What a replica should do with the lease it just read
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaseDecision {
    /// No lease exists yet
    Create,
    /// We already hold it
    Renew,
    /// Another holder let it expire
    TakeOver { transitions: i32 },
    /// Another holder is still live
    Held { holder: String },
}

/// Decide how to treat the current lease
///
/// A lease without a renew time or duration counts as expired.
pub fn decide(lease: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let Some(lease) = lease else {
        return LeaseDecision::Create;
    };
    let spec = lease.spec.as_ref();
    let holder = spec.and_then(|s| s.holder_identity.as_deref());
    if holder == Some(identity) {
        return LeaseDecision::Renew;
    }

    let renew_time = spec.and_then(|s| s.renew_time.as_ref());
    let duration = spec.and_then(|s| s.lease_duration_seconds);
    let expired = match (renew_time, duration) {
        (Some(renewed), Some(secs)) => now > renewed.0 + chrono::Duration::seconds(i64::from(secs)),
        _ => true,
    };

    match holder {
        Some(holder) if !expired && !holder.is_empty() => LeaseDecision::Held {
            holder: holder.to_string(),
        },
        _ => LeaseDecision::TakeOver {
            transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0),
        },
    }
}

/// A named Lease contended for by every operator replica
pub struct LeaseLock {
    api: Api<Lease>,
    lease_name: String,
    namespace: String,
    identity: String,
    ttl: Duration,
}

impl LeaseLock {
    pub fn new(client: Client, namespace: &str, lease_name: &str, identity: &str, ttl: Duration) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            ttl,
        }
    }

    /// Acquire or renew the lease; `Ok(false)` means someone else holds it
    pub async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let now = Utc::now();
        let existing = match self.api.get(&self.lease_name).await {
            Ok(lease) => Some(lease),
            Err(kube::Error::Api(e)) if e.code == 404 => None,
            Err(e) => return Err(e.into()),
        };

        match decide(existing.as_ref(), &self.identity, now) {
            LeaseDecision::Create => {
                let lease = self.desired(None, now, 0);
                self.write(self.api.create(&PostParams::default(), &lease).await, "Created lease")
            }
            LeaseDecision::Renew => {
                let mut lease = existing.unwrap_or_default();
                self.require_version(&lease)?;
                if let Some(spec) = lease.spec.as_mut() {
                    spec.renew_time = Some(MicroTime(now));
                }
                self.replace(&lease, "Renewed lease").await
            }
            LeaseDecision::TakeOver { transitions } => {
                let current = existing.unwrap_or_default();
                let version = self.require_version(&current)?;
                let lease = self.desired(Some(version), now, transitions + 1);
                self.replace(&lease, "Took over expired lease").await
            }
            LeaseDecision::Held { holder } => {
                debug!(%holder, "Lease held by another replica");
                Ok(false)
            }
        }
    }

    fn require_version(&self, lease: &Lease) -> Result<String, LeaderElectionError> {
        lease
            .metadata
            .resource_version
            .clone()
            .ok_or_else(|| LeaderElectionError::MissingResourceVersion(self.lease_name.clone()))
    }

    fn desired(&self, resource_version: Option<String>, now: DateTime<Utc>, transitions: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version,
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(i32::try_from(self.ttl.as_secs()).unwrap_or(i32::MAX)),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    async fn replace(&self, lease: &Lease, message: &str) -> Result<bool, LeaderElectionError> {
        let result = self
            .api
            .replace(&self.lease_name, &PostParams::default(), lease)
            .await;
        self.write(result, message)
    }

    /// A conflicting write means another replica got there first
    fn write(&self, result: kube::Result<Lease>, message: &str) -> Result<bool, LeaderElectionError> {
        match result {
            Ok(_) => {
                debug!(identity = %self.identity, lease = %self.lease_name, "{}", message);
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                info!(identity = %self.identity, "Lost lease race, will retry");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn lease(holder: Option<&str>, renewed_secs_ago: Option<i64>, transitions: i32) -> Lease {
        let now = Utc::now();
        Lease {
            metadata: ObjectMeta {
                name: Some("overcommit-operator-leader".to_string()),
                resource_version: Some("7".to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: holder.map(str::to_string),
                lease_duration_seconds: Some(15),
                renew_time: renewed_secs_ago.map(|s| MicroTime(now - chrono::Duration::seconds(s))),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_missing_lease_is_created() {
        assert_eq!(decide(None, "operator-0", Utc::now()), LeaseDecision::Create);
    }

    #[test]
    fn test_own_lease_is_renewed_even_when_stale() {
        let current = lease(Some("operator-0"), Some(60), 2);
        assert_eq!(decide(Some(&current), "operator-0", Utc::now()), LeaseDecision::Renew);
    }

    #[test]
    fn test_live_foreign_lease_is_respected() {
        let current = lease(Some("operator-1"), Some(3), 2);
        assert_eq!(
            decide(Some(&current), "operator-0", Utc::now()),
            LeaseDecision::Held {
                holder: "operator-1".to_string()
            }
        );
    }

    #[test]
    fn test_expired_lease_is_taken_over() {
        let current = lease(Some("operator-1"), Some(30), 2);
        assert_eq!(
            decide(Some(&current), "operator-0", Utc::now()),
            LeaseDecision::TakeOver { transitions: 2 }
        );
    }

    #[test]
    fn test_released_or_incomplete_lease_is_taken_over() {
        let released = lease(None, Some(1), 4);
        assert_eq!(
            decide(Some(&released), "operator-0", Utc::now()),
            LeaseDecision::TakeOver { transitions: 4 }
        );

        let never_renewed = lease(Some("operator-1"), None, 0);
        assert_eq!(
            decide(Some(&never_renewed), "operator-0", Utc::now()),
            LeaseDecision::TakeOver { transitions: 0 }
        );
    }
}
