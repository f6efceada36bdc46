//! PolicyClass resolution for a pod
//!
//! First match wins: the pod's own class label, then the label on its
//! namespace, then the default class. A label naming a class that does not
//! exist falls through to the next step.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::controller::error::Error;
use crate::controller::store::OvercommitStore;
use crate::crd::PolicyClass;

/// Where the effective class came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionSource {
    PodLabel,
    NamespaceLabel,
    Default,
}

impl std::fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionSource::PodLabel => write!(f, "pod label"),
            ResolutionSource::NamespaceLabel => write!(f, "namespace label"),
            ResolutionSource::Default => write!(f, "default class"),
        }
    }
}

/// The class that applies to a pod
#[derive(Clone, Debug)]
pub struct Resolution {
    pub class: PolicyClass,
    pub source: ResolutionSource,
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("no PolicyClass matched and no default class exists")]
    NoDefaultClass,

    #[error("ClusterPolicy not found")]
    NoClusterPolicy,

    #[error("store error: {0}")]
    Store(#[from] Error),
}

async fn lookup_label(
    store: &dyn OvercommitStore,
    labels: Option<&BTreeMap<String, String>>,
    selector_label: &str,
) -> Result<Option<PolicyClass>, ResolutionError> {
    let Some(name) = labels.and_then(|l| l.get(selector_label)) else {
        return Ok(None);
    };
    let class = store.get_policy_class(name).await?;
    if class.is_none() {
        debug!(class = %name, "Labelled PolicyClass does not exist, falling through");
    }
    Ok(class)
}

/// Resolve the effective class for a pod in `namespace`
pub async fn resolve_class(
    store: &dyn OvercommitStore,
    selector_label: &str,
    pod_labels: Option<&BTreeMap<String, String>>,
    namespace: &str,
) -> Result<Resolution, ResolutionError> {
    if let Some(class) = lookup_label(store, pod_labels, selector_label).await? {
        return Ok(Resolution {
            class,
            source: ResolutionSource::PodLabel,
        });
    }

    let namespace_labels = store.namespace_labels(namespace).await?;
    if let Some(class) = lookup_label(store, namespace_labels.as_ref(), selector_label).await? {
        return Ok(Resolution {
            class,
            source: ResolutionSource::NamespaceLabel,
        });
    }

    store
        .list_policy_classes()
        .await?
        .into_iter()
        .find(|c| c.spec.is_default)
        .map(|class| Resolution {
            class,
            source: ResolutionSource::Default,
        })
        .ok_or(ResolutionError::NoDefaultClass)
}
