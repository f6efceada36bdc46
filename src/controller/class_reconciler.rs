//! Reconciliation logic for PolicyClass resources
//!
//! Every class gets its own mutating webhook unit. The unit is derived only
//! from the class and the ClusterPolicy, so repeated passes converge on the
//! same objects and a converged pass writes nothing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::runtime::controller::Action;
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::status::{StatusManager, class_status, tolerate_conflict};
use crate::controller::store::OvercommitStore;
use crate::crd::{ClusterPolicy, PolicyClass};
use crate::resources::common::{has_owner_reference, merge_owner_reference};
use crate::resources::drift::remove;
use crate::resources::units::{ClassUnit, class_unit};

/// Controller name used in metrics
pub const CLASS_CONTROLLER: &str = "policyclass";

/// Delay between passes over a converged class
pub const CLASS_REQUEUE: Duration = Duration::from_secs(10);

/// Finalizer holding a PolicyClass until its webhook unit is removed
pub const CLASS_FINALIZER: &str = "overcommit.example.com/class-finalizer";

/// Delay after an ownership fix before the unit is derived
const OWNERSHIP_REQUEUE: Duration = Duration::from_secs(1);

/// Main reconciliation function for a PolicyClass
#[instrument(skip(class, ctx), fields(name = %class.name_any()))]
pub async fn reconcile_class(class: Arc<PolicyClass>, ctx: Arc<Context>) -> Result<Action> {
    let name = class.name_any();
    let start = Instant::now();

    let result = reconcile_class_inner(&name, &ctx).await;
    if result.is_ok() {
        ctx.metrics
            .record_reconcile(CLASS_CONTROLLER, &name, start.elapsed().as_secs_f64());
    }
    result
}

async fn reconcile_class_inner(name: &str, ctx: &Context) -> Result<Action> {
    let store = ctx.store.as_ref();

    // The watch cache may lag behind deletions
    let Some(class) = store.get_policy_class(name).await? else {
        teardown(name, ctx).await?;
        return Ok(Action::await_change());
    };
    if class.metadata.deletion_timestamp.is_some() {
        teardown(name, ctx).await?;
        remove_class_finalizer(store, &class).await?;
        return Ok(Action::await_change());
    }

    let Some(policy) = store.get_cluster_policy().await? else {
        warn!("ClusterPolicy not found, class webhook cannot be derived yet");
        return Ok(Action::requeue(CLASS_REQUEUE));
    };
    if policy.metadata.deletion_timestamp.is_some() {
        debug!("ClusterPolicy is being deleted, leaving class to garbage collection");
        return Ok(Action::await_change());
    }

    if ensure_owner_reference(&class, &policy, ctx).await? {
        return Ok(Action::requeue(OWNERSHIP_REQUEUE));
    }
    add_class_finalizer(&class, ctx).await?;

    let unit = class_unit(&class, &policy, &ctx.config);
    let resources = unit.converge(store).await?;

    let written = StatusManager::new(store)
        .update_class(name, |existing, generation| {
            class_status(resources.clone(), existing, generation)
        })
        .await;
    let written = tolerate_conflict(written, name)?;
    debug!(?written, "PolicyClass status");

    publish_class_metrics(ctx).await?;

    Ok(Action::requeue(CLASS_REQUEUE))
}

fn has_class_finalizer(class: &PolicyClass) -> bool {
    class.finalizers().iter().any(|f| f == CLASS_FINALIZER)
}

/// Gate deletion of the class on removal of its webhook unit
async fn add_class_finalizer(class: &PolicyClass, ctx: &Context) -> Result<()> {
    if has_class_finalizer(class) {
        return Ok(());
    }
    let mut finalizers = class.finalizers().to_vec();
    finalizers.push(CLASS_FINALIZER.to_string());
    let patch = json!({
        "metadata": { "finalizers": finalizers }
    });
    ctx.store.patch_policy_class(&class.name_any(), &patch).await?;
    info!("Added finalizer to PolicyClass");
    Ok(())
}

/// Drop the class finalizer, keeping any others
pub async fn remove_class_finalizer(store: &dyn OvercommitStore, class: &PolicyClass) -> Result<()> {
    if !has_class_finalizer(class) {
        return Ok(());
    }
    let others: Vec<&String> = class
        .finalizers()
        .iter()
        .filter(|f| *f != CLASS_FINALIZER)
        .collect();
    let finalizers = if others.is_empty() {
        Value::Null
    } else {
        json!(others)
    };
    store
        .patch_policy_class(
            &class.name_any(),
            &json!({ "metadata": { "finalizers": finalizers } }),
        )
        .await?;
    info!(name = %class.name_any(), "Removed finalizer from PolicyClass");
    Ok(())
}

/// Point the class at the singleton as its controller owner
///
/// Returns true when the owner references were rewritten.
async fn ensure_owner_reference(
    class: &PolicyClass,
    policy: &ClusterPolicy,
    ctx: &Context,
) -> Result<bool> {
    let refs = class.owner_references();
    if has_owner_reference(refs, policy) {
        return Ok(false);
    }

    let patch = json!({
        "metadata": { "ownerReferences": merge_owner_reference(refs, policy) }
    });
    match ctx.store.patch_policy_class(&class.name_any(), &patch).await {
        Ok(()) => {
            info!("Set ClusterPolicy as controller owner");
            Ok(true)
        }
        Err(e) if e.is_conflict() => {
            warn!(error = %e, "Conflict setting owner reference, retrying next pass");
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

/// Delete the unit of a class that no longer exists
async fn teardown(name: &str, ctx: &Context) -> Result<()> {
    info!("PolicyClass is gone, removing its webhook unit");
    for (kind, object) in ClassUnit::members(name) {
        remove(ctx.store.as_ref(), kind, &object).await?;
    }
    publish_class_metrics(ctx).await
}

/// Terminating classes are already gone from the gauges
async fn publish_class_metrics(ctx: &Context) -> Result<()> {
    let classes: Vec<PolicyClass> = ctx
        .store
        .list_policy_classes()
        .await?
        .into_iter()
        .filter(|c| c.metadata.deletion_timestamp.is_none())
        .collect();
    ctx.metrics.publish_classes(&classes);
    Ok(())
}

/// Error policy for the class controller with exponential backoff
pub fn class_error_policy(class: Arc<PolicyClass>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = class.name_any();
    ctx.metrics.record_error(CLASS_CONTROLLER, &name);

    let delay = BackoffConfig::default().delay_for_error(error, 0);
    if error.is_retryable() {
        warn!(
            "Retryable error for PolicyClass {}: {:?}, requeuing in {:?}",
            name, error, delay
        );
    } else {
        error!(
            "Non-retryable error for PolicyClass {}: {:?}, requeuing in {:?}",
            name, error, delay
        );
    }
    Action::requeue(delay)
}
