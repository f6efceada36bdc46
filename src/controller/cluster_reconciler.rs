//! Reconciliation logic for the ClusterPolicy singleton
//!
//! The singleton owns the shared infrastructure: the self-signed issuer,
//! the two validating webhook units and the Deployment running the class
//! controller. Cleanup is gated on a finalizer so nothing is left behind
//! when the policy is deleted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::runtime::controller::Action;
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::class_reconciler::remove_class_finalizer;
use crate::controller::context::Context;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::state_machine::{
    ClusterPolicyStateMachine, PolicyEvent, PolicyLifecycle, TransitionContext, TransitionResult,
};
use crate::controller::status::{StatusManager, cluster_policy_status, tolerate_conflict};
use crate::crd::{CLUSTER_POLICY_NAME, ClusterPolicy, ManagedKind};
use crate::resources::common::{
    CLASS_CONTROLLER_DEPLOYMENT, CLASS_VALIDATING_UNIT, ISSUER_NAME, POD_VALIDATING_UNIT,
};
use crate::resources::drift::{converge, remove};
use crate::resources::units::{
    ValidatingUnit, class_controller_deployment, class_validating_unit, issuer, pod_validating_unit,
};

/// Finalizer name for cleanup
pub const FINALIZER: &str = "overcommit.example.com/finalizer";

/// Controller name used in metrics
pub const CLUSTER_CONTROLLER: &str = "clusterpolicy";

/// Delay between passes over a converged policy
pub const CLUSTER_REQUEUE: Duration = Duration::from_secs(10);

const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Main reconciliation function for the ClusterPolicy
#[instrument(skip(policy, ctx), fields(name = %policy.name_any()))]
pub async fn reconcile_cluster_policy(policy: Arc<ClusterPolicy>, ctx: Arc<Context>) -> Result<Action> {
    if !policy.is_singleton() {
        warn!(
            "Ignoring ClusterPolicy, only the one named '{}' is managed",
            CLUSTER_POLICY_NAME
        );
        return Ok(Action::await_change());
    }

    let start = Instant::now();
    let machine = ClusterPolicyStateMachine::new();
    let state = PolicyLifecycle::observe(Some(&policy), FINALIZER);
    debug!(%state, "Reconciling ClusterPolicy");

    let result = match state {
        PolicyLifecycle::Absent => Ok(Action::await_change()),
        PolicyLifecycle::PendingFinalizer => {
            add_finalizer(&policy, &ctx).await?;
            log_transition(&machine.transition(
                &state,
                PolicyEvent::FinalizerAttached,
                &TransitionContext::new(),
            ));
            Ok(Action::requeue(FINALIZER_REQUEUE))
        }
        PolicyLifecycle::Active => apply(&policy, &ctx).await,
        PolicyLifecycle::Terminating => handle_deletion(&policy, &ctx, &machine).await,
    };

    if result.is_ok() {
        ctx.metrics.record_reconcile(
            CLUSTER_CONTROLLER,
            CLUSTER_POLICY_NAME,
            start.elapsed().as_secs_f64(),
        );
    }
    result
}

/// Converge every shared object and aggregate their readiness
async fn apply(policy: &ClusterPolicy, ctx: &Context) -> Result<Action> {
    let store = ctx.store.as_ref();
    let config = ctx.config.as_ref();

    let mut resources = vec![converge(store, &issuer(policy, config)).await?];
    resources.extend(class_validating_unit(policy, config).converge(store).await?);
    resources.extend(pod_validating_unit(policy, config).converge(store).await?);
    resources.push(converge(store, &class_controller_deployment(policy, config)).await?);

    let written = StatusManager::new(store)
        .update_cluster_policy(|existing, generation| {
            cluster_policy_status(resources.clone(), existing, generation)
        })
        .await;
    let written = tolerate_conflict(written, CLUSTER_POLICY_NAME)?;
    debug!(?written, "ClusterPolicy status");

    Ok(Action::requeue(CLUSTER_REQUEUE))
}

/// Every object the singleton owns, in teardown order
pub fn shared_members() -> Vec<(ManagedKind, String)> {
    let mut members = vec![(ManagedKind::Deployment, CLASS_CONTROLLER_DEPLOYMENT.to_string())];
    members.extend(ValidatingUnit::members(&POD_VALIDATING_UNIT));
    members.extend(ValidatingUnit::members(&CLASS_VALIDATING_UNIT));
    members.push((ManagedKind::Issuer, ISSUER_NAME.to_string()));
    members
}

/// Remove the shared objects, then release the finalizer
async fn handle_deletion(
    policy: &ClusterPolicy,
    ctx: &Context,
    machine: &ClusterPolicyStateMachine,
) -> Result<Action> {
    info!("ClusterPolicy is being deleted, removing shared objects and releasing classes");

    let mut remaining = Vec::new();
    let mut last_error = None;
    for (kind, name) in shared_members() {
        if let Err(e) = remove(ctx.store.as_ref(), kind, &name).await {
            warn!(%kind, name, error = %e, "Failed to delete object");
            remaining.push(format!("{kind}/{name}"));
            last_error = Some(e);
        }
    }
    for class in ctx.store.list_policy_classes().await? {
        if let Err(e) = remove_class_finalizer(ctx.store.as_ref(), &class).await {
            let name = class.name_any();
            warn!(name, error = %e, "Failed to release PolicyClass");
            remaining.push(format!("PolicyClass/{name}"));
            last_error = Some(e);
        }
    }

    let result = machine.transition(
        &PolicyLifecycle::Terminating,
        PolicyEvent::CleanupCompleted,
        &TransitionContext::with_remaining(remaining),
    );
    match result {
        TransitionResult::Success { .. } => {
            remove_finalizer(policy, ctx).await?;
            log_transition(&result);
            Ok(Action::await_change())
        }
        TransitionResult::GuardFailed { reason, .. } => {
            Err(last_error.unwrap_or(Error::FinalizerError(reason)))
        }
        TransitionResult::InvalidTransition { current, event } => Err(Error::FinalizerError(
            format!("cannot apply {event} in state {current}"),
        )),
    }
}

fn log_transition(result: &TransitionResult) {
    match result {
        TransitionResult::Success {
            from,
            to,
            event,
            description,
        } => info!(%from, %to, %event, "{}", description),
        other => debug!(?other, "Transition not applied"),
    }
}

/// Check if the finalizer is present
fn has_finalizer(policy: &ClusterPolicy) -> bool {
    policy.finalizers().iter().any(|f| f == FINALIZER)
}

/// Add the finalizer to the singleton
async fn add_finalizer(policy: &ClusterPolicy, ctx: &Context) -> Result<()> {
    let mut finalizers = policy.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    let patch = json!({
        "metadata": { "finalizers": finalizers }
    });
    ctx.store.patch_cluster_policy(&patch).await?;
    info!("Added finalizer to ClusterPolicy");
    Ok(())
}

/// Drop our finalizer, keeping any others
async fn remove_finalizer(policy: &ClusterPolicy, ctx: &Context) -> Result<()> {
    if !has_finalizer(policy) {
        return Ok(());
    }
    let others: Vec<&String> = policy.finalizers().iter().filter(|f| *f != FINALIZER).collect();
    let finalizers = if others.is_empty() {
        Value::Null
    } else {
        json!(others)
    };
    ctx.store
        .patch_cluster_policy(&json!({ "metadata": { "finalizers": finalizers } }))
        .await?;
    info!("Removed finalizer from ClusterPolicy");
    Ok(())
}

/// Error policy for the ClusterPolicy controller with exponential backoff
pub fn cluster_error_policy(policy: Arc<ClusterPolicy>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = policy.name_any();
    ctx.metrics.record_error(CLUSTER_CONTROLLER, &name);

    let delay = BackoffConfig::default().delay_for_error(error, 0);
    if error.is_retryable() {
        warn!(
            "Retryable error for ClusterPolicy {}: {:?}, requeuing in {:?}",
            name, error, delay
        );
    } else {
        error!(
            "Non-retryable error for ClusterPolicy {}: {:?}, requeuing in {:?} for manual intervention",
            name, error, delay
        );
    }
    Action::requeue(delay)
}
