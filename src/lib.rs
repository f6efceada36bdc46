pub mod admission;
pub mod config;
pub mod controller;
pub mod crd;
pub mod events;
pub mod health;
pub mod leader;
pub mod resources;
pub mod webhooks;

#[cfg(test)]
pub mod testing;

pub use admission::{AdmissionEngine, MutationOutcome, ResolutionError};
pub use config::{OperatorConfig, Roles};
pub use controller::{
    BackoffConfig, Context, Error, FINALIZER, Result, class_error_policy, cluster_error_policy,
    reconcile_class, reconcile_cluster_policy,
};
pub use crd::{ClusterPolicy, PolicyClass};
pub use health::{HealthState, Metrics};
pub use webhooks::{
    ValidationEngine, WEBHOOK_PORT, WebhookError, WebhookState, run_webhook_server,
};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};

/// Log one controller result, treating reconciles of deleted objects as noise
fn log_result<K, E>(
    kind: &str,
    result: std::result::Result<(ObjectRef<K>, Action), kube::runtime::controller::Error<Error, E>>,
    health_state: Option<&HealthState>,
) where
    K: kube::Resource,
    E: std::error::Error,
{
    match result {
        Ok((obj, _action)) => {
            tracing::debug!("Reconciled {}: {}", kind, obj.name);
            if let Some(state) = health_state {
                state.touch_reconcile();
            }
        }
        Err(e) => {
            let is_not_found = matches!(
                &e,
                kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
            );
            if is_not_found {
                tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
            } else {
                tracing::error!("{} reconciliation error: {:?}", kind, e);
            }
        }
    }
}

/// Run the ClusterPolicy controller.
///
/// Watches the singleton ClusterPolicy and the shared objects it owns:
/// the class-controller Deployment and both validating webhook units.
pub async fn run_cluster_controller(
    client: Client,
    ctx: Arc<Context>,
    health_state: Option<Arc<HealthState>>,
) {
    tracing::info!("Starting controller for ClusterPolicy resources");
    let namespace = ctx.config.namespace.clone();

    let policies: Api<ClusterPolicy> = Api::all(client.clone());
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), &namespace);
    let validating: Api<ValidatingWebhookConfiguration> = Api::all(client);

    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(policies, watcher_config.clone())
        .owns(deployments, watcher_config.clone())
        .owns(services, watcher_config.clone())
        .owns(validating, watcher_config)
        .run(reconcile_cluster_policy, cluster_error_policy, ctx)
        .for_each(|result| {
            let health_state = health_state.clone();
            async move { log_result("ClusterPolicy", result, health_state.as_deref()) }
        })
        .await;

    tracing::error!("ClusterPolicy controller stream ended unexpectedly");
}

/// Run the PolicyClass controller.
///
/// Watches every PolicyClass and the per-class webhook objects it owns.
pub async fn run_class_controller(
    client: Client,
    ctx: Arc<Context>,
    health_state: Option<Arc<HealthState>>,
) {
    tracing::info!("Starting controller for PolicyClass resources");
    let namespace = ctx.config.namespace.clone();

    let classes: Api<PolicyClass> = Api::all(client.clone());
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), &namespace);
    let mutating: Api<MutatingWebhookConfiguration> = Api::all(client);

    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(classes, watcher_config.clone())
        .owns(deployments, watcher_config.clone())
        .owns(services, watcher_config.clone())
        .owns(mutating, watcher_config)
        .run(reconcile_class, class_error_policy, ctx)
        .for_each(|result| {
            let health_state = health_state.clone();
            async move { log_result("PolicyClass", result, health_state.as_deref()) }
        })
        .await;

    tracing::error!("PolicyClass controller stream ended unexpectedly");
}
