//! Webhook HTTP server handlers
//!
//! Serves the pod mutating endpoint and the pod and PolicyClass validating
//! endpoints. Each process registers only the routes its roles enable.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use axum_server::tls_rustls::RustlsConfig;
use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use thiserror::Error;
use tracing::{error, info, warn};

use super::policies::{ValidationEngine, ValidationResult};
use crate::admission::{AdmissionEngine, MutationOutcome};
use crate::config::Roles;
use crate::crd::PolicyClass;
use crate::resources::common::{CLASS_VALIDATING_PATH, POD_MUTATING_PATH, POD_VALIDATING_PATH};

/// Port the admission server listens on
pub const WEBHOOK_PORT: u16 = 9443;

/// Shared state for webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    pub admission: AdmissionEngine,
    pub validation: ValidationEngine,
}

impl WebhookState {
    pub fn new(admission: AdmissionEngine, validation: ValidationEngine) -> Self {
        Self {
            admission,
            validation,
        }
    }
}

/// Create the webhook router with the routes enabled by `roles`
pub fn create_webhook_router(state: Arc<WebhookState>, roles: &Roles) -> Router {
    let mut router = Router::new();
    if roles.pod_mutating_webhook {
        router = router.route(POD_MUTATING_PATH, post(mutate_pod));
    }
    if roles.pod_validating_webhook {
        router = router.route(POD_VALIDATING_PATH, post(validate_pod));
    }
    if roles.class_validating_webhook {
        router = router.route(CLASS_VALIDATING_PATH, post(validate_policy_class));
    }
    router.with_state(state)
}

fn log_request<T: kube::Resource>(req: &AdmissionRequest<T>) {
    info!(
        uid = %req.uid,
        operation = ?req.operation,
        namespace = ?req.namespace,
        name = ?req.name,
        "Processing admission request"
    );
}

/// Turn a failed policy result into a denial
fn deny(req_uid: &str, response: AdmissionResponse, result: ValidationResult) -> AdmissionResponse {
    let reason = result
        .reason
        .unwrap_or_else(|| "ValidationFailed".to_string());
    let message = result
        .message
        .unwrap_or_else(|| "Validation failed".to_string());
    warn!(uid = %req_uid, reason = %reason, message = %message, "Admission request denied");
    let mut response = response.deny(message);
    response.result.reason = reason;
    response.result.code = 403;
    response
}

/// Mutating pod handler: scales requests according to the resolved PolicyClass
pub async fn mutate_pod(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<Pod>>,
) -> impl IntoResponse {
    let req: AdmissionRequest<Pod> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Invalid admission review");
            return (StatusCode::BAD_REQUEST, Json(AdmissionResponse::invalid(e.to_string()).into_review()));
        }
    };
    log_request(&req);

    let response = AdmissionResponse::from(&req);
    let Some(pod) = req.object.as_ref() else {
        return (StatusCode::OK, Json(response.into_review()));
    };
    if req.operation != Operation::Create {
        return (StatusCode::OK, Json(response.into_review()));
    }

    let namespace = req
        .namespace
        .clone()
        .or_else(|| pod.metadata.namespace.clone())
        .unwrap_or_default();

    let outcome = state.admission.mutate(pod, &namespace).await;
    let MutationOutcome::Patched { operations, .. } = outcome else {
        return (StatusCode::OK, Json(response.into_review()));
    };

    match response.with_patch(json_patch::Patch(operations)) {
        Ok(patched) => (StatusCode::OK, Json(patched.into_review())),
        Err(e) => {
            error!(uid = %req.uid, error = %e, "Failed to serialize patch, admitting pod unchanged");
            (StatusCode::OK, Json(AdmissionResponse::from(&req).into_review()))
        }
    }
}

/// Validating pod handler: requires the ClusterPolicy's selector label
pub async fn validate_pod(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<Pod>>,
) -> impl IntoResponse {
    let req: AdmissionRequest<Pod> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Invalid admission review");
            return (StatusCode::BAD_REQUEST, Json(AdmissionResponse::invalid(e.to_string()).into_review()));
        }
    };
    log_request(&req);

    let response = AdmissionResponse::from(&req);
    let pod = match (&req.operation, req.object.as_ref()) {
        (Operation::Create | Operation::Update, Some(pod)) => pod,
        _ => return (StatusCode::OK, Json(response.into_review())),
    };

    let result = state.validation.validate_pod(pod).await;
    if !result.allowed {
        return (StatusCode::OK, Json(deny(&req.uid, response, result).into_review()));
    }
    info!(uid = %req.uid, "Admission request allowed");
    (StatusCode::OK, Json(response.into_review()))
}

/// Validating PolicyClass handler
pub async fn validate_policy_class(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<PolicyClass>>,
) -> impl IntoResponse {
    let req: AdmissionRequest<PolicyClass> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Invalid admission review");
            return (StatusCode::BAD_REQUEST, Json(AdmissionResponse::invalid(e.to_string()).into_review()));
        }
    };
    log_request(&req);

    let response = AdmissionResponse::from(&req);
    let class = match (&req.operation, req.object.as_ref()) {
        (Operation::Create | Operation::Update, Some(class)) => class,
        _ => return (StatusCode::OK, Json(response.into_review())),
    };

    let result = state
        .validation
        .validate_class(class, req.old_object.as_ref())
        .await;
    if !result.allowed {
        return (StatusCode::OK, Json(deny(&req.uid, response, result).into_review()));
    }
    info!(uid = %req.uid, "Admission request allowed");
    (StatusCode::OK, Json(response.into_review()))
}

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0:9443 and serves the routes enabled by `roles`.
pub async fn run_webhook_server(
    state: Arc<WebhookState>,
    roles: &Roles,
    cert_path: &Path,
    key_path: &Path,
) -> Result<(), WebhookError> {
    let app = create_webhook_router(state, roles);

    let config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!("Webhook server listening on {} with TLS", addr);

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}

/// Errors that can occur when running the webhook server
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Webhook server error: {0}")]
    Server(String),
}
