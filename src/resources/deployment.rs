//! Deployment generation for the operator's own workloads
//!
//! Every derived workload runs the operator image with a different role
//! selected through environment variables.

use std::collections::BTreeMap;

use json_patch::{AddOperation, PatchOperation};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, ObjectFieldSelector,
    PodSpec, PodTemplateSpec, Probe, ResourceRequirements, SecretVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;
use serde_json::Value;

use crate::config::OperatorConfig;
use crate::controller::error::Result;
use crate::crd::ManagedKind;
use crate::resources::common::{
    METRICS_PORT, WEBHOOK_CERT_DIR, WEBHOOK_PORT, app_selector, standard_labels, template_labels,
};
use crate::resources::drift::{DerivedResource, lookup, pointer, sync_owner_references, sync_path};

/// Name of the container in every webhook workload
pub const WEBHOOK_CONTAINER: &str = "overcommit-webhook";

const CERT_VOLUME: &str = "webhook-certs";

/// Inputs for one derived workload
#[derive(Clone, Debug)]
pub struct WorkloadParams<'a> {
    /// Deployment name, also used as the `app` label
    pub name: &'a str,
    pub container: &'a str,
    pub config: &'a OperatorConfig,
    /// Role flags and other per-workload variables
    pub role_env: Vec<(&'static str, String)>,
    pub labels: &'a BTreeMap<String, String>,
    pub annotations: &'a BTreeMap<String, String>,
    /// Secret holding the serving certificate; None for non-webhook roles
    pub tls_secret: Option<&'a str>,
    pub owner: Option<OwnerReference>,
}

/// Derived Deployment together with the fields it owns
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkloadDeployment(pub Deployment);

fn env_value(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn env_field(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                // API server defaults apiVersion; set it so drift stays quiet
                api_version: Some("v1".to_string()),
                field_path: field_path.to_string(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn http_probe(path: &str) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(METRICS_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(10),
        ..Default::default()
    }
}

/// Generate a Deployment running one role of the operator image
pub fn generate_deployment(params: WorkloadParams<'_>) -> WorkloadDeployment {
    let config = params.config;

    let mut env = vec![
        env_value("APP_VERSION", config.app_version.clone()),
        env_value("IMAGE_REGISTRY", config.image_registry.clone()),
        env_value("IMAGE_REPOSITORY", config.image_repository.clone()),
        env_value("SERVICE_ACCOUNT_NAME", config.service_account.clone()),
        env_field("POD_NAMESPACE", "metadata.namespace"),
        env_field("POD_NAME", "metadata.name"),
    ];
    if params.tls_secret.is_some() {
        env.push(env_value("WEBHOOK_CERT_DIR", WEBHOOK_CERT_DIR));
    }
    env.extend(params.role_env.iter().map(|(k, v)| env_value(k, v.clone())));

    let mut ports = vec![ContainerPort {
        name: Some("metrics".to_string()),
        container_port: METRICS_PORT,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];

    let mut volumes = Vec::new();
    let mut volume_mounts = Vec::new();

    if let Some(secret) = params.tls_secret {
        ports.insert(
            0,
            ContainerPort {
                name: Some("webhook".to_string()),
                container_port: WEBHOOK_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        );
        volumes.push(Volume {
            name: CERT_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        volume_mounts.push(VolumeMount {
            name: CERT_VOLUME.to_string(),
            mount_path: WEBHOOK_CERT_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    let container = Container {
        name: params.container.to_string(),
        image: Some(config.image()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: Some(env),
        ports: Some(ports),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("memory".to_string(), Quantity("64Mi".to_string())),
                ("cpu".to_string(), Quantity("250m".to_string())),
            ])),
            limits: Some(BTreeMap::from([
                ("memory".to_string(), Quantity("4Gi".to_string())),
                ("cpu".to_string(), Quantity("2".to_string())),
            ])),
            ..Default::default()
        }),
        volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
        liveness_probe: Some(http_probe("/healthz")),
        readiness_probe: Some(http_probe("/readyz")),
        ..Default::default()
    };

    let annotations = (!params.annotations.is_empty()).then(|| params.annotations.clone());

    WorkloadDeployment(Deployment {
        metadata: ObjectMeta {
            name: Some(params.name.to_string()),
            namespace: Some(config.namespace.clone()),
            labels: Some(standard_labels(params.name)),
            owner_references: params.owner.map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(app_selector(params.name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(template_labels(params.name, params.labels)),
                    annotations,
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(config.service_account.clone()),
                    containers: vec![container],
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}

/// Environment as a name to value map; `valueFrom` entries compare by source
fn env_map(env: Option<&Value>) -> BTreeMap<String, Value> {
    env.and_then(Value::as_array)
        .map(|vars| {
            vars.iter()
                .filter_map(|var| {
                    let name = var.get("name")?.as_str()?.to_string();
                    let value = match var.get("valueFrom") {
                        Some(from) => from.clone(),
                        None => var.get("value").cloned().unwrap_or(Value::String(String::new())),
                    };
                    Some((name, value))
                })
                .collect()
        })
        .unwrap_or_default()
}

impl DerivedResource for WorkloadDeployment {
    const KIND: ManagedKind = ManagedKind::Deployment;

    fn name(&self) -> &str {
        self.0.metadata.name.as_deref().unwrap_or_default()
    }

    fn drift(&self, live: &Value) -> Result<Vec<PatchOperation>> {
        let desired = serde_json::to_value(&self.0)?;
        let mut ops = Vec::new();

        let image_path = ["spec", "template", "spec", "containers", "0", "image"];
        sync_path(&mut ops, &desired, live, &image_path);

        let env_path = ["spec", "template", "spec", "containers", "0", "env"];
        let desired_env = lookup(&desired, &env_path);
        if env_map(desired_env) != env_map(lookup(live, &env_path))
            && let Some(env) = desired_env
        {
            ops.push(PatchOperation::Add(AddOperation {
                path: pointer(&env_path),
                value: env.clone(),
            }));
        }

        sync_path(&mut ops, &desired, live, &["spec", "template", "metadata", "labels"]);
        sync_path(&mut ops, &desired, live, &["spec", "template", "metadata", "annotations"]);
        sync_owner_references(&mut ops, &desired, live);

        Ok(ops)
    }
}
