//! Service generation for webhook endpoints
//!
//! Each webhook Deployment is fronted by a ClusterIP Service that the API
//! server calls on port 443.

use json_patch::{AddOperation, PatchOperation};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;
use serde::Serialize;
use serde_json::{Value, json};

use crate::controller::error::Result;
use crate::crd::ManagedKind;
use crate::resources::common::{WEBHOOK_PORT, app_selector, standard_labels};
use crate::resources::drift::{DerivedResource, lookup, pointer, sync_owner_references, sync_path};

/// Derived webhook Service
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WebhookService(pub Service);

/// Generate the Service routing port 443 to the webhook pods of `app`
pub fn generate_webhook_service(
    name: &str,
    namespace: &str,
    app: &str,
    port_name: Option<&str>,
    owner: Option<OwnerReference>,
) -> WebhookService {
    WebhookService(Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(standard_labels(app)),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(app_selector(app)),
            ports: Some(vec![ServicePort {
                name: port_name.map(str::to_string),
                port: 443,
                target_port: Some(IntOrString::Int(WEBHOOK_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    })
}

/// Ports reduced to the fields the operator sets, with API defaults applied
fn normalized_ports(ports: Option<&Value>) -> Vec<Value> {
    ports
        .and_then(Value::as_array)
        .map(|ports| {
            ports
                .iter()
                .map(|p| {
                    let port = p.get("port").cloned().unwrap_or(Value::Null);
                    json!({
                        "name": p.get("name").cloned().unwrap_or(Value::Null),
                        "port": port.clone(),
                        "targetPort": p.get("targetPort").cloned().unwrap_or(port),
                        "protocol": p.get("protocol").cloned().unwrap_or(json!("TCP")),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

impl DerivedResource for WebhookService {
    const KIND: ManagedKind = ManagedKind::Service;

    fn name(&self) -> &str {
        self.0.metadata.name.as_deref().unwrap_or_default()
    }

    fn drift(&self, live: &Value) -> Result<Vec<PatchOperation>> {
        let desired = serde_json::to_value(&self.0)?;
        let mut ops = Vec::new();

        sync_path(&mut ops, &desired, live, &["spec", "selector"]);

        let path = ["spec", "ports"];
        let desired_ports = lookup(&desired, &path);
        if normalized_ports(desired_ports) != normalized_ports(lookup(live, &path))
            && let Some(ports) = desired_ports
        {
            ops.push(PatchOperation::Add(AddOperation {
                path: pointer(&path),
                value: ports.clone(),
            }));
        }

        sync_owner_references(&mut ops, &desired, live);
        Ok(ops)
    }
}
