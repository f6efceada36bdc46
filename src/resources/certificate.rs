//! cert-manager Issuer and Certificate resource generation
//!
//! Every webhook serves TLS from a secret that cert-manager fills in from a
//! Certificate signed by the operator's self-signed Issuer.
//!
//! Reference: https://cert-manager.io/docs/concepts/certificate/

use json_patch::PatchOperation;
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::controller::error::Result;
use crate::crd::ManagedKind;
use crate::resources::common::{ISSUER_NAME, standard_labels};
use crate::resources::drift::{DerivedResource, sync_owner_references, sync_path};

const CERT_MANAGER_API_VERSION: &str = "cert-manager.io/v1";

/// cert-manager Certificate resource
///
/// A reduced representation of cert-manager's Certificate CRD covering the
/// fields the operator sets.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: CertificateSpec,
}

/// Certificate spec for cert-manager
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    /// Name of the Secret to store the certificate
    pub secret_name: String,

    /// Reference to the issuer
    pub issuer_ref: CertIssuerRef,

    /// DNS names to include in the certificate
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,

    /// Certificate validity duration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// Time before expiry to renew
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renew_before: Option<String>,
}

/// Reference to a cert-manager issuer
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertIssuerRef {
    pub name: String,
    pub kind: String,
    pub group: String,
}

/// cert-manager Issuer resource
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Issuer {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: IssuerSpec,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_signed: Option<SelfSignedIssuer>,
}

/// Marker for a self-signed issuer; serializes as `{}`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SelfSignedIssuer {}

/// Parameters of one webhook serving certificate
#[derive(Clone, Debug)]
pub struct CertificateParams<'a> {
    pub name: &'a str,
    pub secret_name: &'a str,
    pub service: &'a str,
    pub namespace: &'a str,
    pub duration: &'a str,
    pub renew_before: &'a str,
    pub owner: Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference>,
}

/// Generate a webhook serving Certificate signed by the operator issuer
pub fn generate_certificate(params: CertificateParams<'_>) -> Certificate {
    let mut labels = standard_labels(params.name);
    labels.insert("app.kubernetes.io/component".to_string(), "webhook-tls".to_string());

    Certificate {
        api_version: CERT_MANAGER_API_VERSION.to_string(),
        kind: "Certificate".to_string(),
        metadata: ObjectMeta {
            name: Some(params.name.to_string()),
            namespace: Some(params.namespace.to_string()),
            labels: Some(labels),
            owner_references: params.owner.map(|o| vec![o]),
            ..Default::default()
        },
        spec: CertificateSpec {
            secret_name: params.secret_name.to_string(),
            issuer_ref: CertIssuerRef {
                name: ISSUER_NAME.to_string(),
                kind: "Issuer".to_string(),
                group: "cert-manager.io".to_string(),
            },
            dns_names: crate::resources::common::service_dns_names(params.service, params.namespace),
            duration: Some(params.duration.to_string()),
            renew_before: Some(params.renew_before.to_string()),
        },
    }
}

/// Generate the self-signed Issuer shared by all webhook certificates
pub fn generate_issuer(namespace: &str) -> Issuer {
    Issuer {
        api_version: CERT_MANAGER_API_VERSION.to_string(),
        kind: "Issuer".to_string(),
        metadata: ObjectMeta {
            name: Some(ISSUER_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(standard_labels(ISSUER_NAME)),
            ..Default::default()
        },
        spec: IssuerSpec {
            self_signed: Some(SelfSignedIssuer {}),
        },
    }
}

impl DerivedResource for Certificate {
    const KIND: ManagedKind = ManagedKind::Certificate;

    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn drift(&self, live: &Value) -> Result<Vec<PatchOperation>> {
        let desired = serde_json::to_value(self)?;
        let mut ops = Vec::new();
        sync_path(&mut ops, &desired, live, &["spec"]);
        sync_owner_references(&mut ops, &desired, live);
        Ok(ops)
    }
}

impl DerivedResource for Issuer {
    const KIND: ManagedKind = ManagedKind::Issuer;

    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn drift(&self, live: &Value) -> Result<Vec<PatchOperation>> {
        let desired = serde_json::to_value(self)?;
        let mut ops = Vec::new();
        sync_path(&mut ops, &desired, live, &["spec"]);
        Ok(ops)
    }
}
