//! Complete sets of derived objects
//!
//! A unit is everything one webhook endpoint needs: the serving
//! certificate, the workload, the Service in front of it and the
//! registration telling the API server to call it.

use kube::ResourceExt;

use crate::config::OperatorConfig;
use crate::controller::error::Result;
use crate::controller::store::OvercommitStore;
use crate::crd::{ClusterPolicy, ManagedKind, PolicyClass, ResourceStatus};
use crate::resources::certificate::{Certificate, CertificateParams, Issuer, generate_certificate, generate_issuer};
use crate::resources::common::{
    CLASS_CONTROLLER_DEPLOYMENT, CLASS_VALIDATING_PATH, CLASS_VALIDATING_UNIT, ClassUnitNames,
    POD_MUTATING_PATH, POD_VALIDATING_PATH, POD_VALIDATING_UNIT, ValidatingUnitNames,
    class_owner_reference, owner_reference,
};
use crate::resources::drift;
use crate::resources::deployment::{WEBHOOK_CONTAINER, WorkloadDeployment, WorkloadParams, generate_deployment};
use crate::resources::service::{WebhookService, generate_webhook_service};
use crate::resources::webhook_config::{
    ClassWebhookParams, PodMutatingWebhook, ValidatingRegistration, WebhookTarget,
    generate_class_validating_webhook, generate_class_webhook, generate_pod_validating_webhook,
};

/// Validity of class webhook certificates
pub const CLASS_CERT_DURATION: &str = "87600h";
/// Validity of the shared validating webhook certificates
pub const VALIDATING_CERT_DURATION: &str = "8760h";
pub const CERT_RENEW_BEFORE: &str = "720h";

/// Webhook unit generated for one PolicyClass
#[derive(Clone, Debug)]
pub struct ClassUnit {
    pub certificate: Certificate,
    pub deployment: WorkloadDeployment,
    pub service: WebhookService,
    pub webhook: PodMutatingWebhook,
}

impl ClassUnit {
    /// Objects of a class unit in teardown order; derived only from the class name
    pub fn members(class: &str) -> [(ManagedKind, String); 4] {
        let names = ClassUnitNames::new(class);
        [
            (ManagedKind::Certificate, names.certificate),
            (ManagedKind::Deployment, names.deployment),
            (ManagedKind::Service, names.service),
            (ManagedKind::MutatingWebhookConfiguration, names.webhook_configuration),
        ]
    }

    /// Converge every object in certificate, workload, endpoint, registration order
    pub async fn converge(&self, store: &dyn OvercommitStore) -> Result<Vec<ResourceStatus>> {
        Ok(vec![
            drift::converge(store, &self.certificate).await?,
            drift::converge(store, &self.deployment).await?,
            drift::converge(store, &self.service).await?,
            drift::converge(store, &self.webhook).await?,
        ])
    }
}

/// Generate the webhook unit serving `class`
pub fn class_unit(class: &PolicyClass, policy: &ClusterPolicy, config: &OperatorConfig) -> ClassUnit {
    let class_name = class.name_any();
    let names = ClassUnitNames::new(&class_name);
    let namespace = config.namespace.as_str();
    let owner = class_owner_reference(class);

    let certificate = generate_certificate(CertificateParams {
        name: &names.certificate,
        secret_name: &names.secret,
        service: &names.service,
        namespace,
        duration: CLASS_CERT_DURATION,
        renew_before: CERT_RENEW_BEFORE,
        owner: Some(owner.clone()),
    });

    let deployment = generate_deployment(WorkloadParams {
        name: &names.deployment,
        container: WEBHOOK_CONTAINER,
        config,
        role_env: vec![
            ("ENABLE_CONTROLLER", "false".to_string()),
            ("ENABLE_POD_MUTATING_WEBHOOK", "true".to_string()),
            ("OVERCOMMIT_CLASS_NAME", class_name.clone()),
        ],
        labels: &class.spec.labels,
        annotations: &class.spec.annotations,
        tls_secret: Some(&names.secret),
        owner: Some(owner.clone()),
    });

    let service = generate_webhook_service(
        &names.service,
        namespace,
        &names.deployment,
        None,
        Some(owner.clone()),
    );

    let webhook = generate_class_webhook(ClassWebhookParams {
        name: &names.webhook_configuration,
        webhook: &names.webhook,
        default_webhook: &names.default_webhook,
        class: &class_name,
        selector_label: &policy.spec.selector_label,
        excluded_namespaces: &class.spec.excluded_namespaces,
        is_default: class.spec.is_default,
        target: WebhookTarget {
            service: &names.service,
            namespace,
            path: POD_MUTATING_PATH,
            certificate: &names.certificate,
        },
        owner: Some(owner),
    });

    ClassUnit {
        certificate,
        deployment,
        service,
        webhook,
    }
}

/// One of the shared validating units owned by the ClusterPolicy
#[derive(Clone, Debug)]
pub struct ValidatingUnit {
    pub certificate: Certificate,
    pub deployment: WorkloadDeployment,
    pub service: WebhookService,
    pub webhook: ValidatingRegistration,
}

impl ValidatingUnit {
    /// Objects of a validating unit in teardown order
    pub fn members(names: &ValidatingUnitNames) -> [(ManagedKind, String); 4] {
        [
            (ManagedKind::Certificate, names.certificate.to_string()),
            (ManagedKind::Deployment, names.deployment.to_string()),
            (ManagedKind::Service, names.service.to_string()),
            (
                ManagedKind::ValidatingWebhookConfiguration,
                names.deployment.to_string(),
            ),
        ]
    }

    /// Converge every object in certificate, workload, endpoint, registration order
    pub async fn converge(&self, store: &dyn OvercommitStore) -> Result<Vec<ResourceStatus>> {
        Ok(vec![
            drift::converge(store, &self.certificate).await?,
            drift::converge(store, &self.deployment).await?,
            drift::converge(store, &self.service).await?,
            drift::converge(store, &self.webhook).await?,
        ])
    }
}

fn validating_parts(
    names: &ValidatingUnitNames,
    role_flag: &'static str,
    policy: &ClusterPolicy,
    config: &OperatorConfig,
) -> (Certificate, WorkloadDeployment, WebhookService) {
    let owner = owner_reference(policy);

    let certificate = generate_certificate(CertificateParams {
        name: names.certificate,
        secret_name: names.secret,
        service: names.service,
        namespace: &config.namespace,
        duration: VALIDATING_CERT_DURATION,
        renew_before: CERT_RENEW_BEFORE,
        owner: Some(owner.clone()),
    });

    let deployment = generate_deployment(WorkloadParams {
        name: names.deployment,
        container: WEBHOOK_CONTAINER,
        config,
        role_env: vec![
            ("ENABLE_CONTROLLER", "false".to_string()),
            (role_flag, "true".to_string()),
        ],
        labels: &policy.spec.labels,
        annotations: &policy.spec.annotations,
        tls_secret: Some(names.secret),
        owner: Some(owner.clone()),
    });

    let service = generate_webhook_service(
        names.service,
        &config.namespace,
        names.deployment,
        Some("https"),
        Some(owner),
    );

    (certificate, deployment, service)
}

/// Generate the unit validating PolicyClass writes
pub fn class_validating_unit(policy: &ClusterPolicy, config: &OperatorConfig) -> ValidatingUnit {
    let names = &CLASS_VALIDATING_UNIT;
    let (certificate, deployment, service) =
        validating_parts(names, "ENABLE_CLASS_VALIDATING_WEBHOOK", policy, config);

    let webhook = generate_class_validating_webhook(
        names.deployment,
        names.webhook,
        WebhookTarget {
            service: names.service,
            namespace: &config.namespace,
            path: CLASS_VALIDATING_PATH,
            certificate: names.certificate,
        },
        Some(owner_reference(policy)),
    );

    ValidatingUnit {
        certificate,
        deployment,
        service,
        webhook,
    }
}

/// Generate the unit validating pod writes
pub fn pod_validating_unit(policy: &ClusterPolicy, config: &OperatorConfig) -> ValidatingUnit {
    let names = &POD_VALIDATING_UNIT;
    let (certificate, deployment, service) =
        validating_parts(names, "ENABLE_POD_VALIDATING_WEBHOOK", policy, config);

    let webhook = generate_pod_validating_webhook(
        names.deployment,
        names.webhook,
        &policy.spec.selector_label,
        WebhookTarget {
            service: names.service,
            namespace: &config.namespace,
            path: POD_VALIDATING_PATH,
            certificate: names.certificate,
        },
        Some(owner_reference(policy)),
    );

    ValidatingUnit {
        certificate,
        deployment,
        service,
        webhook,
    }
}

/// Generate the Deployment running the PolicyClass controller
pub fn class_controller_deployment(policy: &ClusterPolicy, config: &OperatorConfig) -> WorkloadDeployment {
    generate_deployment(WorkloadParams {
        name: CLASS_CONTROLLER_DEPLOYMENT,
        container: CLASS_CONTROLLER_DEPLOYMENT,
        config,
        role_env: vec![
            ("ENABLE_CONTROLLER", "false".to_string()),
            ("ENABLE_CLASS_CONTROLLER", "true".to_string()),
        ],
        labels: &policy.spec.labels,
        annotations: &policy.spec.annotations,
        tls_secret: None,
        owner: Some(owner_reference(policy)),
    })
}

/// Generate the self-signed issuer owned by the ClusterPolicy
pub fn issuer(policy: &ClusterPolicy, config: &OperatorConfig) -> Issuer {
    let mut issuer = generate_issuer(&config.namespace);
    issuer.metadata.owner_references = Some(vec![owner_reference(policy)]);
    issuer
}
