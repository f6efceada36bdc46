//! Read/write seam over the Kubernetes API
//!
//! Reconcilers and the admission engine only talk to the cluster through
//! [`OvercommitStore`], so their logic can be exercised against mocks and an
//! in-memory fake.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams, PostParams};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use tracing::debug;

use crate::controller::error::Result;
use crate::crd::{CLUSTER_POLICY_NAME, ClusterPolicy, ManagedKind, PolicyClass};
use crate::resources::common::FIELD_MANAGER;

/// Access to every object the operator reads or writes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OvercommitStore: Send + Sync {
    /// Fetch the singleton ClusterPolicy
    async fn get_cluster_policy(&self) -> Result<Option<ClusterPolicy>>;

    async fn get_policy_class(&self, name: &str) -> Result<Option<PolicyClass>>;

    async fn list_policy_classes(&self) -> Result<Vec<PolicyClass>>;

    /// Merge-patch the singleton's metadata or spec
    async fn patch_cluster_policy(&self, patch: &Value) -> Result<()>;

    /// Merge-patch the singleton's status subresource
    async fn patch_cluster_policy_status(&self, patch: &Value) -> Result<()>;

    /// Merge-patch a PolicyClass's metadata or spec
    async fn patch_policy_class(&self, name: &str, patch: &Value) -> Result<()>;

    /// Merge-patch a PolicyClass's status subresource
    async fn patch_policy_class_status(&self, name: &str, patch: &Value) -> Result<()>;

    /// Fetch a derived object as raw JSON
    async fn get_object(&self, kind: ManagedKind, name: &str) -> Result<Option<Value>>;

    async fn create_object(&self, kind: ManagedKind, object: &Value) -> Result<()>;

    /// Apply an RFC 6902 patch to a derived object
    async fn patch_object(&self, kind: ManagedKind, name: &str, patch: &json_patch::Patch) -> Result<()>;

    /// Delete a derived object; returns false when it was already gone
    async fn delete_object(&self, kind: ManagedKind, name: &str) -> Result<bool>;

    /// Labels of a namespace, or None when the namespace does not exist
    async fn namespace_labels(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>>;

    /// Owner references of an arbitrary namespaced object
    async fn object_owners(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Vec<OwnerReference>>>;
}

// =============================================================================
// Real Implementation
// =============================================================================

/// Store backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    namespace: String,
}

impl KubeStore {
    /// Create a store writing derived objects into `namespace`
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn cluster_policies(&self) -> Api<ClusterPolicy> {
        Api::all(self.client.clone())
    }

    fn policy_classes(&self) -> Api<PolicyClass> {
        Api::all(self.client.clone())
    }

    fn dynamic_api(&self, kind: ManagedKind) -> Api<DynamicObject> {
        let ar = api_resource(kind);
        if kind.is_namespaced() {
            Api::namespaced_with(self.client.clone(), &self.namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        }
    }
}

/// API coordinates for each derived kind
pub fn api_resource(kind: ManagedKind) -> ApiResource {
    match kind {
        ManagedKind::Issuer => ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("cert-manager.io", "v1", "Issuer"),
            "issuers",
        ),
        ManagedKind::Certificate => ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("cert-manager.io", "v1", "Certificate"),
            "certificates",
        ),
        ManagedKind::Deployment => ApiResource::erase::<Deployment>(&()),
        ManagedKind::Service => ApiResource::erase::<Service>(&()),
        ManagedKind::MutatingWebhookConfiguration => {
            ApiResource::erase::<MutatingWebhookConfiguration>(&())
        }
        ManagedKind::ValidatingWebhookConfiguration => {
            ApiResource::erase::<ValidatingWebhookConfiguration>(&())
        }
    }
}

fn write_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER)
}

#[async_trait]
impl OvercommitStore for KubeStore {
    async fn get_cluster_policy(&self) -> Result<Option<ClusterPolicy>> {
        Ok(self.cluster_policies().get_opt(CLUSTER_POLICY_NAME).await?)
    }

    async fn get_policy_class(&self, name: &str) -> Result<Option<PolicyClass>> {
        Ok(self.policy_classes().get_opt(name).await?)
    }

    async fn list_policy_classes(&self) -> Result<Vec<PolicyClass>> {
        let list = self.policy_classes().list(&Default::default()).await?;
        Ok(list.items)
    }

    async fn patch_cluster_policy(&self, patch: &Value) -> Result<()> {
        self.cluster_policies()
            .patch(CLUSTER_POLICY_NAME, &write_params(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn patch_cluster_policy_status(&self, patch: &Value) -> Result<()> {
        self.cluster_policies()
            .patch_status(CLUSTER_POLICY_NAME, &write_params(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn patch_policy_class(&self, name: &str, patch: &Value) -> Result<()> {
        self.policy_classes()
            .patch(name, &write_params(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn patch_policy_class_status(&self, name: &str, patch: &Value) -> Result<()> {
        self.policy_classes()
            .patch_status(name, &write_params(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn get_object(&self, kind: ManagedKind, name: &str) -> Result<Option<Value>> {
        match self.dynamic_api(kind).get_opt(name).await? {
            Some(obj) => Ok(Some(serde_json::to_value(obj)?)),
            None => Ok(None),
        }
    }

    async fn create_object(&self, kind: ManagedKind, object: &Value) -> Result<()> {
        let obj: DynamicObject = serde_json::from_value(object.clone())?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.dynamic_api(kind).create(&params, &obj).await?;
        debug!(%kind, name = ?obj.metadata.name, "Created object");
        Ok(())
    }

    async fn patch_object(&self, kind: ManagedKind, name: &str, patch: &json_patch::Patch) -> Result<()> {
        self.dynamic_api(kind)
            .patch(name, &write_params(), &Patch::Json::<()>(patch.clone()))
            .await?;
        debug!(%kind, name, ops = patch.0.len(), "Patched object");
        Ok(())
    }

    async fn delete_object(&self, kind: ManagedKind, name: &str) -> Result<bool> {
        match self.dynamic_api(kind).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn namespace_labels(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api
            .get_opt(namespace)
            .await?
            .map(|ns| ns.metadata.labels.unwrap_or_default()))
    }

    async fn object_owners(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Vec<OwnerReference>>> {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", api_version),
        };
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let (ar, _caps) = kube::discovery::pinned_kind(&self.client, &gvk).await?;
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        Ok(api
            .get_opt(name)
            .await?
            .map(|obj| obj.metadata.owner_references.unwrap_or_default()))
    }
}
