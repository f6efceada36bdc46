//! In-memory [`OvercommitStore`] for multi-pass reconciliation tests
//!
//! Objects are kept as JSON and patched with the same RFC 6902 and merge
//! patch semantics the API server applies. Every successful write bumps a
//! counter so tests can assert that a converged pass writes nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::controller::error::{Error, Result};
use crate::controller::store::OvercommitStore;
use crate::crd::{ClusterPolicy, ManagedKind, PolicyClass};

#[derive(Default)]
struct State {
    cluster_policy: Option<ClusterPolicy>,
    classes: BTreeMap<String, PolicyClass>,
    objects: BTreeMap<(ManagedKind, String), Value>,
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    owners: BTreeMap<(String, String, String), Vec<OwnerReference>>,
    failing_deletes: BTreeSet<(ManagedKind, String)>,
    conflicting_writes: BTreeSet<(ManagedKind, String)>,
    writes: usize,
    resource_version: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn lock_poisoned() -> Error {
    Error::TransientError("memory store lock poisoned".to_string())
}

/// Apply a merge patch to a typed object, honouring `metadata.resourceVersion`
fn merge_typed<T: Serialize + DeserializeOwned>(object: &T, patch: &Value, version: String) -> Result<T> {
    let mut value = serde_json::to_value(object)?;
    let current = value["metadata"]["resourceVersion"].clone();
    if let Some(expected) = patch.pointer("/metadata/resourceVersion")
        && !expected.is_null()
        && *expected != current
    {
        return Err(Error::ConflictError(format!(
            "resourceVersion {expected} does not match {current}"
        )));
    }
    json_patch::merge(&mut value, patch);
    value["metadata"]["resourceVersion"] = Value::String(version);
    Ok(serde_json::from_value(value)?)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| lock_poisoned())
    }

    pub fn set_cluster_policy(&self, policy: ClusterPolicy) {
        if let Ok(mut state) = self.state() {
            state.cluster_policy = Some(policy);
        }
    }

    pub fn insert_class(&self, class: PolicyClass) {
        if let Ok(mut state) = self.state() {
            let name = class.metadata.name.clone().unwrap_or_default();
            state.classes.insert(name, class);
        }
    }

    pub fn remove_class(&self, name: &str) {
        if let Ok(mut state) = self.state() {
            state.classes.remove(name);
        }
    }

    pub fn insert_namespace(&self, name: &str, labels: &[(&str, &str)]) {
        if let Ok(mut state) = self.state() {
            let labels = labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            state.namespaces.insert(name.to_string(), labels);
        }
    }

    pub fn insert_owners(&self, kind: &str, namespace: &str, name: &str, owners: Vec<OwnerReference>) {
        if let Ok(mut state) = self.state() {
            state
                .owners
                .insert((kind.to_string(), namespace.to_string(), name.to_string()), owners);
        }
    }

    /// Make deletes of one object fail until [`MemoryStore::heal`] is called
    pub fn fail_delete(&self, kind: ManagedKind, name: &str) {
        if let Ok(mut state) = self.state() {
            state.failing_deletes.insert((kind, name.to_string()));
        }
    }

    /// Answer creates and patches of one object with a 409 until [`MemoryStore::heal`]
    pub fn conflict_on_write(&self, kind: ManagedKind, name: &str) {
        if let Ok(mut state) = self.state() {
            state.conflicting_writes.insert((kind, name.to_string()));
        }
    }

    pub fn heal(&self) {
        if let Ok(mut state) = self.state() {
            state.failing_deletes.clear();
            state.conflicting_writes.clear();
        }
    }

    pub fn writes(&self) -> usize {
        self.state().map(|s| s.writes).unwrap_or_default()
    }

    pub fn cluster_policy(&self) -> Option<ClusterPolicy> {
        self.state().ok().and_then(|s| s.cluster_policy.clone())
    }

    pub fn class(&self, name: &str) -> Option<PolicyClass> {
        self.state().ok().and_then(|s| s.classes.get(name).cloned())
    }

    pub fn object(&self, kind: ManagedKind, name: &str) -> Option<Value> {
        self.state()
            .ok()
            .and_then(|s| s.objects.get(&(kind, name.to_string())).cloned())
    }

    /// Keys of every stored derived object
    pub fn object_keys(&self) -> Vec<(ManagedKind, String)> {
        self.state()
            .map(|s| s.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Edit a stored object without counting it as an operator write
    pub fn tamper(&self, kind: ManagedKind, name: &str, edit: impl FnOnce(&mut Value)) {
        if let Ok(mut state) = self.state()
            && let Some(object) = state.objects.get_mut(&(kind, name.to_string()))
        {
            edit(object);
        }
    }
}

#[async_trait]
impl OvercommitStore for MemoryStore {
    async fn get_cluster_policy(&self) -> Result<Option<ClusterPolicy>> {
        Ok(self.state()?.cluster_policy.clone())
    }

    async fn get_policy_class(&self, name: &str) -> Result<Option<PolicyClass>> {
        Ok(self.state()?.classes.get(name).cloned())
    }

    async fn list_policy_classes(&self) -> Result<Vec<PolicyClass>> {
        Ok(self.state()?.classes.values().cloned().collect())
    }

    async fn patch_cluster_policy(&self, patch: &Value) -> Result<()> {
        let mut state = self.state()?;
        let version = state.next_version();
        let current = state
            .cluster_policy
            .as_ref()
            .ok_or_else(|| Error::NotFound("ClusterPolicy".to_string()))?;
        let patched = merge_typed(current, patch, version)?;
        state.cluster_policy = Some(patched);
        state.writes += 1;
        Ok(())
    }

    async fn patch_cluster_policy_status(&self, patch: &Value) -> Result<()> {
        self.patch_cluster_policy(patch).await
    }

    async fn patch_policy_class(&self, name: &str, patch: &Value) -> Result<()> {
        let mut state = self.state()?;
        let version = state.next_version();
        let current = state
            .classes
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("PolicyClass {name}")))?;
        let patched = merge_typed(current, patch, version)?;
        state.classes.insert(name.to_string(), patched);
        state.writes += 1;
        Ok(())
    }

    async fn patch_policy_class_status(&self, name: &str, patch: &Value) -> Result<()> {
        self.patch_policy_class(name, patch).await
    }

    async fn get_object(&self, kind: ManagedKind, name: &str) -> Result<Option<Value>> {
        Ok(self.state()?.objects.get(&(kind, name.to_string())).cloned())
    }

    async fn create_object(&self, kind: ManagedKind, object: &Value) -> Result<()> {
        let name = object["metadata"]["name"]
            .as_str()
            .ok_or(Error::MissingObjectKey(".metadata.name"))?
            .to_string();
        let mut state = self.state()?;
        if state.conflicting_writes.contains(&(kind, name.clone())) {
            return Err(Error::ConflictError(format!("create of {kind}/{name} conflicted")));
        }
        if state.objects.contains_key(&(kind, name.clone())) {
            return Err(Error::ConflictError(format!("{kind}/{name} already exists")));
        }
        state.objects.insert((kind, name), object.clone());
        state.writes += 1;
        Ok(())
    }

    async fn patch_object(&self, kind: ManagedKind, name: &str, patch: &json_patch::Patch) -> Result<()> {
        let mut state = self.state()?;
        if state.conflicting_writes.contains(&(kind, name.to_string())) {
            return Err(Error::ConflictError(format!("patch of {kind}/{name} conflicted")));
        }
        let object = state
            .objects
            .get_mut(&(kind, name.to_string()))
            .ok_or_else(|| Error::NotFound(format!("{kind}/{name}")))?;
        json_patch::patch(object, &patch.0).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        state.writes += 1;
        Ok(())
    }

    async fn delete_object(&self, kind: ManagedKind, name: &str) -> Result<bool> {
        let mut state = self.state()?;
        let key = (kind, name.to_string());
        if state.failing_deletes.contains(&key) {
            return Err(Error::TransientError(format!("delete of {kind}/{name} failed")));
        }
        let existed = state.objects.remove(&key).is_some();
        if existed {
            state.writes += 1;
        }
        Ok(existed)
    }

    async fn namespace_labels(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.state()?.namespaces.get(namespace).cloned())
    }

    async fn object_owners(
        &self,
        _api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Vec<OwnerReference>>> {
        Ok(self
            .state()?
            .owners
            .get(&(kind.to_string(), namespace.to_string(), name.to_string()))
            .cloned())
    }
}
