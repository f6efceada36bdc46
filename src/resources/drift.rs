//! Field-scoped convergence of derived objects
//!
//! Each generated object knows which of its fields the operator owns.
//! [`ensure`] creates the object when it is missing and otherwise writes only
//! the owned fields that drifted, as an RFC 6902 patch. A converged object
//! costs one read and no writes.

use json_patch::{AddOperation, PatchOperation, RemoveOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::controller::error::Result;
use crate::controller::store::OvercommitStore;
use crate::crd::{ManagedKind, ResourceStatus};

/// A generated object the operator keeps converged
pub trait DerivedResource: Serialize + Send + Sync {
    /// Kind used to route store calls
    const KIND: ManagedKind;

    /// Object name
    fn name(&self) -> &str;

    /// Operations that bring `live` back to the desired owned fields
    fn drift(&self, live: &Value) -> Result<Vec<PatchOperation>>;
}

/// What [`ensure`] did to an object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    Patched,
    Unchanged,
    /// A write lost a race; `existed` tells whether the object was present
    Skipped { existed: bool },
}

impl EnsureOutcome {
    /// Whether the object is known to exist after this pass
    pub fn ready(&self) -> bool {
        match self {
            EnsureOutcome::Created | EnsureOutcome::Patched | EnsureOutcome::Unchanged => true,
            EnsureOutcome::Skipped { existed } => *existed,
        }
    }

    pub fn wrote(&self) -> bool {
        matches!(self, EnsureOutcome::Created | EnsureOutcome::Patched)
    }
}

/// Create `desired` if missing, otherwise patch its drifted fields
///
/// Write conflicts are logged and reported as [`EnsureOutcome::Skipped`];
/// the next pass picks the object up again.
pub async fn ensure<R: DerivedResource>(
    store: &dyn OvercommitStore,
    desired: &R,
) -> Result<EnsureOutcome> {
    let kind = R::KIND;
    let name = desired.name();

    let live = store.get_object(kind, name).await?;
    let existed = live.is_some();

    let write = match live {
        None => {
            let object = serde_json::to_value(desired)?;
            store
                .create_object(kind, &object)
                .await
                .map(|_| EnsureOutcome::Created)
        }
        Some(live) => {
            let ops = desired.drift(&live)?;
            if ops.is_empty() {
                debug!(%kind, name, "Object is converged");
                return Ok(EnsureOutcome::Unchanged);
            }
            store
                .patch_object(kind, name, &json_patch::Patch(ops))
                .await
                .map(|_| EnsureOutcome::Patched)
        }
    };

    match write {
        Ok(outcome) => {
            info!(%kind, name, ?outcome, "Converged object");
            Ok(outcome)
        }
        Err(e) if e.is_conflict() => {
            warn!(%kind, name, error = %e, "Conflict writing object, skipping until next pass");
            Ok(EnsureOutcome::Skipped { existed })
        }
        Err(e) => Err(e),
    }
}

/// Delete an object, treating "already gone" as success
pub async fn remove(store: &dyn OvercommitStore, kind: ManagedKind, name: &str) -> Result<()> {
    if store.delete_object(kind, name).await? {
        info!(%kind, name, "Deleted object");
    } else {
        debug!(%kind, name, "Object already absent");
    }
    Ok(())
}

/// Status entry for an ensured object
pub fn resource_status(kind: ManagedKind, name: &str, outcome: EnsureOutcome) -> ResourceStatus {
    ResourceStatus::new(kind, name, outcome.ready())
}

/// [`ensure`] followed by the matching status entry
pub async fn converge<R: DerivedResource>(
    store: &dyn OvercommitStore,
    desired: &R,
) -> Result<ResourceStatus> {
    let outcome = ensure(store, desired).await?;
    Ok(resource_status(R::KIND, desired.name(), outcome))
}

// =============================================================================
// Drift helpers
// =============================================================================

/// Build a JSON pointer from path segments
pub fn pointer(path: &[&str]) -> PointerBuf {
    PointerBuf::from_tokens(path.iter().copied())
}

/// Resolve a path of object keys and array indices
pub fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Treat null, `{}`, `[]` and `""` as an unset field
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| match v {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::String(s) => !s.is_empty(),
        _ => true,
    })
}

/// Compare one owned field and emit the operation that restores it
pub fn sync_value(
    ops: &mut Vec<PatchOperation>,
    path: &[&str],
    desired: Option<&Value>,
    live: Option<&Value>,
) {
    match (present(desired), present(live)) {
        (Some(d), Some(l)) if d == l => {}
        (Some(d), _) => ops.push(PatchOperation::Add(AddOperation {
            path: pointer(path),
            value: d.clone(),
        })),
        (None, Some(_)) => ops.push(PatchOperation::Remove(RemoveOperation {
            path: pointer(path),
        })),
        (None, None) => {}
    }
}

/// Compare the same path on the desired and live objects
pub fn sync_path(ops: &mut Vec<PatchOperation>, desired: &Value, live: &Value, path: &[&str]) {
    sync_value(ops, path, lookup(desired, path), lookup(live, path));
}

/// Restore the desired entries of a string map, leaving other keys alone
pub fn sync_map_entries(
    ops: &mut Vec<PatchOperation>,
    desired: &Value,
    live: &Value,
    path: &[&str],
) {
    let Some(Value::Object(wanted)) = present(lookup(desired, path)) else {
        return;
    };
    let Some(Value::Object(current)) = present(lookup(live, path)) else {
        ops.push(PatchOperation::Add(AddOperation {
            path: pointer(path),
            value: Value::Object(wanted.clone()),
        }));
        return;
    };

    for (key, value) in wanted {
        if current.get(key) != Some(value) {
            let mut entry = path.to_vec();
            entry.push(key.as_str());
            ops.push(PatchOperation::Add(AddOperation {
                path: pointer(&entry),
                value: value.clone(),
            }));
        }
    }
}

/// Upsert the operator's owner references, keeping references other writers added
///
/// A live entry with the same `apiVersion` and `kind` as a desired one is
/// the operator's and is replaced in place when it differs.
pub fn sync_owner_references(ops: &mut Vec<PatchOperation>, desired: &Value, live: &Value) {
    const PATH: [&str; 2] = ["metadata", "ownerReferences"];

    let Some(Value::Array(wanted)) = present(lookup(desired, &PATH)) else {
        return;
    };
    let Some(Value::Array(current)) = present(lookup(live, &PATH)) else {
        ops.push(PatchOperation::Add(AddOperation {
            path: pointer(&PATH),
            value: Value::Array(wanted.clone()),
        }));
        return;
    };

    let same_owner = |a: &Value, b: &Value| {
        a.get("apiVersion") == b.get("apiVersion") && a.get("kind") == b.get("kind")
    };

    for reference in wanted {
        match current.iter().position(|r| same_owner(r, reference)) {
            Some(index) if current.get(index) == Some(reference) => {}
            Some(index) => {
                let index = index.to_string();
                ops.push(PatchOperation::Replace(ReplaceOperation {
                    path: pointer(&["metadata", "ownerReferences", index.as_str()]),
                    value: reference.clone(),
                }));
            }
            None => ops.push(PatchOperation::Add(AddOperation {
                path: pointer(&["metadata", "ownerReferences", "-"]),
                value: reference.clone(),
            })),
        }
    }
}
