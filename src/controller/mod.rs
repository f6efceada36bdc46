pub mod class_reconciler;
pub mod cluster_reconciler;
pub mod context;
pub mod error;
pub mod state_machine;
pub mod status;
pub mod store;

pub use class_reconciler::{CLASS_CONTROLLER, class_error_policy, reconcile_class};
pub use cluster_reconciler::{
    CLUSTER_CONTROLLER, FINALIZER, cluster_error_policy, reconcile_cluster_policy,
};
pub use context::Context;
pub use error::{BackoffConfig, Error, Result};
pub use state_machine::{ClusterPolicyStateMachine, PolicyEvent, PolicyLifecycle};
pub use status::{ConditionBuilder, StatusManager};
pub use store::{KubeStore, OvercommitStore};
