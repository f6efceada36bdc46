use std::sync::Arc;

use crate::config::OperatorConfig;
use crate::controller::store::OvercommitStore;
use crate::health::Metrics;

/// Shared context for the controllers
#[derive(Clone)]
pub struct Context {
    /// Access to the API server
    pub store: Arc<dyn OvercommitStore>,
    pub config: Arc<OperatorConfig>,
    pub metrics: Arc<Metrics>,
}

impl Context {
    pub fn new(
        store: Arc<dyn OvercommitStore>,
        config: Arc<OperatorConfig>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }
}
