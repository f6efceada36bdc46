//! Process configuration read from the environment
//!
//! A single binary serves every role. The Deployments generated by the
//! operator select their role through the `ENABLE_*` variables.

use std::path::PathBuf;

use tracing::warn;

/// Default directory holding the webhook serving certificate
pub const DEFAULT_WEBHOOK_CERT_DIR: &str = "/etc/webhook/certs";

/// Runtime configuration of one operator process
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Namespace the operator and its derived objects live in
    pub namespace: String,
    /// Identity used for leader election
    pub pod_name: String,
    /// Service account propagated to derived Deployments
    pub service_account: String,
    pub image_registry: String,
    pub image_repository: String,
    pub app_version: String,
    /// PolicyClass served by this process when it runs a mutating webhook
    pub class_name: Option<String>,
    pub webhook_cert_dir: PathBuf,
    pub roles: Roles,
}

/// Which parts of the binary are active in this process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roles {
    pub cluster_controller: bool,
    pub class_controller: bool,
    pub pod_mutating_webhook: bool,
    pub pod_validating_webhook: bool,
    pub class_validating_webhook: bool,
}

impl Default for Roles {
    fn default() -> Self {
        Self {
            cluster_controller: true,
            class_controller: false,
            pod_mutating_webhook: false,
            pod_validating_webhook: false,
            class_validating_webhook: false,
        }
    }
}

impl Roles {
    /// Whether any admission endpoint is served
    pub fn any_webhook(&self) -> bool {
        self.pod_mutating_webhook || self.pod_validating_webhook || self.class_validating_webhook
    }

    /// Whether any controller loop runs
    pub fn any_controller(&self) -> bool {
        self.cluster_controller || self.class_controller
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            pod_name: "overcommit-operator".to_string(),
            service_account: "overcommit-operator".to_string(),
            image_registry: "ghcr.io".to_string(),
            image_repository: "overcommit/overcommit-operator".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            class_name: None,
            webhook_cert_dir: PathBuf::from(DEFAULT_WEBHOOK_CERT_DIR),
            roles: Roles::default(),
        }
    }
}

impl OperatorConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let namespace = lookup("POD_NAMESPACE").unwrap_or_else(|| {
            warn!("POD_NAMESPACE not set, using 'default'");
            defaults.namespace.clone()
        });
        let pod_name = lookup("POD_NAME").unwrap_or_else(|| {
            warn!("POD_NAME not set, using hostname");
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        });

        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| parse_bool(&v).unwrap_or(default))
                .unwrap_or(default)
        };

        let roles = Roles {
            cluster_controller: flag("ENABLE_CONTROLLER", true),
            class_controller: flag("ENABLE_CLASS_CONTROLLER", false),
            pod_mutating_webhook: flag("ENABLE_POD_MUTATING_WEBHOOK", false),
            pod_validating_webhook: flag("ENABLE_POD_VALIDATING_WEBHOOK", false),
            class_validating_webhook: flag("ENABLE_CLASS_VALIDATING_WEBHOOK", false),
        };

        Self {
            namespace,
            pod_name,
            service_account: lookup("SERVICE_ACCOUNT_NAME").unwrap_or(defaults.service_account),
            image_registry: lookup("IMAGE_REGISTRY").unwrap_or(defaults.image_registry),
            image_repository: lookup("IMAGE_REPOSITORY").unwrap_or(defaults.image_repository),
            app_version: lookup("APP_VERSION").unwrap_or(defaults.app_version),
            class_name: lookup("OVERCOMMIT_CLASS_NAME").filter(|c| !c.is_empty()),
            webhook_cert_dir: lookup("WEBHOOK_CERT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.webhook_cert_dir),
            roles,
        }
    }

    /// Full image reference for derived workloads
    pub fn image(&self) -> String {
        format!(
            "{}/{}:{}",
            self.image_registry, self.image_repository, self.app_version
        )
    }

    /// Path to the webhook serving certificate
    pub fn cert_path(&self) -> PathBuf {
        self.webhook_cert_dir.join("tls.crt")
    }

    /// Path to the webhook serving key
    pub fn key_path(&self) -> PathBuf {
        self.webhook_cert_dir.join("tls.key")
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        other => {
            warn!("Ignoring unrecognised boolean value '{}'", other);
            None
        }
    }
}
