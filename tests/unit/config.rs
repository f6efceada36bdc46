//! Unit tests for environment configuration

use overcommit_operator::config::OperatorConfig;
use std::collections::HashMap;
use std::path::PathBuf;

fn from(vars: &[(&str, &str)]) -> OperatorConfig {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    OperatorConfig::from_lookup(|key| vars.get(key).cloned())
}

#[test]
fn test_defaults_run_the_cluster_controller_only() {
    let config = from(&[("POD_NAME", "operator-0")]);
    assert_eq!(config.namespace, "default");
    assert!(config.roles.cluster_controller);
    assert!(!config.roles.class_controller);
    assert!(!config.roles.any_webhook());
    assert!(config.class_name.is_none());
}

#[test]
fn test_class_webhook_role() {
    let config = from(&[
        ("POD_NAMESPACE", "overcommit-system"),
        ("POD_NAME", "burst-0"),
        ("ENABLE_CONTROLLER", "false"),
        ("ENABLE_POD_MUTATING_WEBHOOK", "true"),
        ("OVERCOMMIT_CLASS_NAME", "burst"),
        ("WEBHOOK_CERT_DIR", "/tmp/certs"),
    ]);
    assert!(!config.roles.any_controller());
    assert!(config.roles.pod_mutating_webhook);
    assert_eq!(config.class_name.as_deref(), Some("burst"));
    assert_eq!(config.cert_path(), PathBuf::from("/tmp/certs/tls.crt"));
    assert_eq!(config.key_path(), PathBuf::from("/tmp/certs/tls.key"));
}

#[test]
fn test_image_reference() {
    let config = from(&[
        ("POD_NAME", "operator-0"),
        ("IMAGE_REGISTRY", "registry.example.com"),
        ("IMAGE_REPOSITORY", "platform/overcommit"),
        ("APP_VERSION", "1.2.3"),
    ]);
    assert_eq!(config.image(), "registry.example.com/platform/overcommit:1.2.3");
}

#[test]
fn test_unparseable_flag_keeps_default() {
    let config = from(&[("POD_NAME", "operator-0"), ("ENABLE_CONTROLLER", "maybe")]);
    assert!(config.roles.cluster_controller);
}
