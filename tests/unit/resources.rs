//! Unit tests for derived resource generation

use crate::common::*;
use overcommit_operator::crd::ManagedKind;
use overcommit_operator::resources::DerivedResource;
use overcommit_operator::resources::common::{ClassUnitNames, POD_VALIDATING_UNIT};
use overcommit_operator::resources::units::{
    ClassUnit, class_controller_deployment, class_unit, pod_validating_unit,
};
use serde_json::{Value, json};

fn env(deployment: &Value) -> Vec<(String, Value)> {
    deployment["spec"]["template"]["spec"]["containers"][0]["env"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| (e["name"].as_str().unwrap().to_string(), e["value"].clone()))
        .collect()
}

mod class_unit_tests {
    use super::*;

    #[test]
    fn test_names_follow_class() {
        let names = ClassUnitNames::new("burst");
        assert_eq!(names.deployment, "burst-overcommit-webhook");
        assert_eq!(names.service, "burst-webhook-service");
        assert_eq!(names.certificate, "burst-webhook-certificate");
        assert_eq!(names.secret, "burst-webhook-secret");
    }

    #[test]
    fn test_members_are_the_four_objects() {
        let members = ClassUnit::members("burst");
        let kinds: Vec<ManagedKind> = members.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                ManagedKind::Certificate,
                ManagedKind::Deployment,
                ManagedKind::Service,
                ManagedKind::MutatingWebhookConfiguration,
            ]
        );
    }

    #[test]
    fn test_all_objects_owned_by_class() {
        let class = PolicyClassBuilder::new("burst").build();
        let unit = class_unit(&class, &cluster_policy(), &operator_config());

        for value in [
            serde_json::to_value(&unit.certificate).unwrap(),
            serde_json::to_value(&unit.deployment).unwrap(),
            serde_json::to_value(&unit.service).unwrap(),
            serde_json::to_value(&unit.webhook).unwrap(),
        ] {
            let owner = &value["metadata"]["ownerReferences"][0];
            assert_eq!(owner["kind"], "PolicyClass");
            assert_eq!(owner["name"], "burst");
            assert_eq!(owner["uid"], "burst-uid");
            assert_eq!(owner["controller"], true);
        }
    }

    #[test]
    fn test_deployment_serves_the_class() {
        let class = PolicyClassBuilder::new("burst").label("team", "web").build();
        let unit = class_unit(&class, &cluster_policy(), &operator_config());
        let deployment = serde_json::to_value(&unit.deployment).unwrap();

        let env = env(&deployment);
        assert!(env.contains(&("OVERCOMMIT_CLASS_NAME".to_string(), json!("burst"))));
        assert!(env.contains(&("ENABLE_POD_MUTATING_WEBHOOK".to_string(), json!("true"))));
        assert!(env.contains(&("ENABLE_CONTROLLER".to_string(), json!("false"))));

        let template_labels = &deployment["spec"]["template"]["metadata"]["labels"];
        assert_eq!(template_labels["team"], "web");
        assert_eq!(template_labels["app"], "burst-overcommit-webhook");
        assert_eq!(deployment["metadata"]["namespace"], OPERATOR_NAMESPACE);
    }

    #[test]
    fn test_certificate_covers_service_dns() {
        let class = PolicyClassBuilder::new("burst").build();
        let unit = class_unit(&class, &cluster_policy(), &operator_config());
        assert_eq!(
            unit.certificate.spec.dns_names,
            vec![
                "burst-webhook-service.overcommit-system.svc".to_string(),
                "burst-webhook-service.overcommit-system.svc.cluster.local".to_string(),
            ]
        );
        assert_eq!(unit.certificate.spec.secret_name, "burst-webhook-secret");
    }

    #[test]
    fn test_default_class_adds_catch_all_webhook() {
        let regular = PolicyClassBuilder::new("burst").build();
        let default = PolicyClassBuilder::new("standard").default_class().build();

        let regular = class_unit(&regular, &cluster_policy(), &operator_config());
        let default = class_unit(&default, &cluster_policy(), &operator_config());

        assert_eq!(regular.webhook.0.webhooks.as_ref().unwrap().len(), 1);
        let hooks = default.webhook.0.webhooks.as_ref().unwrap();
        assert_eq!(hooks.len(), 2);
        let selector = hooks[1].object_selector.as_ref().unwrap();
        let expr = &selector.match_expressions.as_ref().unwrap()[0];
        assert_eq!(expr.key, SELECTOR_LABEL);
        assert_eq!(expr.operator, "DoesNotExist");
    }

    #[test]
    fn test_excluded_namespaces_become_match_condition() {
        let class = PolicyClassBuilder::new("burst").excluding("^kube-.*").build();
        let unit = class_unit(&class, &cluster_policy(), &operator_config());
        let hooks = unit.webhook.0.webhooks.as_ref().unwrap();
        let conditions = hooks[0].match_conditions.as_ref().unwrap();
        assert_eq!(
            conditions[0].expression,
            "!object.metadata.namespace.matches('^kube-.*')"
        );

        let plain = PolicyClassBuilder::new("plain").build();
        let unit = class_unit(&plain, &cluster_policy(), &operator_config());
        assert!(unit.webhook.0.webhooks.as_ref().unwrap()[0].match_conditions.is_none());
    }
}

mod drift_tests {
    use super::*;

    #[test]
    fn test_generated_objects_do_not_drift_from_themselves() {
        let class = PolicyClassBuilder::new("burst").build();
        let unit = class_unit(&class, &cluster_policy(), &operator_config());

        let live = serde_json::to_value(&unit.deployment).unwrap();
        assert!(unit.deployment.drift(&live).unwrap().is_empty());
        let live = serde_json::to_value(&unit.service).unwrap();
        assert!(unit.service.drift(&live).unwrap().is_empty());
        let live = serde_json::to_value(&unit.webhook).unwrap();
        assert!(unit.webhook.drift(&live).unwrap().is_empty());
    }

    #[test]
    fn test_injected_ca_bundle_is_not_drift() {
        let class = PolicyClassBuilder::new("burst").build();
        let unit = class_unit(&class, &cluster_policy(), &operator_config());

        let mut live = serde_json::to_value(&unit.webhook).unwrap();
        live["webhooks"][0]["clientConfig"]["caBundle"] = json!("Y2VydA==");
        assert!(unit.webhook.drift(&live).unwrap().is_empty());
    }

    #[test]
    fn test_changed_ratio_env_is_drift() {
        let config = operator_config();
        let deployment = class_controller_deployment(&cluster_policy(), &config);

        let mut live = serde_json::to_value(&deployment).unwrap();
        live["spec"]["template"]["spec"]["containers"][0]["image"] = json!("example/other:1.0");
        assert!(!deployment.drift(&live).unwrap().is_empty());
    }
}

mod shared_unit_tests {
    use super::*;

    #[test]
    fn test_pod_validating_unit_owned_by_policy() {
        let unit = pod_validating_unit(&cluster_policy(), &operator_config());
        let webhook = serde_json::to_value(&unit.webhook).unwrap();
        assert_eq!(webhook["metadata"]["name"], POD_VALIDATING_UNIT.deployment);
        assert_eq!(webhook["metadata"]["ownerReferences"][0]["kind"], "ClusterPolicy");

        let hook = &webhook["webhooks"][0];
        assert_eq!(hook["objectSelector"]["matchExpressions"][0]["key"], SELECTOR_LABEL);
        assert_eq!(hook["objectSelector"]["matchExpressions"][0]["operator"], "Exists");
    }

    #[test]
    fn test_class_controller_has_no_tls() {
        let deployment = class_controller_deployment(&cluster_policy(), &operator_config());
        let value = serde_json::to_value(&deployment).unwrap();
        assert!(value["spec"]["template"]["spec"]["volumes"].is_null());
        let env = env(&value);
        assert!(env.contains(&("ENABLE_CLASS_CONTROLLER".to_string(), json!("true"))));
        assert!(!env.iter().any(|(name, _)| name == "WEBHOOK_CERT_DIR"));
    }
}
