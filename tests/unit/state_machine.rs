//! Unit tests for the ClusterPolicy lifecycle

use crate::common::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use overcommit_operator::FINALIZER;
use overcommit_operator::controller::state_machine::{
    ClusterPolicyStateMachine, PolicyEvent, PolicyLifecycle, TransitionContext, TransitionResult,
};

mod observe_tests {
    use super::*;

    #[test]
    fn test_missing_policy_is_absent() {
        assert_eq!(PolicyLifecycle::observe(None, FINALIZER), PolicyLifecycle::Absent);
    }

    #[test]
    fn test_new_policy_needs_finalizer() {
        let policy = cluster_policy();
        assert_eq!(
            PolicyLifecycle::observe(Some(&policy), FINALIZER),
            PolicyLifecycle::PendingFinalizer
        );
    }

    #[test]
    fn test_finalized_policy_is_active() {
        let mut policy = cluster_policy();
        policy.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        assert_eq!(
            PolicyLifecycle::observe(Some(&policy), FINALIZER),
            PolicyLifecycle::Active
        );
    }

    #[test]
    fn test_deleting_policy_is_terminating() {
        let mut policy = cluster_policy();
        policy.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        policy.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert_eq!(
            PolicyLifecycle::observe(Some(&policy), FINALIZER),
            PolicyLifecycle::Terminating
        );
    }
}

mod transition_tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let sm = ClusterPolicyStateMachine::new();
        let ctx = TransitionContext::new();

        let steps = [
            (PolicyLifecycle::Absent, PolicyEvent::Created, PolicyLifecycle::PendingFinalizer),
            (PolicyLifecycle::PendingFinalizer, PolicyEvent::FinalizerAttached, PolicyLifecycle::Active),
            (PolicyLifecycle::Active, PolicyEvent::DeletionRequested, PolicyLifecycle::Terminating),
            (PolicyLifecycle::Terminating, PolicyEvent::CleanupCompleted, PolicyLifecycle::Absent),
        ];
        for (from, event, to) in steps {
            assert_eq!(sm.transition(&from, event, &ctx).target(), Some(to));
        }
    }

    #[test]
    fn test_cleanup_blocked_while_resources_remain() {
        let sm = ClusterPolicyStateMachine::new();
        let ctx = TransitionContext::with_remaining(vec!["Deployment/overcommit-class-controller".to_string()]);
        let result = sm.transition(&PolicyLifecycle::Terminating, PolicyEvent::CleanupCompleted, &ctx);
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));
        assert_eq!(result.target(), None);
    }

    #[test]
    fn test_active_cannot_skip_to_absent() {
        let sm = ClusterPolicyStateMachine::new();
        assert!(!sm.can_transition(&PolicyLifecycle::Active, &PolicyEvent::CleanupCompleted));
        assert_eq!(
            sm.valid_events(&PolicyLifecycle::Active),
            vec![&PolicyEvent::DeletionRequested]
        );
    }
}
