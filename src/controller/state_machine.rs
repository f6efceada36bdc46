//! Finite state machine for the ClusterPolicy lifecycle
//!
//! The singleton moves through `Absent -> PendingFinalizer -> Active ->
//! Terminating -> Absent`. The current state is observed from the object
//! itself (existence, finalizer, deletion timestamp); the reconciler then
//! runs the work for that state and records the transition it completed.

use std::fmt;

use crate::crd::ClusterPolicy;

/// Lifecycle of the ClusterPolicy singleton
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyLifecycle {
    /// No object, or a deleted object with nothing left to clean up
    Absent,
    /// The object exists but the cleanup finalizer is not attached yet
    PendingFinalizer,
    /// Finalizer attached; derived objects are kept converged
    Active,
    /// Deletion requested; derived objects are being removed
    Terminating,
}

impl fmt::Display for PolicyLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyLifecycle::Absent => write!(f, "Absent"),
            PolicyLifecycle::PendingFinalizer => write!(f, "PendingFinalizer"),
            PolicyLifecycle::Active => write!(f, "Active"),
            PolicyLifecycle::Terminating => write!(f, "Terminating"),
        }
    }
}

impl PolicyLifecycle {
    /// Observe the lifecycle state of `policy` given the operator's finalizer
    pub fn observe(policy: Option<&ClusterPolicy>, finalizer: &str) -> Self {
        let Some(policy) = policy else {
            return PolicyLifecycle::Absent;
        };
        let has_finalizer = policy
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|name| name == finalizer));

        match (policy.metadata.deletion_timestamp.is_some(), has_finalizer) {
            (true, true) => PolicyLifecycle::Terminating,
            (true, false) => PolicyLifecycle::Absent,
            (false, false) => PolicyLifecycle::PendingFinalizer,
            (false, true) => PolicyLifecycle::Active,
        }
    }
}

/// Events that move the singleton between lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyEvent {
    /// The object appeared
    Created,
    /// The cleanup finalizer was persisted
    FinalizerAttached,
    /// Deletion timestamp has been set on the object
    DeletionRequested,
    /// Every derived object was deleted and the finalizer released
    CleanupCompleted,
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEvent::Created => write!(f, "Created"),
            PolicyEvent::FinalizerAttached => write!(f, "FinalizerAttached"),
            PolicyEvent::DeletionRequested => write!(f, "DeletionRequested"),
            PolicyEvent::CleanupCompleted => write!(f, "CleanupCompleted"),
        }
    }
}

/// Facts checked by transition guards
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    /// Derived objects that could not be removed during cleanup
    pub remaining_resources: Vec<String>,
}

impl TransitionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remaining(remaining_resources: Vec<String>) -> Self {
        Self {
            remaining_resources,
        }
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: PolicyLifecycle,
    pub to: PolicyLifecycle,
    pub event: PolicyEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: PolicyLifecycle,
        to: PolicyLifecycle,
        event: PolicyEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug)]
pub enum TransitionResult {
    Success {
        from: PolicyLifecycle,
        to: PolicyLifecycle,
        event: PolicyEvent,
        description: &'static str,
    },
    /// No transition for this event from the current state
    InvalidTransition {
        current: PolicyLifecycle,
        event: PolicyEvent,
    },
    /// Guard condition prevented the transition
    GuardFailed {
        from: PolicyLifecycle,
        to: PolicyLifecycle,
        event: PolicyEvent,
        reason: String,
    },
}

impl TransitionResult {
    /// Target state when the transition succeeded
    pub fn target(&self) -> Option<PolicyLifecycle> {
        match self {
            TransitionResult::Success { to, .. } => Some(*to),
            _ => None,
        }
    }
}

/// Transition table for the ClusterPolicy lifecycle
pub struct ClusterPolicyStateMachine {
    transitions: Vec<Transition>,
}

impl Default for ClusterPolicyStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterPolicyStateMachine {
    pub fn new() -> Self {
        Self {
            transitions: vec![
                Transition::new(
                    PolicyLifecycle::Absent,
                    PolicyLifecycle::PendingFinalizer,
                    PolicyEvent::Created,
                    "ClusterPolicy created",
                ),
                Transition::new(
                    PolicyLifecycle::PendingFinalizer,
                    PolicyLifecycle::Active,
                    PolicyEvent::FinalizerAttached,
                    "Finalizer attached, converging derived objects",
                ),
                Transition::new(
                    PolicyLifecycle::PendingFinalizer,
                    PolicyLifecycle::Absent,
                    PolicyEvent::DeletionRequested,
                    "Deleted before the finalizer was attached",
                ),
                Transition::new(
                    PolicyLifecycle::Active,
                    PolicyLifecycle::Terminating,
                    PolicyEvent::DeletionRequested,
                    "Deletion requested, removing derived objects",
                ),
                Transition::new(
                    PolicyLifecycle::Terminating,
                    PolicyLifecycle::Absent,
                    PolicyEvent::CleanupCompleted,
                    "Derived objects removed, finalizer released",
                ),
            ],
        }
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(
        &self,
        current: &PolicyLifecycle,
        event: PolicyEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == *current && t.event == event);

        match transition {
            Some(t) => {
                if let Some(reason) = self.check_guard(t, ctx) {
                    TransitionResult::GuardFailed {
                        from: t.from,
                        to: t.to,
                        event,
                        reason,
                    }
                } else {
                    TransitionResult::Success {
                        from: t.from,
                        to: t.to,
                        event,
                        description: t.description,
                    }
                }
            }
            None => TransitionResult::InvalidTransition {
                current: *current,
                event,
            },
        }
    }

    /// Check if a transition is valid (ignoring guards)
    pub fn can_transition(&self, from: &PolicyLifecycle, event: &PolicyEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }

    /// Get all valid events for a given state
    pub fn valid_events(&self, state: &PolicyLifecycle) -> Vec<&PolicyEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == *state)
            .map(|t| &t.event)
            .collect()
    }

    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match transition.event {
            PolicyEvent::CleanupCompleted if !ctx.remaining_resources.is_empty() => Some(format!(
                "Derived objects still present: {}",
                ctx.remaining_resources.join(", ")
            )),
            _ => None,
        }
    }
}
