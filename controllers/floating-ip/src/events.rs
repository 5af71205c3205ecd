//! Kubernetes Events on reconciled Services
//!
//! Publishing is fire-and-forget: a failed publish is logged and never
//! fails the reconcile.

use crate::error::ControllerError;
use crate::reconciler::Outcome;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

pub const CONTROLLER_NAME: &str = "floating-ip-controller";

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// `instance` distinguishes the per-node controller replicas
    pub fn new(client: Client, instance: String) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: Some(instance),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    pub const PLACED: &str = "FloatingIPPlaced";
    pub const CREATED: &str = "FloatingIPCreated";
    pub const MIGRATED: &str = "FloatingIPMigrated";
    pub const READOPTED: &str = "FloatingIPReadopted";
    pub const RELEASED: &str = "FloatingIPReleased";
    pub const RELINQUISHED: &str = "FloatingIPRelinquished";
    pub const RESOURCE_UNAVAILABLE: &str = "ResourceUnavailable";
    pub const INCONSISTENT_STATE: &str = "InconsistentState";
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    pub const PLACE: &str = "Place";
    pub const BIND: &str = "Bind";
    pub const RELEASE: &str = "Release";
    pub const RECONCILE: &str = "Reconcile";
}

/// Normal event for an outcome that changed something; `None` for no-ops
pub fn outcome_event(outcome: &Outcome) -> Option<(&'static str, &'static str, String)> {
    match outcome {
        Outcome::Ignored | Outcome::AlreadyOwned(_) => None,
        Outcome::Placed(node_ip) => Some((reasons::PLACED, actions::PLACE, format!("Pinned to node {node_ip}"))),
        Outcome::Created(binding) => Some((
            reasons::CREATED,
            actions::BIND,
            format!("Bound {} to {} on {}", binding.private_ip, binding.eni_id, binding.eni_host),
        )),
        Outcome::Migrated(binding) => Some((
            reasons::MIGRATED,
            actions::BIND,
            format!("Moved {} to {} on {}", binding.private_ip, binding.eni_id, binding.eni_host),
        )),
        Outcome::Readopted(binding) => Some((
            reasons::READOPTED,
            actions::BIND,
            format!("Re-wired {} on {}", binding.private_ip, binding.eni_host),
        )),
        Outcome::Released(Some(private_ip)) => {
            Some((reasons::RELEASED, actions::RELEASE, format!("Released {private_ip}")))
        }
        Outcome::Released(None) => Some((reasons::RELEASED, actions::RELEASE, "Removed finalizer".to_string())),
        Outcome::Relinquished(private_ip) => Some((
            reasons::RELINQUISHED,
            actions::RELEASE,
            format!("Stopped routing {private_ip} on this node"),
        )),
    }
}

/// Warning reason for a failed reconcile
pub fn error_reason(error: &ControllerError) -> &'static str {
    match error {
        e if e.is_resource_unavailable() => reasons::RESOURCE_UNAVAILABLE,
        ControllerError::InconsistentState(_) => reasons::INCONSISTENT_STATE,
        _ => reasons::RECONCILE_FAILED,
    }
}
