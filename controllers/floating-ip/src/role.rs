//! Local role detection
//!
//! Every controller instance decides independently, on each reconcile,
//! whether its node should own a Service's floating IP. Nothing is stored
//! between reconciles; the role is derived from the annotation record, the
//! primary pod's placement and the local binding cache.

use crate::annotations::ServiceState;
use std::net::Ipv4Addr;

/// What the new owner has to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerAction {
    /// No floating IP yet: allocate one locally
    Creating,
    /// Service is going away: release the IP and the finalizer
    Deleting,
    /// IP recorded elsewhere: move it onto a local ENI
    Migrating,
    /// IP already wired up here
    AlreadyOwned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unmanaged,
    NewOwner(OwnerAction),
    /// This node still routes the IP but no longer owns it
    RelinquishingOwner,
}

/// Inputs observed for one reconcile
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub local_host: Ipv4Addr,
    /// Host of the first pod matching the selector; outer `None` when no
    /// pod matched, inner `None` when that pod is not scheduled yet
    pub first_pod_host: Option<Option<Ipv4Addr>>,
    /// Whether the local cache holds the Service's floating IP
    pub cached: bool,
}

/// Derive the local role for `state`
pub fn detect_role(state: &ServiceState, observed: &Observation) -> Role {
    if !state.managed {
        return Role::Unmanaged;
    }

    let local = observed.local_host;
    let owner = match state.master_host_ip {
        Some(master) => master == local,
        None => match observed.first_pod_host {
            Some(pod_host) => pod_host == Some(local),
            // nobody is left to pick up a deletion except the recorded host
            None => state.deleting && state.eni_host == Some(local),
        },
    };

    if owner {
        return Role::NewOwner(owner_action(state, observed.cached));
    }
    if state.private_ip.is_some() && observed.cached {
        return Role::RelinquishingOwner;
    }
    Role::Unmanaged
}

fn owner_action(state: &ServiceState, cached: bool) -> OwnerAction {
    if state.deleting {
        OwnerAction::Deleting
    } else if state.private_ip.is_none() {
        OwnerAction::Creating
    } else if cached {
        OwnerAction::AlreadyOwned
    } else {
        OwnerAction::Migrating
    }
}
