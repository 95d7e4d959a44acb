//! Target discovery seam and the per-target admission rules.
use crate::error::Result;
use crate::types::Target;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A workload as reported by the cluster, before filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub namespace: String,
    pub ip: String,
    pub node: String,
    pub running: bool,
    pub host_network: bool,
}

impl Candidate {
    pub fn into_target(self) -> Target {
        Target {
            name: self.name,
            namespace: self.namespace,
            ip: self.ip,
            node: self.node,
        }
    }
}

/// Who the scanner itself is, so it can scope discovery and skip itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub namespace: String,
    pub node: String,
}

impl Identity {
    pub fn is_self(&self, c: &Candidate) -> bool {
        c.name == self.name && c.namespace == self.namespace
    }
}

/// Source of candidate workloads for one node.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn list_targets(&self, node: &str) -> Result<Vec<Candidate>>;
}

/// Why a candidate was left out of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    NotRunning,
    HostNetwork,
    OwnIdentity,
}

/// Returns the first rule that excludes `c`, if any.
pub fn exclusion(c: &Candidate, me: &Identity) -> Option<Exclusion> {
    if !c.running {
        Some(Exclusion::NotRunning)
    } else if c.host_network {
        Some(Exclusion::HostNetwork)
    } else if me.is_self(c) {
        Some(Exclusion::OwnIdentity)
    } else {
        None
    }
}

/// Keep only candidates that are running, own their network namespace, and are not us.
pub fn select_targets(candidates: Vec<Candidate>, me: &Identity) -> Vec<Target> {
    candidates
        .into_iter()
        .filter(|c| match exclusion(c, me) {
            None => true,
            Some(reason) => {
                tracing::debug!(name = %c.name, namespace = %c.namespace, ?reason, "target excluded");
                false
            }
        })
        .map(Candidate::into_target)
        .collect()
}
