//! In-cluster discovery backed by the Kubernetes pod list.
use crate::discovery::{Candidate, Discovery};
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;

const PHASE_RUNNING: &str = "Running";

/// Lists pods scheduled on a node through the API server.
#[derive(Clone)]
pub struct KubeDiscovery {
    pods: Api<Pod>,
}

impl std::fmt::Debug for KubeDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeDiscovery").finish_non_exhaustive()
    }
}

impl KubeDiscovery {
    /// Build a client from the in-cluster service account, or the local kubeconfig.
    pub async fn from_env() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    pub fn new(client: Client) -> Self {
        Self {
            pods: Api::all(client),
        }
    }
}

#[async_trait]
impl Discovery for KubeDiscovery {
    async fn list_targets(&self, node: &str) -> Result<Vec<Candidate>> {
        let params = ListParams::default().fields(&format!("spec.nodeName={node}"));
        let list = self.pods.list(&params).await?;
        Ok(list.items.into_iter().map(candidate_from_pod).collect())
    }
}

/// Flatten the fields discovery cares about out of a pod object.
pub fn candidate_from_pod(pod: Pod) -> Candidate {
    let spec = pod.spec.unwrap_or_default();
    let status = pod.status.unwrap_or_default();
    Candidate {
        name: pod.metadata.name.unwrap_or_default(),
        namespace: pod.metadata.namespace.unwrap_or_default(),
        ip: status.pod_ip.unwrap_or_default(),
        node: spec.node_name.unwrap_or_default(),
        running: status.phase.as_deref() == Some(PHASE_RUNNING),
        host_network: spec.host_network.unwrap_or(false),
    }
}
