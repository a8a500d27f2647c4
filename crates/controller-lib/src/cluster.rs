//! Cluster name resolution
//!
//! The name recorded in `_cluster` is taken from the first of:
//! 1. a well-known node label
//! 2. the cluster of the kubeconfig's current context
//! 3. the configured fallback
//! 4. [`UNKNOWN_CLUSTER`]

use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::config::Kubeconfig;
use kube::Client;
use tracing::{debug, info};

/// Node labels carrying the cluster name, checked in this order
pub const CLUSTER_NAME_LABELS: &[&str] = &[
    "cluster-name",
    "kubernetes.azure.com/cluster",
    "eks.amazonaws.com/cluster-name",
];

pub const UNKNOWN_CLUSTER: &str = "unknown-cluster";

/// First cluster-name label found, nodes in list order
pub fn cluster_from_node_labels(nodes: &[Node]) -> Option<String> {
    nodes.iter().find_map(|node| {
        let labels = node.metadata.labels.as_ref()?;
        CLUSTER_NAME_LABELS
            .iter()
            .find_map(|key| labels.get(*key))
            .cloned()
    })
}

pub fn cluster_from_kubeconfig(kubeconfig: &Kubeconfig) -> Option<String> {
    let current = kubeconfig.current_context.as_deref()?;
    kubeconfig
        .contexts
        .iter()
        .find(|named| named.name == current)
        .and_then(|named| named.context.as_ref())
        .map(|context| context.cluster.clone())
        .filter(|cluster| !cluster.is_empty())
}

pub async fn resolve_cluster_name(
    client: &Client,
    kubeconfig: Option<&Kubeconfig>,
    configured: Option<&str>,
) -> String {
    let nodes: Api<Node> = Api::all(client.clone());
    match nodes.list(&ListParams::default()).await {
        Ok(list) => {
            if let Some(name) = cluster_from_node_labels(&list.items) {
                info!(cluster = %name, "Detected cluster name from node label");
                return name;
            }
        }
        Err(e) => debug!(error = %e, "Could not get cluster name from node labels"),
    }

    fallback_cluster_name(kubeconfig, configured)
}

/// Resolution steps that need no API access
pub fn fallback_cluster_name(kubeconfig: Option<&Kubeconfig>, configured: Option<&str>) -> String {
    if let Some(name) = kubeconfig.and_then(cluster_from_kubeconfig) {
        info!(cluster = %name, "Detected cluster name from kubeconfig");
        return name;
    }
    debug!("Could not get cluster name from kubeconfig");

    match configured.filter(|name| !name.is_empty()) {
        Some(name) => {
            info!(cluster = %name, "Using cluster name from config");
            name.to_string()
        }
        None => UNKNOWN_CLUSTER.to_string(),
    }
}
