use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use tracing::{event, instrument, Level};

use crate::cluster::NodeInfo;
use crate::Error;

/// The label that marks a node as a control-plane node
const MASTER_LABEL: &str = "node-role.kubernetes.io/master";

/// Wrapper for node api routes in k8s
pub struct Nodes {
    api: Api<Node>,
}

impl Nodes {
    /// Build a new node wrapper
    ///
    /// # Arguments
    ///
    /// * `client` - The kubernetes client to issue requests with
    pub fn new(client: &kube::Client) -> Self {
        Nodes {
            api: Api::all(client.clone()),
        }
    }

    /// List every node in the cluster
    #[instrument(name = "k8s::Nodes::list", skip_all, err(Debug))]
    pub async fn list(&self) -> Result<Vec<NodeInfo>, Error> {
        let nodes = self.api.list(&ListParams::default()).await?;
        let mut infos = Vec::with_capacity(nodes.items.len());
        for node in nodes {
            let Some(name) = node.metadata.name.clone() else {
                event!(Level::WARN, msg = "node has no name, skipping");
                continue;
            };
            let is_master = node
                .metadata
                .labels
                .as_ref()
                .map(|labels| labels.contains_key(MASTER_LABEL))
                .unwrap_or(false);
            let internal_ip = node
                .status
                .as_ref()
                .and_then(|status| status.addresses.as_ref())
                .and_then(|addrs| addrs.iter().find(|addr| addr.type_ == "InternalIP"))
                .map(|addr| addr.address.clone())
                .unwrap_or_default();
            infos.push(NodeInfo {
                name,
                internal_ip,
                is_master,
            });
        }
        Ok(infos)
    }
}
