//! Converts "scan cluster X" into a set of per-node plans.

use uuid::Uuid;

use crate::cluster::ClusterAccess;
use crate::models::NodeRole;
use crate::Error;

/// One node's half of a scan plan, produced before any workload exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// The freshly generated id this node's eventual NodeTask row will use
    pub node_task_id: Uuid,
    /// The node's name
    pub node_name: String,
    /// The node's internal IP
    pub node_ip: String,
    /// The node's role, derived from its labels
    pub node_role: NodeRole,
    /// The workload name the Launcher will create
    pub workload_name: String,
}

/// Derive a workload name stable for a given node-task
///
/// # Arguments
///
/// * `node_name` - The node this workload will run on
/// * `node_task_id` - The node-task id this workload belongs to
pub fn workload_name(node_name: &str, node_task_id: Uuid) -> String {
    let short = node_task_id.simple().to_string();
    format!("kube-bench-{node_name}-{}", &short[..8])
}

/// Plan a scan over a cluster's current node inventory
///
/// Calls `ListNodes` once and derives one `Plan` per node; writes nothing to
/// the store.
///
/// # Arguments
///
/// * `cluster` - The cluster access adapter for the target cluster
pub async fn plan(cluster: &dyn ClusterAccess) -> Result<Vec<Plan>, Error> {
    let nodes = cluster.list_nodes().await?;
    let plans = nodes
        .into_iter()
        .map(|node| {
            let node_task_id = Uuid::new_v4();
            Plan {
                workload_name: workload_name(&node.name, node_task_id),
                node_task_id,
                node_name: node.name,
                node_ip: node.internal_ip,
                node_role: NodeRole::from_master_label(node.is_master),
            }
        })
        .collect();
    Ok(plans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::cluster::NodeInfo;

    #[tokio::test]
    async fn plans_one_entry_per_node_with_derived_role() {
        let fake = FakeCluster {
            nodes: vec![
                NodeInfo {
                    name: "node-a".to_owned(),
                    internal_ip: "10.0.0.1".to_owned(),
                    is_master: true,
                },
                NodeInfo {
                    name: "node-b".to_owned(),
                    internal_ip: "10.0.0.2".to_owned(),
                    is_master: false,
                },
            ],
            ..Default::default()
        };
        let plans = plan(&fake).await.unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].node_role, NodeRole::Master);
        assert_eq!(plans[1].node_role, NodeRole::Worker);
    }

    #[test]
    fn workload_name_is_prefixed_and_bounded() {
        let id = Uuid::new_v4();
        let name = workload_name("node-a", id);
        assert!(name.starts_with("kube-bench-node-a-"));
        let suffix = name.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 8);
    }
}
