//! Kubernetes-backed `ClusterAccess` implementation

mod jobs;
mod nodes;
mod pods;

use async_trait::async_trait;
use kube::config::{AuthInfo, Kubeconfig};

use self::jobs::Jobs;
use self::nodes::Nodes;
use self::pods::Pods;
use super::{ClusterAccess, NodeInfo, PodPhase};
use crate::models::Cluster;
use crate::Error;

/// The namespace workloads are launched into
///
/// The benchmark tool needs no multi-tenant isolation from itself, so a
/// single fixed namespace keeps the adapter simple.
const NAMESPACE: &str = "default";

/// Build a `kube::Client` scoped to a single cluster row's bearer token
///
/// Unlike the ambient-kubeconfig client construction this was modeled on
/// (`kube::Config::from_kubeconfig` against the local context), this engine
/// must talk to an arbitrary number of remote clusters it has no local
/// kubeconfig entry for, so the client is built directly from the cluster's
/// `api_server` and `access_token`.
///
/// # Arguments
///
/// * `cluster` - The cluster row carrying the API server URL and bearer token
/// * `accept_invalid_certs` - Whether to skip TLS certificate verification
pub async fn build_client(cluster: &Cluster, accept_invalid_certs: bool) -> Result<kube::Client, Error> {
    let mut auth_info = AuthInfo::default();
    auth_info.token = Some(cluster.access_token.clone().into());
    let kubeconfig = Kubeconfig {
        clusters: vec![kube::config::NamedCluster {
            name: cluster.cluster_name.clone(),
            cluster: Some(kube::config::Cluster {
                server: Some(cluster.api_server.clone()),
                insecure_skip_tls_verify: Some(accept_invalid_certs),
                ..Default::default()
            }),
        }],
        auth_infos: vec![kube::config::NamedAuthInfo {
            name: cluster.cluster_name.clone(),
            auth_info: Some(auth_info),
        }],
        contexts: vec![kube::config::NamedContext {
            name: cluster.cluster_name.clone(),
            context: Some(kube::config::Context {
                cluster: cluster.cluster_name.clone(),
                user: cluster.cluster_name.clone(),
                namespace: Some(NAMESPACE.to_owned()),
                extensions: None,
            }),
        }],
        current_context: Some(cluster.cluster_name.clone()),
        ..Default::default()
    };
    let options = kube::config::KubeConfigOptions {
        context: Some(cluster.cluster_name.clone()),
        cluster: Some(cluster.cluster_name.clone()),
        user: Some(cluster.cluster_name.clone()),
    };
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(|err| Error::K8sConfig(err.to_string()))?;
    let client = kube::Client::try_from(config)?;
    Ok(client)
}

/// A `ClusterAccess` implementation backed by a Kubernetes-compatible API
pub struct K8sCluster {
    nodes: Nodes,
    jobs: Jobs,
    pods: Pods,
}

impl K8sCluster {
    /// Build a cluster adapter from a cluster row
    ///
    /// # Arguments
    ///
    /// * `cluster` - The cluster row carrying the API server URL and bearer token
    /// * `accept_invalid_certs` - Whether to skip TLS certificate verification
    pub async fn connect(cluster: &Cluster, accept_invalid_certs: bool) -> Result<Self, Error> {
        let client = build_client(cluster, accept_invalid_certs).await?;
        Ok(K8sCluster {
            nodes: Nodes::new(&client),
            jobs: Jobs::new(&client, NAMESPACE),
            pods: Pods::new(&client, NAMESPACE),
        })
    }
}

#[async_trait]
impl ClusterAccess for K8sCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, Error> {
        self.nodes.list().await
    }

    async fn create_workload(&self, manifest: k8s_openapi::api::batch::v1::Job) -> Result<(), Error> {
        self.jobs.create(manifest).await
    }

    async fn find_pod_for_workload(&self, workload_name: &str) -> Result<Option<String>, Error> {
        self.pods.find_for_workload(workload_name).await
    }

    async fn read_pod_phase(&self, pod_name: &str) -> Result<PodPhase, Error> {
        self.pods.read_phase(pod_name).await
    }

    async fn read_pod_log(&self, pod_name: &str) -> Result<String, Error> {
        self.pods.read_log(pod_name).await
    }

    async fn delete_workload(&self, workload_name: &str) -> Result<(), Error> {
        self.jobs.delete(workload_name).await
    }
}
