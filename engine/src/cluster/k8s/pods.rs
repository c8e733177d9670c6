use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, LogParams};
use tracing::instrument;

use crate::cluster::PodPhase;
use crate::Error;

/// Wrapper for pod api routes in k8s
pub struct Pods {
    client: kube::Client,
    namespace: String,
    api: Api<Pod>,
}

impl Pods {
    /// Build a new pods wrapper
    ///
    /// # Arguments
    ///
    /// * `client` - The kubernetes client to issue requests with
    /// * `namespace` - The namespace workloads are launched into
    pub fn new(client: &kube::Client, namespace: &str) -> Self {
        let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
        Pods {
            client: client.clone(),
            namespace: namespace.to_owned(),
            api,
        }
    }

    /// Find the pod created for a workload by its `job-name` label
    ///
    /// # Arguments
    ///
    /// * `workload_name` - The workload's name
    #[instrument(name = "k8s::Pods::find_for_workload", skip(self), err(Debug))]
    pub async fn find_for_workload(&self, workload_name: &str) -> Result<Option<String>, Error> {
        let params = ListParams::default().labels(&format!("job-name={workload_name}"));
        let pods = self.api.list(&params).await?;
        Ok(pods.items.into_iter().find_map(|pod| pod.metadata.name))
    }

    /// Read the current phase of a pod
    ///
    /// # Arguments
    ///
    /// * `pod_name` - The pod's name
    #[instrument(name = "k8s::Pods::read_phase", skip(self), err(Debug))]
    pub async fn read_phase(&self, pod_name: &str) -> Result<PodPhase, Error> {
        let pod = self.api.get(pod_name).await?;
        let phase = pod.status.as_ref().and_then(|status| status.phase.as_deref());
        Ok(PodPhase::from_raw(phase))
    }

    /// Read a pod's log output
    ///
    /// # Arguments
    ///
    /// * `pod_name` - The pod's name
    #[instrument(name = "k8s::Pods::read_log", skip(self), err(Debug))]
    pub async fn read_log(&self, pod_name: &str) -> Result<String, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let log = api.logs(pod_name, &LogParams::default()).await?;
        Ok(log)
    }
}
