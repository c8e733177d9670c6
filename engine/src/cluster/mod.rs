//! A uniform capability over a cluster's control plane.

pub mod k8s;

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::Cluster;
use crate::Error;

pub use k8s::K8sCluster;

/// Resolves a `Cluster` row's credentials into a live `ClusterAccess`
///
/// A trait rather than a free function so tests can substitute a factory
/// that hands back a scripted `FakeCluster` instead of dialing out to a
/// real control plane, mirroring `thorium-scaler`'s `Scheduler::new`
/// dispatch over concrete backends.
#[async_trait]
pub trait ClusterFactory: Send + Sync {
    /// Build (or look up) a `ClusterAccess` for the given cluster row
    async fn connect(&self, cluster: &Cluster) -> Result<Arc<dyn ClusterAccess>, Error>;
}

/// A `ClusterFactory` that dials a real Kubernetes-compatible control plane
pub struct K8sClusterFactory {
    /// Whether to accept an invalid/self-signed TLS certificate
    pub accept_invalid_certs: bool,
}

#[async_trait]
impl ClusterFactory for K8sClusterFactory {
    async fn connect(&self, cluster: &Cluster) -> Result<Arc<dyn ClusterAccess>, Error> {
        let adapter = K8sCluster::connect(cluster, self.accept_invalid_certs).await?;
        Ok(Arc::new(adapter))
    }
}

/// A node discovered via `ListNodes`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// The node's name
    pub name: String,
    /// The node's internal IP, if the control plane reported one
    pub internal_ip: String,
    /// Whether this node carries the `node-role.kubernetes.io/master` label
    pub is_master: bool,
}

/// The lifecycle phase of a pod backing a launched workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parse the phase string k8s reports on `status.phase`
    ///
    /// # Arguments
    ///
    /// * `raw` - The raw phase string, if the pod has reported a status yet
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// A capability object bound to one cluster: list its nodes, create/read/
/// delete batch workloads and their pods, and read pod logs
///
/// Implementations authenticate with a bearer token scoped to a single
/// `Cluster` row (see `Cluster::from_row`); there is no ambient kubeconfig.
#[async_trait]
pub trait ClusterAccess: Send + Sync {
    /// List every node currently known to this cluster's control plane
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, Error>;

    /// Create a batch workload from a manifest built by the workload template
    ///
    /// # Arguments
    ///
    /// * `manifest` - The workload manifest (a `Job`-shaped k8s object)
    async fn create_workload(&self, manifest: k8s_openapi::api::batch::v1::Job) -> Result<(), Error>;

    /// Find the pod backing a workload, if the control plane has scheduled one yet
    ///
    /// # Arguments
    ///
    /// * `workload_name` - The workload's name, used as the `job-name` label selector
    async fn find_pod_for_workload(&self, workload_name: &str) -> Result<Option<String>, Error>;

    /// Read the current phase of a pod
    ///
    /// # Arguments
    ///
    /// * `pod_name` - The pod's name
    async fn read_pod_phase(&self, pod_name: &str) -> Result<PodPhase, Error>;

    /// Read a pod's log output
    ///
    /// # Arguments
    ///
    /// * `pod_name` - The pod's name
    async fn read_pod_log(&self, pod_name: &str) -> Result<String, Error>;

    /// Delete a batch workload, treating not-found as success
    ///
    /// # Arguments
    ///
    /// * `workload_name` - The workload's name
    async fn delete_workload(&self, workload_name: &str) -> Result<(), Error>;
}

#[cfg(any(test, feature = "test-utilities"))]
pub mod fake {
    //! An in-memory, scriptable `ClusterAccess` used by tests
    //!
    //! Grounded in `thorium-scaler`'s `schedulers::dry_run::DryRun`: a fake
    //! that records calls and returns pre-seeded responses instead of
    //! talking to a real control plane.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::{ClusterAccess, ClusterFactory, NodeInfo, PodPhase};
    use crate::models::Cluster;
    use crate::Error;
    use async_trait::async_trait;

    /// A `ClusterFactory` that always hands back the same pre-built fake,
    /// regardless of which cluster row is asked for
    pub struct FakeClusterFactory {
        /// The fake cluster adapter every `connect` call returns
        pub cluster: Arc<dyn ClusterAccess>,
    }

    #[async_trait]
    impl ClusterFactory for FakeClusterFactory {
        async fn connect(&self, _cluster: &Cluster) -> Result<Arc<dyn ClusterAccess>, Error> {
            Ok(self.cluster.clone())
        }
    }

    /// A fake cluster with a fixed node inventory and scriptable pod phases
    #[derive(Default)]
    pub struct FakeCluster {
        /// The nodes `list_nodes` returns
        pub nodes: Vec<NodeInfo>,
        /// Workload name -> pod name, populated once `create_workload` is called
        pods: Mutex<HashMap<String, String>>,
        /// Pod name -> phase to report from `read_pod_phase`
        pub phases: Mutex<HashMap<String, PodPhase>>,
        /// Pod name -> log text to report from `read_pod_log`
        pub logs: Mutex<HashMap<String, String>>,
        /// Workload names never to materialize a pod for (simulates a stuck create)
        pub refuse_pod_for: Vec<String>,
        /// Workload names whose `create_workload` call should fail
        pub refuse_create_for: Vec<String>,
        /// Workload names that have been deleted
        pub deleted: Mutex<Vec<String>>,
    }

    impl FakeCluster {
        /// Derive the pod name a real control plane would have scheduled for
        /// a workload, absent any explicit `seed_pod` call
        pub fn auto_pod_name(workload_name: &str) -> String {
            format!("pod-for-{workload_name}")
        }

        /// Register a pod name that `find_pod_for_workload` will return for
        /// `workload_name` once its workload is created
        pub fn seed_pod(&self, workload_name: &str, pod_name: &str, phase: PodPhase) {
            self.pods
                .lock()
                .unwrap()
                .insert(workload_name.to_owned(), pod_name.to_owned());
            self.phases.lock().unwrap().insert(pod_name.to_owned(), phase);
        }

        /// Overwrite the phase reported for a pod
        pub fn set_phase(&self, pod_name: &str, phase: PodPhase) {
            self.phases.lock().unwrap().insert(pod_name.to_owned(), phase);
        }

        /// Overwrite the log text reported for a pod
        pub fn set_log(&self, pod_name: &str, log: &str) {
            self.logs.lock().unwrap().insert(pod_name.to_owned(), log.to_owned());
        }

        /// The workload names that have been deleted so far
        pub fn deleted_workloads(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ClusterAccess for FakeCluster {
        async fn list_nodes(&self) -> Result<Vec<NodeInfo>, Error> {
            Ok(self.nodes.clone())
        }

        async fn create_workload(&self, manifest: k8s_openapi::api::batch::v1::Job) -> Result<(), Error> {
            let name = manifest
                .metadata
                .name
                .ok_or_else(|| Error::new("fake workload manifest has no name"))?;
            if self.refuse_create_for.contains(&name) {
                return Err(Error::TransportError(format!("refused create for {name}")));
            }
            // mirror a real control plane scheduling a pod once a job is
            // created, unless a test already seeded an explicit pod for this
            // workload (seed_pod always wins)
            let pod_name = Self::auto_pod_name(&name);
            self.pods.lock().unwrap().entry(name).or_insert_with(|| pod_name.clone());
            self.phases.lock().unwrap().entry(pod_name).or_insert(PodPhase::Pending);
            Ok(())
        }

        async fn find_pod_for_workload(&self, workload_name: &str) -> Result<Option<String>, Error> {
            if self.refuse_pod_for.contains(&workload_name.to_owned()) {
                return Ok(None);
            }
            Ok(self.pods.lock().unwrap().get(workload_name).cloned())
        }

        async fn read_pod_phase(&self, pod_name: &str) -> Result<PodPhase, Error> {
            Ok(self
                .phases
                .lock()
                .unwrap()
                .get(pod_name)
                .copied()
                .unwrap_or(PodPhase::Unknown))
        }

        async fn read_pod_log(&self, pod_name: &str) -> Result<String, Error> {
            Ok(self
                .logs
                .lock()
                .unwrap()
                .get(pod_name)
                .cloned()
                .unwrap_or_default())
        }

        async fn delete_workload(&self, workload_name: &str) -> Result<(), Error> {
            self.deleted.lock().unwrap().push(workload_name.to_owned());
            Ok(())
        }
    }
}
