//! External-facing operations and the live-supervisor registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{event, instrument, Level};
use uuid::Uuid;

use crate::cluster::ClusterFactory;
use crate::conf::Conf;
use crate::launcher::{self, LaunchSettings};
use crate::models::{NodeRole, NodeTask, ScanStatus};
use crate::planner;
use crate::store::TaskStore;
use crate::supervisor::{self, SupervisorSettings};
use crate::Error;

/// One node-task as rendered to a caller
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeTaskView {
    pub node_task_id: Uuid,
    pub node_name: String,
    pub node_ip: String,
    pub node_role: NodeRole,
    pub status: ScanStatus,
    pub progress: u8,
}

impl From<&NodeTask> for NodeTaskView {
    fn from(task: &NodeTask) -> Self {
        NodeTaskView {
            node_task_id: task.node_task_id,
            node_name: task.node_name.clone(),
            node_ip: task.node_ip.clone(),
            node_role: task.node_role,
            status: task.scan_status,
            progress: task.scan_status.progress(),
        }
    }
}

/// The response to `Start`
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub main_task_id: Uuid,
    pub tasks: Vec<NodeTaskView>,
}

/// One main-task's summary, as returned by `Query`
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MainTaskSummary {
    pub main_task_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub tasks: Vec<NodeTaskView>,
}

/// The response to `QueryWatch`
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueryWatchResponse {
    pub all_tasks_completed: bool,
    pub completed: u32,
    pub total: u32,
    pub node_statuses: Vec<NodeTaskView>,
    /// Per-status counts, supplementing the raw per-node list
    pub status_counts: HashMap<String, u32>,
    pub message: String,
}

/// The response to `FetchNodeResult`
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FetchNodeResultResponse {
    /// `"not_found"`, `"no_result"`, or the node-task's scan status
    pub status: String,
    pub scan_result: Option<serde_json::Value>,
    pub inserted_at: Option<DateTime<Utc>>,
}

/// A registry entry for one live supervisor
struct Supervised {
    stop_flag: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

/// The external-facing surface of the scan lifecycle engine
///
/// Owns the registry of live supervisors (`main_task_id -> {stop_flag,
/// handle}`), guarded by a mutex to keep registry mutations atomic.
pub struct Controller {
    store: Arc<dyn TaskStore>,
    cluster_factory: Arc<dyn ClusterFactory>,
    conf: Conf,
    registry: Mutex<HashMap<Uuid, Supervised>>,
}

impl Controller {
    /// Build a new controller over a store and cluster factory
    pub fn new(store: Arc<dyn TaskStore>, cluster_factory: Arc<dyn ClusterFactory>, conf: Conf) -> Self {
        Controller {
            store,
            cluster_factory,
            conf,
            registry: Mutex::new(HashMap::new()),
        }
    }

    async fn resolve_cluster(&self, cluster_id: Uuid) -> Result<crate::models::Cluster, Error> {
        self.store
            .get_cluster(cluster_id)
            .await?
            .ok_or_else(|| Error::ClusterNotFound(cluster_id.to_string()))
    }

    /// Plan, launch, and start supervising a scan over a cluster's current
    /// node inventory
    ///
    /// # Arguments
    ///
    /// * `cluster_id` - The cluster to scan
    /// * `image_override` - Use this benchmark image instead of the
    ///   configured default for this call only; never mutates shared state
    ///   (see DESIGN.md's note on per-instance image override)
    #[instrument(name = "controller::start", skip(self), err(Debug))]
    pub async fn start(&self, cluster_id: Uuid, image_override: Option<&str>) -> Result<StartResponse, Error> {
        let cluster_row = self.resolve_cluster(cluster_id).await?;
        let cluster_access = self.cluster_factory.connect(&cluster_row).await?;

        let plans = planner::plan(cluster_access.as_ref()).await?;
        let main_task_id = Uuid::new_v4();
        let settings = LaunchSettings {
            image: image_override.unwrap_or(&self.conf.k8s.default_image),
            ttl_seconds_after_finished: self.conf.k8s.ttl_seconds_after_finished,
            pod_poll_attempts: self.conf.supervisor.pod_poll_attempts,
            pod_poll_delay: Duration::from_secs(self.conf.supervisor.pod_poll_delay_secs),
        };
        let launched = launcher::launch(
            cluster_access.as_ref(),
            self.store.as_ref(),
            plans,
            cluster_id,
            &cluster_row.cluster_name,
            main_task_id,
            &settings,
        )
        .await?;

        self.spawn_supervisor(cluster_access, cluster_id, main_task_id);

        Ok(StartResponse {
            main_task_id,
            tasks: launched.iter().map(NodeTaskView::from).collect(),
        })
    }

    /// Register and spawn a supervisor for a just-launched (or recovered)
    /// main-task
    fn spawn_supervisor(
        &self,
        cluster_access: Arc<dyn crate::cluster::ClusterAccess>,
        cluster_id: Uuid,
        main_task_id: Uuid,
    ) {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let settings = SupervisorSettings {
            tick: Duration::from_secs(self.conf.supervisor.tick_secs),
            pending_timeout: Duration::from_secs(self.conf.supervisor.pending_timeout_secs),
        };
        let store = self.store.clone();
        let flag_for_task = stop_flag.clone();
        let handle = tokio::spawn(async move {
            supervisor::run(cluster_access, store, cluster_id, main_task_id, settings, flag_for_task).await;
        });
        self.registry
            .lock()
            .unwrap()
            .insert(main_task_id, Supervised { stop_flag, handle });
    }

    /// Return main-task summaries for a cluster, most recently created first
    ///
    /// # Arguments
    ///
    /// * `cluster_id` - The cluster to list scans for
    /// * `main_task_id` - If set, restrict to a single main-task
    pub async fn query(&self, cluster_id: Uuid, main_task_id: Option<Uuid>) -> Result<Vec<MainTaskSummary>, Error> {
        let ids = match main_task_id {
            Some(id) => vec![id],
            None => self.store.list_main_task_ids(cluster_id).await?,
        };
        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            let tasks = self.store.list_node_tasks(cluster_id, id).await?;
            let Some(created_at) = tasks.iter().map(|t| t.task_created_at).min() else {
                continue;
            };
            summaries.push(MainTaskSummary {
                main_task_id: id,
                created_at,
                tasks: tasks.iter().map(NodeTaskView::from).collect(),
            });
        }
        summaries.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        Ok(summaries)
    }

    /// A lightweight poll endpoint over a single main-task's progress
    ///
    /// # Arguments
    ///
    /// * `cluster_id` - The cluster the main-task belongs to
    /// * `main_task_id` - The main-task to poll
    pub async fn query_watch(&self, cluster_id: Uuid, main_task_id: Uuid) -> Result<QueryWatchResponse, Error> {
        let tasks = self.store.list_node_tasks(cluster_id, main_task_id).await?;
        let summary = self.store.summarize(cluster_id, main_task_id).await?;
        let mut status_counts = HashMap::new();
        for task in &tasks {
            *status_counts.entry(task.scan_status.to_string()).or_insert(0) += 1;
        }
        let all_tasks_completed = summary.total > 0 && summary.completed == summary.total;
        let message = if all_tasks_completed {
            "All tasks completed".to_owned()
        } else {
            format!("{}/{} tasks completed", summary.completed, summary.total)
        };
        Ok(QueryWatchResponse {
            all_tasks_completed,
            completed: summary.completed,
            total: summary.total,
            node_statuses: tasks.iter().map(NodeTaskView::from).collect(),
            status_counts,
            message,
        })
    }

    /// Fetch the latest scan result for one node
    ///
    /// # Arguments
    ///
    /// * `cluster_id` - The cluster the node belongs to
    /// * `node_name` - The node to fetch a result for
    pub async fn fetch_node_result(
        &self,
        cluster_id: Uuid,
        node_name: &str,
    ) -> Result<FetchNodeResultResponse, Error> {
        let Some(task) = self.store.latest_node_task_for_node(cluster_id, node_name).await? else {
            return Ok(FetchNodeResultResponse {
                status: "not_found".to_owned(),
                scan_result: None,
                inserted_at: None,
            });
        };
        if !task.scan_status.is_terminal() {
            return Ok(FetchNodeResultResponse {
                status: task.scan_status.to_string(),
                scan_result: None,
                inserted_at: None,
            });
        }
        match self.store.get_result(task.node_task_id).await? {
            Some(result) => Ok(FetchNodeResultResponse {
                status: task.scan_status.to_string(),
                scan_result: Some(result.scan_result),
                inserted_at: Some(result.inserted_at),
            }),
            None => Ok(FetchNodeResultResponse {
                status: "no_result".to_owned(),
                scan_result: None,
                inserted_at: None,
            }),
        }
    }

    /// Stop a scan's supervisor, best-effort delete its workloads, and purge
    /// its rows
    ///
    /// Race-free against the running supervisor: the stop flag is set and
    /// joined (bounded) before any row is deleted, so the supervisor either
    /// has already exited or is guaranteed to exit before its next write.
    ///
    /// # Arguments
    ///
    /// * `cluster_id` - The cluster the main-task belongs to
    /// * `main_task_id` - The main-task to tear down
    #[instrument(name = "controller::delete", skip(self), err(Debug))]
    pub async fn delete(&self, cluster_id: Uuid, main_task_id: Uuid) -> Result<(), Error> {
        let supervised = self.registry.lock().unwrap().remove(&main_task_id);
        if let Some(supervised) = supervised {
            supervised.stop_flag.store(true, Ordering::SeqCst);
            let join_bound = Duration::from_secs(self.conf.supervisor.delete_join_secs);
            if tokio::time::timeout(join_bound, supervised.handle).await.is_err() {
                event!(Level::WARN, %main_task_id, "supervisor did not exit within the join bound, proceeding anyway");
            }
        }

        let tasks = self.store.list_node_tasks(cluster_id, main_task_id).await?;
        if let Ok(cluster_row) = self.resolve_cluster(cluster_id).await {
            if let Ok(cluster_access) = self.cluster_factory.connect(&cluster_row).await {
                // delete workloads 10 at a time rather than serially
                stream::iter(&tasks)
                    .map(|task| async {
                        if let Err(err) = cluster_access.delete_workload(&task.workload_name).await {
                            event!(Level::WARN, workload = %task.workload_name, error = %err, "best-effort workload delete failed");
                        }
                    })
                    .buffer_unordered(10)
                    .collect::<Vec<()>>()
                    .await;
            }
        }

        self.store.delete_main_task(cluster_id, main_task_id).await?;
        Ok(())
    }

    /// Re-register a supervisor for every main-task that still has
    /// non-terminal node-tasks but no live supervisor
    ///
    /// Off by default; intended to be called once at
    /// process startup by a host that wants crash recovery.
    ///
    /// # Arguments
    ///
    /// * `cluster_id` - The cluster to sweep
    pub async fn reconcile(&self, cluster_id: Uuid) -> Result<u32, Error> {
        let cluster_row = self.resolve_cluster(cluster_id).await?;
        let cluster_access = self.cluster_factory.connect(&cluster_row).await?;
        let main_task_ids = self.store.list_main_task_ids(cluster_id).await?;
        let mut resumed = 0;
        for main_task_id in main_task_ids {
            let already_running = self.registry.lock().unwrap().contains_key(&main_task_id);
            if already_running {
                continue;
            }
            let active = self.store.select_active(cluster_id, main_task_id).await?;
            if active.is_empty() {
                continue;
            }
            self.spawn_supervisor(cluster_access.clone(), cluster_id, main_task_id);
            resumed += 1;
        }
        Ok(resumed)
    }
}
