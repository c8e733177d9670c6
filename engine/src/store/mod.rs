//! Durable mapping of main-task -> node-task records and node-task -> result
//! blob, the source of truth for all state transitions.

pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

pub use postgres::PostgresTaskStore;

use crate::models::{Cluster, NodeTask, ScanResult, ScanStatus};
use crate::Error;

/// The `{total, completed}` summary `Summarize` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// The total number of node-tasks for this main-task
    pub total: u32,
    /// The number of node-tasks in a terminal state
    pub completed: u32,
}

/// The outcome of a proposed `UpdateStatus` call
///
/// A rejection is not an error: the supervisor treats it as "this node-task
/// is already terminal, move on".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The transition was applied
    Applied,
    /// The row is already in a terminal state; the write was rejected
    RejectedTerminal,
    /// No row exists for this `node_task_id`
    NotFound,
}

/// The transactional store backing the scan lifecycle engine's state machine
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Look up a cluster's control-plane credentials
    ///
    /// # Arguments
    ///
    /// * `cluster_id` - The cluster to look up
    async fn get_cluster(&self, cluster_id: Uuid) -> Result<Option<Cluster>, Error>;

    /// Insert a node-task row; fails on a duplicate `node_task_id`
    ///
    /// # Arguments
    ///
    /// * `task` - The node-task row to insert
    async fn insert_node_task(&self, task: &NodeTask) -> Result<(), Error>;

    /// Atomically move a node-task to `new_status`, rejecting the write if
    /// the row is already terminal
    ///
    /// # Arguments
    ///
    /// * `node_task_id` - The node-task to update
    /// * `new_status` - The proposed new status
    async fn update_status(&self, node_task_id: Uuid, new_status: ScanStatus) -> Result<UpdateOutcome, Error>;

    /// Return every node-task for `(cluster_id, main_task_id)` whose status
    /// is not yet terminal
    async fn select_active(&self, cluster_id: Uuid, main_task_id: Uuid) -> Result<Vec<NodeTask>, Error>;

    /// Return `{total, completed}` for `(cluster_id, main_task_id)`
    async fn summarize(&self, cluster_id: Uuid, main_task_id: Uuid) -> Result<Summary, Error>;

    /// Return every node-task for a main-task, terminal or not, in launch order
    async fn list_node_tasks(&self, cluster_id: Uuid, main_task_id: Uuid) -> Result<Vec<NodeTask>, Error>;

    /// Return the distinct `main_task_id`s for a cluster, most recent first
    async fn list_main_task_ids(&self, cluster_id: Uuid) -> Result<Vec<Uuid>, Error>;

    /// Return the most recently created node-task for `(cluster_id, node_name)`
    async fn latest_node_task_for_node(
        &self,
        cluster_id: Uuid,
        node_name: &str,
    ) -> Result<Option<NodeTask>, Error>;

    /// Insert a scan-result row; a no-op if one already exists for this
    /// `node_task_id`
    ///
    /// # Arguments
    ///
    /// * `result` - The result row to insert
    async fn insert_result(&self, result: &ScanResult) -> Result<(), Error>;

    /// Fetch the stored result for a node-task, if one exists
    async fn get_result(&self, node_task_id: Uuid) -> Result<Option<ScanResult>, Error>;

    /// Delete every node-task and result row for `(cluster_id, main_task_id)`
    /// in a single transaction
    async fn delete_main_task(&self, cluster_id: Uuid, main_task_id: Uuid) -> Result<(), Error>;
}

#[cfg(any(test, feature = "test-utilities"))]
pub mod fake {
    //! An in-memory `TaskStore` used by tests, enforcing the same
    //! monotonicity contract a real transactional store must

    use std::sync::Mutex;

    use super::{Summary, TaskStore, UpdateOutcome};
    use crate::models::{Cluster, NodeTask, ScanResult, ScanStatus};
    use crate::Error;
    use async_trait::async_trait;
    use uuid::Uuid;

    /// An in-memory task store; cheap to construct per test
    #[derive(Default)]
    pub struct FakeStore {
        clusters: Mutex<Vec<Cluster>>,
        tasks: Mutex<Vec<NodeTask>>,
        results: Mutex<Vec<ScanResult>>,
    }

    impl FakeStore {
        /// Seed a cluster row so `get_cluster` can resolve it
        pub fn with_cluster(self, cluster: Cluster) -> Self {
            self.clusters.lock().unwrap().push(cluster);
            self
        }
    }

    #[async_trait]
    impl TaskStore for FakeStore {
        async fn get_cluster(&self, cluster_id: Uuid) -> Result<Option<Cluster>, Error> {
            Ok(self
                .clusters
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.cluster_id == cluster_id)
                .cloned())
        }

        async fn insert_node_task(&self, task: &NodeTask) -> Result<(), Error> {
            let mut tasks = self.tasks.lock().unwrap();
            if tasks.iter().any(|t| t.node_task_id == task.node_task_id) {
                return Err(Error::new(format!("duplicate node_task_id {}", task.node_task_id)));
            }
            tasks.push(task.clone());
            Ok(())
        }

        async fn update_status(&self, node_task_id: Uuid, new_status: ScanStatus) -> Result<UpdateOutcome, Error> {
            let mut tasks = self.tasks.lock().unwrap();
            let Some(task) = tasks.iter_mut().find(|t| t.node_task_id == node_task_id) else {
                return Ok(UpdateOutcome::NotFound);
            };
            if !task.scan_status.can_transition_to(new_status) {
                return Ok(UpdateOutcome::RejectedTerminal);
            }
            task.scan_status = new_status;
            Ok(UpdateOutcome::Applied)
        }

        async fn select_active(&self, cluster_id: Uuid, main_task_id: Uuid) -> Result<Vec<NodeTask>, Error> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.cluster_id == cluster_id && t.main_task_id == main_task_id)
                .filter(|t| !t.scan_status.is_terminal())
                .cloned()
                .collect())
        }

        async fn summarize(&self, cluster_id: Uuid, main_task_id: Uuid) -> Result<Summary, Error> {
            let tasks = self.tasks.lock().unwrap();
            let matching: Vec<&NodeTask> = tasks
                .iter()
                .filter(|t| t.cluster_id == cluster_id && t.main_task_id == main_task_id)
                .collect();
            let total = matching.len() as u32;
            let completed = matching.iter().filter(|t| t.scan_status.is_terminal()).count() as u32;
            Ok(Summary { total, completed })
        }

        async fn list_node_tasks(&self, cluster_id: Uuid, main_task_id: Uuid) -> Result<Vec<NodeTask>, Error> {
            let mut matching: Vec<NodeTask> = self
                .tasks
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.cluster_id == cluster_id && t.main_task_id == main_task_id)
                .cloned()
                .collect();
            matching.sort_by_key(|t| t.task_created_at);
            Ok(matching)
        }

        async fn list_main_task_ids(&self, cluster_id: Uuid) -> Result<Vec<Uuid>, Error> {
            let tasks = self.tasks.lock().unwrap();
            let mut seen: Vec<(Uuid, chrono::DateTime<chrono::Utc>)> = Vec::new();
            for task in tasks.iter().filter(|t| t.cluster_id == cluster_id) {
                if !seen.iter().any(|(id, _)| *id == task.main_task_id) {
                    seen.push((task.main_task_id, task.task_created_at));
                }
            }
            seen.sort_by_key(|(_, created)| std::cmp::Reverse(*created));
            Ok(seen.into_iter().map(|(id, _)| id).collect())
        }

        async fn latest_node_task_for_node(
            &self,
            cluster_id: Uuid,
            node_name: &str,
        ) -> Result<Option<NodeTask>, Error> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.cluster_id == cluster_id && t.node_name == node_name)
                .max_by_key(|t| t.task_created_at)
                .cloned())
        }

        async fn insert_result(&self, result: &ScanResult) -> Result<(), Error> {
            let mut results = self.results.lock().unwrap();
            if results.iter().any(|r| r.node_task_id == result.node_task_id) {
                return Ok(());
            }
            results.push(result.clone());
            Ok(())
        }

        async fn get_result(&self, node_task_id: Uuid) -> Result<Option<ScanResult>, Error> {
            Ok(self
                .results
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.node_task_id == node_task_id)
                .cloned())
        }

        async fn delete_main_task(&self, cluster_id: Uuid, main_task_id: Uuid) -> Result<(), Error> {
            self.tasks
                .lock()
                .unwrap()
                .retain(|t| !(t.cluster_id == cluster_id && t.main_task_id == main_task_id));
            self.results
                .lock()
                .unwrap()
                .retain(|r| !(r.cluster_id == cluster_id && r.main_task_id == main_task_id));
            Ok(())
        }
    }
}
