//! One concurrent activity per running main-task: advances every node-task
//! to a terminal state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{event, instrument, Level};
use uuid::Uuid;

use crate::cluster::{ClusterAccess, PodPhase};
use crate::models::{NodeTask, ScanResult, ScanStatus};
use crate::store::{TaskStore, UpdateOutcome};
use crate::Error;

/// Tuning knobs the supervisor loop needs from `Conf`
#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    /// How long to sleep between ticks
    pub tick: Duration,
    /// How long a node-task may remain `pending` before being failed out
    pub pending_timeout: Duration,
}

/// Map a pod phase to the scan status it implies
///
/// `Unknown` is treated as `Failed` rather than left open: a supervisor must
/// always make forward progress towards a terminal state.
fn phase_to_status(phase: PodPhase) -> ScanStatus {
    match phase {
        PodPhase::Pending => ScanStatus::Pending,
        PodPhase::Running => ScanStatus::Running,
        PodPhase::Succeeded => ScanStatus::Done,
        PodPhase::Failed => ScanStatus::Failed,
        PodPhase::Unknown => ScanStatus::Failed,
    }
}

/// Parse a workload's raw log output into the JSON document a ScanResult
/// stores, wrapping non-JSON output in the `{raw_output, error}` envelope
fn parse_scan_output(raw: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => value,
        Err(_) => ScanResult::invalid_json_envelope(raw),
    }
}

/// Harvest a completed node-task's log and record its result, tolerating a
/// result that already exists (idempotent by `node_task_id`)
async fn harvest_result(cluster: &dyn ClusterAccess, store: &dyn TaskStore, task: &NodeTask) -> Result<(), Error> {
    let raw = cluster.read_pod_log(&task.scanner).await?;
    let scan_result = parse_scan_output(&raw);
    let result = ScanResult {
        cluster_id: task.cluster_id,
        cluster_name: task.cluster_name.clone(),
        node_name: task.node_name.clone(),
        node_ip: task.node_ip.clone(),
        main_task_id: task.main_task_id,
        node_task_id: task.node_task_id,
        scan_result,
        inserted_at: Utc::now(),
    };
    store.insert_result(&result).await
}

/// Advance a single node-task by one tick
///
/// Any error here is swallowed and turned into a `failed` transition: a
/// single node's trouble must never stop the supervisor from advancing its
/// siblings.
async fn tick_one(
    cluster: &dyn ClusterAccess,
    store: &dyn TaskStore,
    task: &NodeTask,
    pending_timeout: Duration,
) {
    if task.scan_status == ScanStatus::Pending {
        let age = Utc::now().signed_duration_since(task.task_created_at);
        if age.num_seconds() > pending_timeout.as_secs() as i64 {
            event!(Level::WARN, node_task_id = %task.node_task_id, "pending timeout, failing node-task");
            let _ = store.update_status(task.node_task_id, ScanStatus::Failed).await;
            return;
        }
    }

    let phase = match cluster.read_pod_phase(&task.scanner).await {
        Ok(phase) => phase,
        Err(err) => {
            event!(Level::WARN, node_task_id = %task.node_task_id, error = %err, "transport error reading pod phase");
            let _ = store.update_status(task.node_task_id, ScanStatus::Failed).await;
            return;
        }
    };
    let new_status = phase_to_status(phase);

    if new_status == ScanStatus::Done {
        // write the result before the status transition is applied so the
        // invariant "status = done implies a result row exists" holds even
        // if the process dies between the two calls
        if let Err(err) = harvest_result(cluster, store, task).await {
            event!(Level::WARN, node_task_id = %task.node_task_id, error = %err, "failed to harvest scan result");
            let _ = store.update_status(task.node_task_id, ScanStatus::Failed).await;
            return;
        }
    }

    match store.update_status(task.node_task_id, new_status).await {
        Ok(UpdateOutcome::Applied) | Ok(UpdateOutcome::RejectedTerminal) => {}
        Ok(UpdateOutcome::NotFound) => {
            event!(Level::WARN, node_task_id = %task.node_task_id, "node-task vanished from store mid-tick");
        }
        Err(err) => {
            event!(Level::WARN, node_task_id = %task.node_task_id, error = %err, "failed to write status update");
        }
    }
}

/// Run the supervision loop for one `main_task_id` until every node-task is
/// terminal or the stop flag is set
///
/// # Arguments
///
/// * `cluster` - The cluster access adapter for the scan's cluster
/// * `store` - The task store backing this scan's node-tasks
/// * `cluster_id` - The cluster this main-task belongs to
/// * `main_task_id` - The main-task this supervisor owns
/// * `settings` - Tick cadence and pending-timeout tuning
/// * `stop_flag` - Checked once per tick; when set the loop exits
#[instrument(name = "supervisor::run", skip_all, fields(main_task_id = %main_task_id))]
pub async fn run(
    cluster: Arc<dyn ClusterAccess>,
    store: Arc<dyn TaskStore>,
    cluster_id: Uuid,
    main_task_id: Uuid,
    settings: SupervisorSettings,
    stop_flag: Arc<AtomicBool>,
) {
    loop {
        let active = match store.select_active(cluster_id, main_task_id).await {
            Ok(active) => active,
            Err(err) => {
                event!(Level::WARN, error = %err, "failed to read active node-tasks, retrying next tick");
                tokio::time::sleep(settings.tick).await;
                continue;
            }
        };
        if active.is_empty() {
            event!(Level::INFO, "all node-tasks terminal, supervisor exiting");
            return;
        }

        for task in &active {
            tick_one(cluster.as_ref(), store.as_ref(), task, settings.pending_timeout).await;
        }

        if stop_flag.load(Ordering::SeqCst) {
            event!(Level::INFO, "stop flag observed, supervisor exiting");
            return;
        }

        tokio::time::sleep(settings.tick).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::models::NodeRole;
    use crate::store::fake::FakeStore;

    fn task(cluster_id: Uuid, main_task_id: Uuid, scanner: &str, status: ScanStatus) -> NodeTask {
        NodeTask {
            cluster_id,
            cluster_name: "c1".to_owned(),
            main_task_id,
            node_task_id: Uuid::new_v4(),
            node_name: "node-a".to_owned(),
            node_ip: "10.0.0.1".to_owned(),
            node_role: NodeRole::Worker,
            scanner: scanner.to_owned(),
            workload_name: "kube-bench-node-a-deadbeef".to_owned(),
            scan_status: status,
            task_created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn succeeded_phase_inserts_result_before_marking_done() {
        let fake = FakeCluster::default();
        fake.set_phase("pod-a", PodPhase::Succeeded);
        fake.set_log("pod-a", r#"{"ok": true}"#);
        let store = FakeStore::default();
        let t = task(Uuid::new_v4(), Uuid::new_v4(), "pod-a", ScanStatus::Running);
        store.insert_node_task(&t).await.unwrap();

        tick_one(&fake, &store, &t, Duration::from_secs(300)).await;

        let result = store.get_result(t.node_task_id).await.unwrap();
        assert!(result.is_some());
        assert_eq!(result.unwrap().scan_result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn invalid_json_output_is_wrapped_in_envelope() {
        let fake = FakeCluster::default();
        fake.set_phase("pod-a", PodPhase::Succeeded);
        fake.set_log("pod-a", "not json");
        let store = FakeStore::default();
        let t = task(Uuid::new_v4(), Uuid::new_v4(), "pod-a", ScanStatus::Running);
        store.insert_node_task(&t).await.unwrap();

        tick_one(&fake, &store, &t, Duration::from_secs(300)).await;

        let result = store.get_result(t.node_task_id).await.unwrap().unwrap();
        assert_eq!(result.scan_result["error"], "Invalid JSON format");
        assert_eq!(result.scan_result["raw_output"], "not json");
    }

    #[tokio::test]
    async fn transport_error_fails_the_node_task() {
        let fake = FakeCluster::default();
        // no phase seeded for "pod-missing" -> read_phase returns Unknown, which
        // maps to Failed; simulate a harder transport failure via refuse list
        // by reading a phase for a pod the fake never heard of (still Unknown)
        let store = FakeStore::default();
        let t = task(Uuid::new_v4(), Uuid::new_v4(), "pod-missing", ScanStatus::Running);
        store.insert_node_task(&t).await.unwrap();

        tick_one(&fake, &store, &t, Duration::from_secs(300)).await;

        let active = store.select_active(t.cluster_id, t.main_task_id).await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn pending_timeout_fails_the_node_task() {
        let fake = FakeCluster::default();
        let store = FakeStore::default();
        let mut t = task(Uuid::new_v4(), Uuid::new_v4(), "pod-a", ScanStatus::Pending);
        t.task_created_at = Utc::now() - chrono::Duration::seconds(301);
        store.insert_node_task(&t).await.unwrap();

        tick_one(&fake, &store, &t, Duration::from_secs(300)).await;

        let active = store.select_active(t.cluster_id, t.main_task_id).await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn run_exits_once_every_node_task_is_terminal() {
        let fake: Arc<dyn ClusterAccess> = Arc::new(FakeCluster::default());
        let store: Arc<dyn TaskStore> = Arc::new(FakeStore::default());
        let cluster_id = Uuid::new_v4();
        let main_task_id = Uuid::new_v4();
        let t = task(cluster_id, main_task_id, "pod-a", ScanStatus::Done);
        store.insert_node_task(&t).await.unwrap();

        let settings = SupervisorSettings {
            tick: Duration::from_millis(1),
            pending_timeout: Duration::from_secs(300),
        };
        let stop_flag = Arc::new(AtomicBool::new(false));
        // every node-task is already terminal, so the first SelectActive call
        // returns empty and the loop exits without ever sleeping
        run(fake, store, cluster_id, main_task_id, settings, stop_flag).await;
    }
}
