//! For each plan: creates the workload, waits for its pod, and records a
//! `pending` node-task, tolerating per-node failures.

use chrono::Utc;
use tracing::{event, Level};
use uuid::Uuid;

use crate::cluster::ClusterAccess;
use crate::models::NodeTask;
use crate::planner::Plan;
use crate::store::TaskStore;
use crate::template;
use crate::Error;

/// Tuning knobs the launcher needs from `Conf`
pub struct LaunchSettings<'a> {
    /// The benchmark image to run
    pub image: &'a str,
    /// The auto-cleanup grace window passed into the workload template
    pub ttl_seconds_after_finished: i32,
    /// How many times to poll for a workload's pod before giving up on it
    pub pod_poll_attempts: u32,
    /// The delay between pod-poll attempts
    pub pod_poll_delay: std::time::Duration,
}

/// Launch every plan, inserting a `pending` node-task for each one that
/// materializes a pod
///
/// A per-plan failure (workload create error, or its pod never appearing)
/// is logged and skipped rather than aborting the remaining plans. If zero
/// plans succeed the caller should treat this as `PlanEmpty`.
///
/// # Arguments
///
/// * `cluster` - The cluster access adapter for the target cluster
/// * `store` - The task store to persist successful launches into
/// * `plans` - The plans produced by the Planner
/// * `cluster_id` - The cluster these plans belong to
/// * `cluster_name` - A denormalized snapshot of the cluster's name
/// * `main_task_id` - The scan run these node-tasks belong to
/// * `settings` - Launch tuning knobs
pub async fn launch(
    cluster: &dyn ClusterAccess,
    store: &dyn TaskStore,
    plans: Vec<Plan>,
    cluster_id: Uuid,
    cluster_name: &str,
    main_task_id: Uuid,
    settings: &LaunchSettings<'_>,
) -> Result<Vec<NodeTask>, Error> {
    let mut launched = Vec::with_capacity(plans.len());
    for plan in plans {
        match launch_one(cluster, store, &plan, cluster_id, cluster_name, main_task_id, settings).await {
            Ok(task) => launched.push(task),
            Err(err) => {
                event!(
                    Level::WARN,
                    node = %plan.node_name,
                    workload = %plan.workload_name,
                    error = %err,
                    "failed to launch node-task, skipping"
                );
            }
        }
    }
    if launched.is_empty() {
        return Err(Error::PlanEmpty);
    }
    Ok(launched)
}

/// Launch a single plan: create its workload, wait for a pod, insert the row
async fn launch_one(
    cluster: &dyn ClusterAccess,
    store: &dyn TaskStore,
    plan: &Plan,
    cluster_id: Uuid,
    cluster_name: &str,
    main_task_id: Uuid,
    settings: &LaunchSettings<'_>,
) -> Result<NodeTask, Error> {
    let manifest = template::generate(
        &plan.node_name,
        &plan.workload_name,
        settings.image,
        settings.ttl_seconds_after_finished,
    )?;
    cluster.create_workload(manifest).await?;

    let mut pod_name = None;
    for attempt in 0..settings.pod_poll_attempts {
        if attempt > 0 {
            tokio::time::sleep(settings.pod_poll_delay).await;
        }
        if let Some(name) = cluster.find_pod_for_workload(&plan.workload_name).await? {
            pod_name = Some(name);
            break;
        }
    }
    let Some(pod_name) = pod_name else {
        return Err(Error::TransportError(format!(
            "no pod materialized for workload {}",
            plan.workload_name
        )));
    };

    let task = NodeTask {
        cluster_id,
        cluster_name: cluster_name.to_owned(),
        main_task_id,
        node_task_id: plan.node_task_id,
        node_name: plan.node_name.clone(),
        node_ip: plan.node_ip.clone(),
        node_role: plan.node_role,
        scanner: pod_name,
        workload_name: plan.workload_name.clone(),
        scan_status: crate::models::ScanStatus::Pending,
        task_created_at: Utc::now(),
    };
    store.insert_node_task(&task).await?;
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::cluster::{NodeInfo, PodPhase};
    use crate::store::fake::FakeStore;

    fn settings() -> LaunchSettings<'static> {
        LaunchSettings {
            image: "aquasec/kube-bench:latest",
            ttl_seconds_after_finished: 600,
            pod_poll_attempts: 3,
            pod_poll_delay: std::time::Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn launches_every_plan_whose_pod_materializes() {
        let fake = FakeCluster {
            nodes: vec![NodeInfo {
                name: "node-a".to_owned(),
                internal_ip: "10.0.0.1".to_owned(),
                is_master: false,
            }],
            ..Default::default()
        };
        let plans = crate::planner::plan(&fake).await.unwrap();
        fake.seed_pod(&plans[0].workload_name, "pod-a", PodPhase::Pending);

        let store = FakeStore::default();
        let cluster_id = Uuid::new_v4();
        let main_task_id = Uuid::new_v4();
        let launched = launch(&fake, &store, plans, cluster_id, "c1", main_task_id, &settings())
            .await
            .unwrap();
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].scan_status, crate::models::ScanStatus::Pending);
    }

    #[tokio::test]
    async fn skips_plans_whose_pod_never_appears_but_still_succeeds_overall() {
        let fake = FakeCluster {
            nodes: vec![
                NodeInfo {
                    name: "node-a".to_owned(),
                    internal_ip: "10.0.0.1".to_owned(),
                    is_master: false,
                },
                NodeInfo {
                    name: "node-b".to_owned(),
                    internal_ip: "10.0.0.2".to_owned(),
                    is_master: false,
                },
            ],
            refuse_pod_for: vec![],
            ..Default::default()
        };
        let plans = crate::planner::plan(&fake).await.unwrap();
        // only seed a pod for node-a; node-b's workload never gets one
        fake.seed_pod(&plans[0].workload_name, "pod-a", PodPhase::Pending);

        let store = FakeStore::default();
        let launched = launch(
            &fake,
            &store,
            plans,
            Uuid::new_v4(),
            "c1",
            Uuid::new_v4(),
            &settings(),
        )
        .await
        .unwrap();
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].node_name, "node-a");
    }

    #[tokio::test]
    async fn fails_with_plan_empty_when_every_plan_fails() {
        let fake = FakeCluster {
            nodes: vec![NodeInfo {
                name: "node-a".to_owned(),
                internal_ip: "10.0.0.1".to_owned(),
                is_master: false,
            }],
            ..Default::default()
        };
        let plans = crate::planner::plan(&fake).await.unwrap();
        // no pod ever seeded for this workload
        let store = FakeStore::default();
        let result = launch(&fake, &store, plans, Uuid::new_v4(), "c1", Uuid::new_v4(), &settings()).await;
        assert!(matches!(result, Err(Error::PlanEmpty)));
    }
}
