//! A `TaskStore` backed by Postgres via `deadpool-postgres`

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use uuid::Uuid;

use super::{Summary, TaskStore, UpdateOutcome};
use crate::conf::Database;
use crate::models::{Cluster, NodeRole, NodeTask, ScanResult, ScanStatus};
use crate::Error;

/// Create the two tables this core owns if they do not already exist
///
/// Grounded in `eosin-platform-eosin`'s `init_schema`: idempotent
/// `CREATE TABLE IF NOT EXISTS`, safe to call on every startup.
pub async fn init_schema(pool: &Pool) -> Result<(), Error> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS node_tasks (
                cluster_id UUID NOT NULL,
                cluster_name TEXT NOT NULL,
                main_task_id UUID NOT NULL,
                node_task_id UUID PRIMARY KEY,
                node_name TEXT NOT NULL,
                node_ip TEXT NOT NULL,
                node_role TEXT NOT NULL,
                scanner TEXT NOT NULL,
                workload_name TEXT NOT NULL,
                scan_status TEXT NOT NULL,
                task_created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            &[],
        )
        .await?;
    client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_node_tasks_main_task ON node_tasks (cluster_id, main_task_id)",
            &[],
        )
        .await?;
    client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_node_tasks_node ON node_tasks (cluster_id, node_name)",
            &[],
        )
        .await?;
    client
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS scan_results (
                cluster_id UUID NOT NULL,
                cluster_name TEXT NOT NULL,
                node_name TEXT NOT NULL,
                node_ip TEXT NOT NULL,
                main_task_id UUID NOT NULL,
                node_task_id UUID PRIMARY KEY,
                scan_result JSONB NOT NULL,
                inserted_at TIMESTAMPTZ NOT NULL
            )
            "#,
            &[],
        )
        .await?;
    tracing::info!("task store schema initialized");
    Ok(())
}

/// A `TaskStore` implementation backed by a Postgres connection pool
pub struct PostgresTaskStore {
    pool: Pool,
}

impl PostgresTaskStore {
    /// Build a connection pool from the configured database settings
    ///
    /// # Arguments
    ///
    /// * `conf` - The database section of the engine config
    pub fn connect(conf: &Database) -> Result<Self, Error> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&conf.host)
            .port(conf.port)
            .user(&conf.user)
            .password(&conf.password)
            .dbname(&conf.dbname);
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager).max_size(conf.pool_size).build().map_err(|err| {
            Error::new(format!("failed to build postgres pool: {err}"))
        })?;
        Ok(PostgresTaskStore { pool })
    }

    /// Run schema bootstrap against this store's pool
    pub async fn init_schema(&self) -> Result<(), Error> {
        init_schema(&self.pool).await
    }
}

fn node_role_to_str(role: NodeRole) -> &'static str {
    match role {
        NodeRole::Master => "master",
        NodeRole::Worker => "worker",
    }
}

fn node_role_from_str(raw: &str) -> NodeRole {
    match raw {
        "master" => NodeRole::Master,
        _ => NodeRole::Worker,
    }
}

fn status_to_str(status: ScanStatus) -> &'static str {
    match status {
        ScanStatus::Pending => "pending",
        ScanStatus::Running => "running",
        ScanStatus::Done => "done",
        ScanStatus::Failed => "failed",
    }
}

fn status_from_str(raw: &str) -> ScanStatus {
    match raw {
        "pending" => ScanStatus::Pending,
        "running" => ScanStatus::Running,
        "done" => ScanStatus::Done,
        _ => ScanStatus::Failed,
    }
}

fn row_to_node_task(row: &tokio_postgres::Row) -> NodeTask {
    NodeTask {
        cluster_id: row.get("cluster_id"),
        cluster_name: row.get("cluster_name"),
        main_task_id: row.get("main_task_id"),
        node_task_id: row.get("node_task_id"),
        node_name: row.get("node_name"),
        node_ip: row.get("node_ip"),
        node_role: node_role_from_str(row.get::<_, &str>("node_role")),
        scanner: row.get("scanner"),
        workload_name: row.get("workload_name"),
        scan_status: status_from_str(row.get::<_, &str>("scan_status")),
        task_created_at: row.get("task_created_at"),
    }
}

fn row_to_scan_result(row: &tokio_postgres::Row) -> ScanResult {
    ScanResult {
        cluster_id: row.get("cluster_id"),
        cluster_name: row.get("cluster_name"),
        node_name: row.get("node_name"),
        node_ip: row.get("node_ip"),
        main_task_id: row.get("main_task_id"),
        node_task_id: row.get("node_task_id"),
        scan_result: row.get("scan_result"),
        inserted_at: row.get("inserted_at"),
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn get_cluster(&self, cluster_id: Uuid) -> Result<Option<Cluster>, Error> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT cluster_id, cluster_name, api_server, access_token FROM clusters WHERE cluster_id = $1",
                &[&cluster_id],
            )
            .await?;
        Ok(row.map(|r| Cluster {
            cluster_id: r.get("cluster_id"),
            cluster_name: r.get("cluster_name"),
            api_server: r.get("api_server"),
            access_token: r.get("access_token"),
        }))
    }

    async fn insert_node_task(&self, task: &NodeTask) -> Result<(), Error> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                r#"
                INSERT INTO node_tasks (
                    cluster_id, cluster_name, main_task_id, node_task_id, node_name, node_ip,
                    node_role, scanner, workload_name, scan_status, task_created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (node_task_id) DO NOTHING
                "#,
                &[
                    &task.cluster_id,
                    &task.cluster_name,
                    &task.main_task_id,
                    &task.node_task_id,
                    &task.node_name,
                    &task.node_ip,
                    &node_role_to_str(task.node_role),
                    &task.scanner,
                    &task.workload_name,
                    &status_to_str(task.scan_status),
                    &task.task_created_at,
                ],
            )
            .await?;
        if affected == 0 {
            return Err(Error::new(format!("duplicate node_task_id {}", task.node_task_id)));
        }
        Ok(())
    }

    async fn update_status(&self, node_task_id: Uuid, new_status: ScanStatus) -> Result<UpdateOutcome, Error> {
        // the conditional WHERE clause is what makes this atomic against a
        // concurrent writer: only a row not already in {done, failed} is
        // touched, and only if the new status is `failed` or strictly
        // higher-ranked than the current one, so a race is resolved by
        // whichever UPDATE commits first and mirrors
        // ScanStatus::can_transition_to exactly rather than just excluding
        // terminal rows
        let affected = client_execute(
            &self.pool,
            r#"
            UPDATE node_tasks
            SET scan_status = $2
            WHERE node_task_id = $1
              AND scan_status NOT IN ('done', 'failed')
              AND (
                $2 = 'failed'
                OR (CASE scan_status WHEN 'pending' THEN 0 WHEN 'running' THEN 1 ELSE 2 END)
                   < (CASE $2 WHEN 'pending' THEN 0 WHEN 'running' THEN 1 ELSE 2 END)
              )
            "#,
            &[&node_task_id, &status_to_str(new_status)],
        )
        .await?;
        if affected > 0 {
            return Ok(UpdateOutcome::Applied);
        }
        let client = self.pool.get().await?;
        let exists = client
            .query_opt("SELECT 1 FROM node_tasks WHERE node_task_id = $1", &[&node_task_id])
            .await?;
        Ok(match exists {
            Some(_) => UpdateOutcome::RejectedTerminal,
            None => UpdateOutcome::NotFound,
        })
    }

    async fn select_active(&self, cluster_id: Uuid, main_task_id: Uuid) -> Result<Vec<NodeTask>, Error> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT * FROM node_tasks
                WHERE cluster_id = $1 AND main_task_id = $2 AND scan_status NOT IN ('done', 'failed')
                ORDER BY task_created_at ASC
                "#,
                &[&cluster_id, &main_task_id],
            )
            .await?;
        Ok(rows.iter().map(row_to_node_task).collect())
    }

    async fn summarize(&self, cluster_id: Uuid, main_task_id: Uuid) -> Result<Summary, Error> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                SELECT
                    COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE scan_status IN ('done', 'failed')) AS completed
                FROM node_tasks
                WHERE cluster_id = $1 AND main_task_id = $2
                "#,
                &[&cluster_id, &main_task_id],
            )
            .await?;
        let total: i64 = row.get("total");
        let completed: i64 = row.get("completed");
        Ok(Summary {
            total: total as u32,
            completed: completed as u32,
        })
    }

    async fn list_node_tasks(&self, cluster_id: Uuid, main_task_id: Uuid) -> Result<Vec<NodeTask>, Error> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT * FROM node_tasks
                WHERE cluster_id = $1 AND main_task_id = $2
                ORDER BY task_created_at ASC
                "#,
                &[&cluster_id, &main_task_id],
            )
            .await?;
        Ok(rows.iter().map(row_to_node_task).collect())
    }

    async fn list_main_task_ids(&self, cluster_id: Uuid) -> Result<Vec<Uuid>, Error> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT main_task_id, MAX(task_created_at) AS latest
                FROM node_tasks
                WHERE cluster_id = $1
                GROUP BY main_task_id
                ORDER BY latest DESC
                "#,
                &[&cluster_id],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("main_task_id")).collect())
    }

    async fn latest_node_task_for_node(
        &self,
        cluster_id: Uuid,
        node_name: &str,
    ) -> Result<Option<NodeTask>, Error> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT * FROM node_tasks
                WHERE cluster_id = $1 AND node_name = $2
                ORDER BY task_created_at DESC
                LIMIT 1
                "#,
                &[&cluster_id, &node_name],
            )
            .await?;
        Ok(row.as_ref().map(row_to_node_task))
    }

    async fn insert_result(&self, result: &ScanResult) -> Result<(), Error> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO scan_results (
                    cluster_id, cluster_name, node_name, node_ip, main_task_id, node_task_id,
                    scan_result, inserted_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (node_task_id) DO NOTHING
                "#,
                &[
                    &result.cluster_id,
                    &result.cluster_name,
                    &result.node_name,
                    &result.node_ip,
                    &result.main_task_id,
                    &result.node_task_id,
                    &result.scan_result,
                    &result.inserted_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_result(&self, node_task_id: Uuid) -> Result<Option<ScanResult>, Error> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM scan_results WHERE node_task_id = $1", &[&node_task_id])
            .await?;
        Ok(row.as_ref().map(row_to_scan_result))
    }

    async fn delete_main_task(&self, cluster_id: Uuid, main_task_id: Uuid) -> Result<(), Error> {
        let mut client = self.pool.get().await?;
        let txn = client.transaction().await?;
        txn.execute(
            "DELETE FROM scan_results WHERE cluster_id = $1 AND main_task_id = $2",
            &[&cluster_id, &main_task_id],
        )
        .await?;
        txn.execute(
            "DELETE FROM node_tasks WHERE cluster_id = $1 AND main_task_id = $2",
            &[&cluster_id, &main_task_id],
        )
        .await?;
        txn.commit().await?;
        Ok(())
    }
}

/// Small helper so `update_status` doesn't need to hold a pooled client across
/// the whole function body
async fn client_execute(
    pool: &Pool,
    query: &str,
    params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
) -> Result<u64, Error> {
    let client = pool.get().await?;
    Ok(client.execute(query, params).await?)
}
