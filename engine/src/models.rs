//! The core data model: clusters, node-tasks, and scan results

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A registered cluster, owned by the CRUD collaborator out of scope here
///
/// This core only ever reads a `Cluster` row to obtain control-plane
/// credentials; it never creates, updates, or deletes one.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// The opaque, unique identifier for this cluster
    pub cluster_id: Uuid,
    /// A human readable name for this cluster
    pub cluster_name: String,
    /// The URL of this cluster's control plane API
    pub api_server: String,
    /// The bearer credential used to authenticate to `api_server`
    ///
    /// Treated as opaque and never logged.
    pub access_token: String,
}

/// The role a node plays in its cluster
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Worker,
}

impl NodeRole {
    /// Derive a node's role from whether it carries the master label
    ///
    /// # Arguments
    ///
    /// * `has_master_label` - Whether `node-role.kubernetes.io/master` was present
    pub fn from_master_label(has_master_label: bool) -> Self {
        if has_master_label {
            NodeRole::Master
        } else {
            NodeRole::Worker
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            NodeRole::Master => write!(f, "master"),
            NodeRole::Worker => write!(f, "worker"),
        }
    }
}

/// The state machine a NodeTask moves through
///
/// Transitions are monotone along `Pending -> Running -> Done` and
/// `* -> Failed`; `Done` and `Failed` are terminal. No transition leaves a
/// terminal state — the store enforces this, the supervisor only ever
/// proposes transitions.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl ScanStatus {
    /// True if this status is terminal (`Done` or `Failed`)
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Done | ScanStatus::Failed)
    }

    /// The ordinal used to enforce monotonicity: a transition is only valid
    /// if `new.rank() > self.rank()`, except that any status may move to
    /// `Failed`
    fn rank(&self) -> u8 {
        match self {
            ScanStatus::Pending => 0,
            ScanStatus::Running => 1,
            ScanStatus::Done => 2,
            ScanStatus::Failed => 2,
        }
    }

    /// Whether a transition from `self` to `next` is allowed under the
    /// monotone state machine contract
    ///
    /// # Arguments
    ///
    /// * `next` - The proposed new status
    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == ScanStatus::Failed {
            return true;
        }
        next.rank() > self.rank()
    }

    /// The progress percentage the Lifecycle Controller reports for `Query`
    pub fn progress(&self) -> u8 {
        match self {
            ScanStatus::Pending => 0,
            ScanStatus::Running => 50,
            ScanStatus::Done => 100,
            ScanStatus::Failed => 0,
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ScanStatus::Pending => write!(f, "pending"),
            ScanStatus::Running => write!(f, "running"),
            ScanStatus::Done => write!(f, "done"),
            ScanStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One row per (main-task, node) pair
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeTask {
    /// The cluster this node-task was launched against
    pub cluster_id: Uuid,
    /// A denormalized snapshot of the cluster's name at launch time
    pub cluster_name: String,
    /// Groups all node-tasks belonging to one scan run
    pub main_task_id: Uuid,
    /// Unique id for this node-task
    pub node_task_id: Uuid,
    /// The node's name in the cluster
    pub node_name: String,
    /// The node's internal IP
    pub node_ip: String,
    /// The node's role
    pub node_role: NodeRole,
    /// The opaque pod handle assigned by the control plane
    pub scanner: String,
    /// The batch workload's name
    pub workload_name: String,
    /// The current state-machine status
    pub scan_status: ScanStatus,
    /// When this row was inserted, assigned server-side
    pub task_created_at: DateTime<Utc>,
}

/// One row per completed NodeTask that produced parseable output
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// The cluster the scan ran against, denormalized
    pub cluster_id: Uuid,
    /// The cluster's name, denormalized
    pub cluster_name: String,
    /// The node's name, denormalized
    pub node_name: String,
    /// The node's internal IP, denormalized
    pub node_ip: String,
    /// The scan run this result belongs to
    pub main_task_id: Uuid,
    /// The node-task this result belongs to
    pub node_task_id: Uuid,
    /// The benchmark's native JSON output, or an envelope
    /// `{raw_output, error}` when the output was not valid JSON
    pub scan_result: serde_json::Value,
    /// When this row was inserted
    pub inserted_at: DateTime<Utc>,
}

impl ScanResult {
    /// Build the `{raw_output, error}` envelope used when a workload's log
    /// output does not parse as JSON
    ///
    /// # Arguments
    ///
    /// * `raw_output` - The raw text captured from the workload's log
    pub fn invalid_json_envelope(raw_output: &str) -> serde_json::Value {
        serde_json::json!({
            "raw_output": raw_output,
            "error": "Invalid JSON format",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_may_advance_to_running_or_done_or_failed() {
        assert!(ScanStatus::Pending.can_transition_to(ScanStatus::Running));
        assert!(ScanStatus::Pending.can_transition_to(ScanStatus::Done));
        assert!(ScanStatus::Pending.can_transition_to(ScanStatus::Failed));
    }

    #[test]
    fn pending_may_not_regress_to_itself() {
        assert!(!ScanStatus::Pending.can_transition_to(ScanStatus::Pending));
    }

    #[test]
    fn running_may_not_regress_to_pending() {
        assert!(!ScanStatus::Running.can_transition_to(ScanStatus::Pending));
    }

    #[test]
    fn terminal_statuses_reject_all_transitions() {
        for from in [ScanStatus::Done, ScanStatus::Failed] {
            for to in [
                ScanStatus::Pending,
                ScanStatus::Running,
                ScanStatus::Done,
                ScanStatus::Failed,
            ] {
                assert!(!from.can_transition_to(to), "{from} -> {to} should be rejected");
            }
        }
    }

    #[test]
    fn progress_matches_spec_mapping() {
        assert_eq!(ScanStatus::Pending.progress(), 0);
        assert_eq!(ScanStatus::Running.progress(), 50);
        assert_eq!(ScanStatus::Done.progress(), 100);
        assert_eq!(ScanStatus::Failed.progress(), 0);
    }

    #[test]
    fn node_role_derives_from_master_label() {
        assert_eq!(NodeRole::from_master_label(true), NodeRole::Master);
        assert_eq!(NodeRole::from_master_label(false), NodeRole::Worker);
    }
}
