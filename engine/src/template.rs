//! Produces a workload manifest for a given node.

use k8s_openapi::api::batch::v1::Job;
use serde_json::json;

use crate::Error;

/// Build the batch workload manifest for one node's scan
///
/// Pins execution to `node_name` via the node selector, requests
/// `restartPolicy: Never` (the tool never retries on its own), passes
/// `--json` so output can be parsed, and sets `ttlSecondsAfterFinished` as
/// defense-in-depth cleanup for when `Delete` is never called.
///
/// # Arguments
///
/// * `node_name` - The node to pin this workload to
/// * `workload_name` - The generated, unique name for this workload
/// * `image` - The benchmark container image to run
/// * `ttl_seconds_after_finished` - The auto-cleanup grace window, in seconds
pub fn generate(
    node_name: &str,
    workload_name: &str,
    image: &str,
    ttl_seconds_after_finished: i32,
) -> Result<Job, Error> {
    let raw = json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": workload_name,
            "labels": {
                "app": "kube-bench",
                "job-name": workload_name,
            },
        },
        "spec": {
            "backoffLimit": 0,
            "ttlSecondsAfterFinished": ttl_seconds_after_finished,
            "template": {
                "metadata": {
                    "labels": {
                        "app": "kube-bench",
                        "job-name": workload_name,
                    },
                },
                "spec": {
                    "nodeSelector": {
                        "kubernetes.io/hostname": node_name,
                    },
                    "restartPolicy": "Never",
                    "containers": [
                        {
                            "name": "kube-bench",
                            "image": image,
                            "args": ["--json"],
                            "volumeMounts": [
                                {"name": "var-lib-etcd", "mountPath": "/var/lib/etcd", "readOnly": true},
                                {"name": "var-lib-kubelet", "mountPath": "/var/lib/kubelet", "readOnly": true},
                                {"name": "etc-systemd", "mountPath": "/etc/systemd", "readOnly": true},
                                {"name": "etc-kubernetes", "mountPath": "/etc/kubernetes", "readOnly": true},
                            ],
                        }
                    ],
                    "volumes": [
                        {"name": "var-lib-etcd", "hostPath": {"path": "/var/lib/etcd"}},
                        {"name": "var-lib-kubelet", "hostPath": {"path": "/var/lib/kubelet"}},
                        {"name": "etc-systemd", "hostPath": {"path": "/etc/systemd"}},
                        {"name": "etc-kubernetes", "hostPath": {"path": "/etc/kubernetes"}},
                    ],
                },
            },
        },
    });
    let job: Job = serde_json::from_value(raw)?;
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pins_to_the_named_node() {
        let job = generate("node-a", "kube-bench-node-a-deadbeef", "aquasec/kube-bench:latest", 600).unwrap();
        let selector = job
            .spec
            .unwrap()
            .template
            .spec
            .unwrap()
            .node_selector
            .unwrap();
        assert_eq!(selector.get("kubernetes.io/hostname"), Some(&"node-a".to_owned()));
    }

    #[test]
    fn sets_restart_policy_never_and_json_flag() {
        let job = generate("node-a", "wl", "image:tag", 600).unwrap();
        let pod_spec = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod_spec.restart_policy.as_deref(), Some("Never"));
        let container = &pod_spec.containers[0];
        assert_eq!(container.args.as_deref(), Some(&["--json".to_owned()][..]));
    }

    #[test]
    fn sets_ttl_seconds_after_finished() {
        let job = generate("node-a", "wl", "image:tag", 600).unwrap();
        assert_eq!(job.spec.unwrap().ttl_seconds_after_finished, Some(600));
    }
}
