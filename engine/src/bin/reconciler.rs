//! Standalone recovery sweep: re-attach a supervisor to every main-task that
//! still has non-terminal node-tasks but no live supervisor.
//!
//! Off by default; a host process opts in by running this binary (or
//! calling `Controller::reconcile` directly) once at startup.

use std::sync::Arc;

use clap::Parser;
use scan_engine::args::Args;
use scan_engine::cluster::K8sClusterFactory;
use scan_engine::store::PostgresTaskStore;
use scan_engine::{Conf, Controller};

#[tokio::main]
async fn main() {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let args = Args::parse();
    let conf = Conf::new(&args.config).expect("failed to load config");
    scan_engine::utils::trace::setup(&conf.tracing);

    let store = PostgresTaskStore::connect(&conf.database).expect("failed to connect to the task store");
    store.init_schema().await.expect("failed to initialize task store schema");

    let factory = Arc::new(K8sClusterFactory {
        accept_invalid_certs: conf.k8s.accept_invalid_certs,
    });
    let controller = Controller::new(Arc::new(store), factory, conf);

    let resumed = controller
        .reconcile(args.cluster_id)
        .await
        .expect("reconcile sweep failed");
    tracing::info!(cluster_id = %args.cluster_id, resumed, "reconcile sweep complete");
}
