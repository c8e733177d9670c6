use clap::Parser;

/// Command line args for the reconciler entrypoint
#[derive(Parser, Debug, Clone)]
#[clap(version, author)]
pub struct Args {
    /// The path to load the config file from
    #[clap(short, long, default_value = "scan-engine.yml")]
    pub config: String,
    /// The cluster to sweep for orphaned supervisors
    #[clap(long)]
    pub cluster_id: uuid::Uuid,
}
