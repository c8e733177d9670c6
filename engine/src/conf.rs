//! The config for the scan lifecycle engine

use std::path::Path;

use crate::Error;

/// Helps serde default a value to false
fn default_false() -> bool {
    false
}

/// The default number of connections to keep in the Postgres pool
fn default_pool_size() -> usize {
    10
}

/// The default tick period for a supervisor's poll loop, in seconds
fn default_tick_secs() -> u64 {
    10
}

/// The default amount of time a node-task may sit in `pending` before the
/// supervisor fails it out, in seconds
fn default_pending_timeout_secs() -> u64 {
    300
}

/// The default number of attempts when polling for a workload's pod
fn default_pod_poll_attempts() -> u32 {
    3
}

/// The default delay between pod-poll attempts, in seconds
fn default_pod_poll_delay_secs() -> u64 {
    2
}

/// The default bound on joining a supervisor during `Delete`, in seconds
fn default_delete_join_secs() -> u64 {
    5
}

/// The default benchmark image used when a `Start` call does not override it
fn default_benchmark_image() -> String {
    "aquasec/kube-bench:latest".to_owned()
}

/// The default grace window before a finished workload is auto-cleaned, in seconds
fn default_ttl_seconds_after_finished() -> i32 {
    600
}

/// Settings for the Postgres-backed Task Store
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Database {
    /// The host to connect to
    pub host: String,
    /// The port to connect to
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    /// The user to authenticate as
    pub user: String,
    /// The password to authenticate with
    pub password: String,
    /// The database name to connect to
    pub dbname: String,
    /// The maximum number of pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_postgres_port() -> u16 {
    5432
}

/// Settings for how the supervisor polls and times out node-tasks
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Supervisor {
    /// How long to sleep between ticks, in seconds
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// How long a node-task may remain `pending` before being failed out, in seconds
    #[serde(default = "default_pending_timeout_secs")]
    pub pending_timeout_secs: u64,
    /// How many attempts the launcher makes to find a workload's pod
    #[serde(default = "default_pod_poll_attempts")]
    pub pod_poll_attempts: u32,
    /// The delay between pod-poll attempts, in seconds
    #[serde(default = "default_pod_poll_delay_secs")]
    pub pod_poll_delay_secs: u64,
    /// How long `Delete` waits for a supervisor to exit before proceeding anyway
    #[serde(default = "default_delete_join_secs")]
    pub delete_join_secs: u64,
}

impl Default for Supervisor {
    fn default() -> Self {
        Supervisor {
            tick_secs: default_tick_secs(),
            pending_timeout_secs: default_pending_timeout_secs(),
            pod_poll_attempts: default_pod_poll_attempts(),
            pod_poll_delay_secs: default_pod_poll_delay_secs(),
            delete_join_secs: default_delete_join_secs(),
        }
    }
}

/// Settings for talking to cluster control planes
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct K8s {
    /// The benchmark image to use when a `Start` call does not override it
    #[serde(default = "default_benchmark_image")]
    pub default_image: String,
    /// Whether to verify the control plane's TLS certificate by default
    ///
    /// The source this engine was modeled on disables verification
    /// unconditionally; this engine makes it configurable and defaults to
    /// off only for backwards compatibility with that behavior. New
    /// deployments should set this to `true`. See DESIGN.md.
    #[serde(default = "default_false")]
    pub accept_invalid_certs: bool,
    /// The grace window before a finished workload is auto-cleaned, in seconds
    #[serde(default = "default_ttl_seconds_after_finished")]
    pub ttl_seconds_after_finished: i32,
}

impl Default for K8s {
    fn default() -> Self {
        K8s {
            default_image: default_benchmark_image(),
            accept_invalid_certs: default_false(),
            ttl_seconds_after_finished: default_ttl_seconds_after_finished(),
        }
    }
}

/// The log level to emit traces at
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// Settings for where/how to emit logs
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Tracing {
    /// The level to log at
    #[serde(default)]
    pub level: LogLevel,
    /// Whether to emit logs as JSON instead of the default human-readable format
    #[serde(default = "default_false")]
    pub json: bool,
}

impl Default for Tracing {
    fn default() -> Self {
        Tracing {
            level: LogLevel::default(),
            json: default_false(),
        }
    }
}

/// The top level config for the scan lifecycle engine
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Conf {
    /// Postgres settings
    pub database: Database,
    /// Supervisor tuning settings
    #[serde(default)]
    pub supervisor: Supervisor,
    /// Cluster control plane settings
    #[serde(default)]
    pub k8s: K8s,
    /// Logging settings
    #[serde(default)]
    pub tracing: Tracing,
}

impl Conf {
    /// Load the engine config from a YAML file, overlaying any
    /// `SCANENGINE__`-prefixed environment variables on top
    ///
    /// # Arguments
    ///
    /// * `path` - The path to load the config file from
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let conf: Conf = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).format(config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix("scanengine")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(conf)
    }
}
