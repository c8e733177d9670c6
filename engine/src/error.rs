//! The error type for the scan lifecycle engine

use std::fmt;

/// An error surfaced by the scan lifecycle engine
#[derive(Debug)]
pub enum Error {
    /// The requested cluster does not exist in the store
    ClusterNotFound(String),
    /// No node-task was successfully launched for a `Start` call
    PlanEmpty,
    /// The cluster control plane was unreachable or rejected our credentials
    TransportError(String),
    /// A generic error with a message
    Generic(String),
    /// An error from the Kubernetes client
    K8s(kube::Error),
    /// An error building a Kubernetes client config
    K8sConfig(String),
    /// An error talking to Postgres
    Postgres(tokio_postgres::Error),
    /// An error checking out a pooled Postgres connection
    Pool(deadpool_postgres::PoolError),
    /// An error converting a value with serde
    Serde(serde_json::Error),
    /// An error from parsing or generating a uuid
    Uuid(uuid::Error),
    /// An error loading the engine config
    Config(config::ConfigError),
    /// An error joining a tokio task
    JoinError(tokio::task::JoinError),
}

impl Error {
    /// Create a new generic error
    ///
    /// # Arguments
    ///
    /// * `msg` - The error message to set
    pub fn new<T: Into<String>>(msg: T) -> Self {
        Error::Generic(msg.into())
    }

    /// Get this error's kind as a str, used for structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ClusterNotFound(_) => "ClusterNotFound",
            Error::PlanEmpty => "PlanEmpty",
            Error::TransportError(_) => "TransportError",
            Error::Generic(_) => "Generic",
            Error::K8s(_) => "K8s",
            Error::K8sConfig(_) => "K8sConfig",
            Error::Postgres(_) => "Postgres",
            Error::Pool(_) => "Pool",
            Error::Serde(_) => "Serde",
            Error::Uuid(_) => "Uuid",
            Error::Config(_) => "Config",
            Error::JoinError(_) => "JoinError",
        }
    }

    /// True if this error should be treated as a transport failure when
    /// talking to a cluster's control plane (supervisor: fail the node-task
    /// and move on rather than retry within this tick)
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::TransportError(_) | Error::K8s(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ClusterNotFound(id) => write!(f, "cluster not found: {id}"),
            Error::PlanEmpty => write!(f, "no node-tasks were launched"),
            Error::TransportError(msg) => write!(f, "transport error: {msg}"),
            Error::Generic(msg) => write!(f, "{msg}"),
            Error::K8s(err) => write!(f, "k8s error: {err}"),
            Error::K8sConfig(msg) => write!(f, "k8s config error: {msg}"),
            Error::Postgres(err) => write!(f, "postgres error: {err}"),
            Error::Pool(err) => write!(f, "postgres pool error: {err}"),
            Error::Serde(err) => write!(f, "serde error: {err}"),
            Error::Uuid(err) => write!(f, "uuid error: {err}"),
            Error::Config(err) => write!(f, "config error: {err}"),
            Error::JoinError(err) => write!(f, "task join error: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        Error::K8s(error)
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(error: tokio_postgres::Error) -> Self {
        Error::Postgres(error)
    }
}

impl From<deadpool_postgres::PoolError> for Error {
    fn from(error: deadpool_postgres::PoolError) -> Self {
        Error::Pool(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serde(error)
    }
}

impl From<uuid::Error> for Error {
    fn from(error: uuid::Error) -> Self {
        Error::Uuid(error)
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Error::Config(error)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(error: tokio::task::JoinError) -> Self {
        Error::JoinError(error)
    }
}
