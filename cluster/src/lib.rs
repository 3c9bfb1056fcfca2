use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Kubeconfig error: {source}")]
    Kubeconfig {
        #[from]
        source: kube::config::KubeconfigError,
    },

    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("exec failed: {0}")]
    Exec(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// True for failures a caller may retry: transport problems, closed
    /// streams, server-side hiccups. Conversion and input errors are not
    /// transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Kube { .. } | Error::Unreachable(_) | Error::Exec(_))
    }
}

pub mod analyze;
pub mod client;
pub mod convert;
pub mod crd_watch;
pub mod probe;
pub mod quantity;
pub mod watch;

pub use client::ClusterClient;
pub use watch::EventHandler;
