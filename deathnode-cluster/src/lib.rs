use std::collections::HashMap;

use async_trait::async_trait;
use deathnode_core::cluster_view::{Agent, Framework, Task};
use enum_dispatch::enum_dispatch;
use snafu::Snafu;

pub mod http;
pub mod in_memory;

pub use http::HttpClusterClient;
pub use in_memory::InMemoryClusterClient;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("cluster-manager request to {url:?} failed"))]
    Request {
        url: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[snafu(display("cluster-manager response from {url:?} could not be parsed: {reason}"))]
    MalformedResponse { url: String, reason: String },
}

/// Typed wrapper over the cluster-manager's read APIs and maintenance API.
/// Out of scope as business logic, same as [`deathnode_cloud::CloudClient`].
///
/// Frameworks and tasks are returned unfiltered by `protected_frameworks` /
/// `protected_task_labels`: that filtering is config-dependent business logic
/// that belongs to `ClusterView`, not this client.
#[async_trait]
#[enum_dispatch(ClusterClientImplementation)]
pub trait ClusterClient {
    /// All agents, with the private IP already extracted from the pid field.
    async fn get_agents(&self) -> Result<Vec<Agent>, Error>;

    /// All registered frameworks.
    async fn get_frameworks(&self) -> Result<Vec<Framework>, Error>;

    /// Only tasks in the `RUNNING` state. Paginated internally.
    /// `is_protected` is left `false`; it is recomputed by `ClusterView` once
    /// `protected_task_labels` is available.
    async fn get_tasks(&self) -> Result<Vec<Task>, Error>;

    /// Replaces the whole maintenance window with the given hosts, keyed by
    /// hostname with the private IP as value. Idempotent.
    async fn set_agents_in_maintenance(
        &self,
        hosts: &HashMap<String, String>,
    ) -> Result<(), Error>;
}

#[enum_dispatch]
pub enum ClusterClientImplementation {
    Http(HttpClusterClient),
    InMemory(InMemoryClusterClient),
}
