use std::collections::HashMap;

use snafu::{OptionExt, Snafu};

use crate::{AgentId, FrameworkId};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("agent pid {pid:?} does not contain an '@'"))]
    PidMissingAt { pid: String },

    #[snafu(display("agent pid {pid:?} has no ':' after the '@'"))]
    PidMissingPort { pid: String },
}

/// A label attached to a task by the cluster manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Label {
    pub key: String,
    pub value: String,
}

/// A workload owner registered with the cluster manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Framework {
    pub framework_id: FrameworkId,
    pub name: String,
}

/// A running unit of work on an agent.
///
/// `is_protected` is computed once at ingest from `labels` (see
/// [`Task::compute_is_protected`]) and cached rather than recomputed on
/// every lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    pub state: String,
    pub agent_id: AgentId,
    pub framework_id: FrameworkId,
    pub labels: Vec<Label>,
    pub is_protected: bool,
}

impl Task {
    /// A task is protected iff any label has a key in `protected_task_labels`
    /// and a value that, uppercased, equals `"TRUE"`. Key comparison is
    /// case-sensitive; value comparison is not.
    pub fn compute_is_protected(labels: &[Label], protected_task_labels: &[String]) -> bool {
        labels.iter().any(|label| {
            protected_task_labels.iter().any(|key| key == &label.key)
                && label.value.to_uppercase() == "TRUE"
        })
    }
}

/// A worker node in the cluster manager, keyed by the private IP extracted
/// from its pid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Agent {
    pub agent_id: AgentId,
    pub hostname: String,
    pub private_ip: String,
}

/// The cluster manager reports each agent's pid as `name@ip:port`; the IP is
/// the substring between `@` and the following `:`.
pub fn extract_ip_from_pid(pid: &str) -> Result<String, Error> {
    let after_at = pid.split_once('@').context(PidMissingAtSnafu { pid })?.1;
    let ip = after_at
        .split_once(':')
        .context(PidMissingPortSnafu { pid })?
        .0;
    Ok(ip.to_string())
}


/// Read-only, atomically-replaced cache of the cluster manager's state.
///
/// Owns its three maps exclusively; `refresh` in the binary crate replaces
/// all three at once so readers never observe a torn snapshot.
#[derive(Clone, Debug, Default)]
pub struct ClusterSnapshot {
    pub tasks: HashMap<AgentId, Vec<Task>>,
    pub frameworks: HashMap<FrameworkId, Framework>,
    pub agents: HashMap<String, Agent>,
}
