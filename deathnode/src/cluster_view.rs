use std::collections::HashMap;
use std::sync::Arc;

use deathnode_cluster::{ClusterClient, ClusterClientImplementation};
use deathnode_core::cluster_view::{ClusterSnapshot, Task};
use regex::Regex;
use tracing::instrument;

/// Indexed read-only snapshot of the cluster manager. Grounded on
/// `original_source/monitor/mesos.go`'s `mesosCache` three-map shape;
/// replacement is atomic (a whole new `ClusterSnapshot` swapped in at once)
/// so a reader never observes a torn mix of old and new maps.
pub struct ClusterView {
    cluster: Arc<ClusterClientImplementation>,
    protected_frameworks: Vec<String>,
    protected_task_labels: Vec<String>,
    snapshot: ClusterSnapshot,
}

impl ClusterView {
    pub fn new(
        cluster: Arc<ClusterClientImplementation>,
        protected_frameworks: Vec<String>,
        protected_task_labels: Vec<String>,
    ) -> Self {
        Self {
            cluster,
            protected_frameworks,
            protected_task_labels,
            snapshot: ClusterSnapshot::default(),
        }
    }

    /// Pulls frameworks, agents, tasks and atomically replaces the prior
    /// snapshot. A failure on any call leaves the prior snapshot intact and
    /// only emits a warning; it never propagates.
    #[instrument(skip(self))]
    pub async fn refresh(&mut self) {
        let frameworks = match self.cluster.get_frameworks().await {
            Ok(frameworks) => frameworks,
            Err(source) => {
                tracing::warn!(%source, "failed to refresh frameworks, keeping prior snapshot");
                return;
            }
        };
        let agents = match self.cluster.get_agents().await {
            Ok(agents) => agents,
            Err(source) => {
                tracing::warn!(%source, "failed to refresh agents, keeping prior snapshot");
                return;
            }
        };
        let tasks = match self.cluster.get_tasks().await {
            Ok(tasks) => tasks,
            Err(source) => {
                tracing::warn!(%source, "failed to refresh tasks, keeping prior snapshot");
                return;
            }
        };

        let frameworks = frameworks
            .into_iter()
            .filter(|framework| self.protected_frameworks.iter().any(|name| name == &framework.name))
            .map(|framework| (framework.framework_id.clone(), framework))
            .collect();

        let agents = agents
            .into_iter()
            .map(|agent| (agent.private_ip.clone(), agent))
            .collect();

        let mut tasks_by_agent: HashMap<String, Vec<Task>> = HashMap::new();
        for mut task in tasks {
            task.is_protected = Task::compute_is_protected(&task.labels, &self.protected_task_labels);
            tasks_by_agent.entry(task.agent_id.clone()).or_default().push(task);
        }

        self.snapshot = ClusterSnapshot {
            tasks: tasks_by_agent,
            frameworks,
            agents,
        };
    }

    fn agent_id_for_ip(&self, ip: &str) -> Option<&str> {
        self.snapshot
            .agents
            .get(ip)
            .map(|agent| agent.agent_id.as_str())
    }

    fn tasks_on(&self, ip: &str) -> &[Task] {
        self.agent_id_for_ip(ip)
            .and_then(|agent_id| self.snapshot.tasks.get(agent_id))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// True iff the agent at `ip` runs at least one task that is either in a
    /// protected framework or carries a protected label set to truthy.
    pub fn is_protected(&self, ip: &str) -> bool {
        self.tasks_on(ip).iter().any(|task| {
            task.is_protected || self.snapshot.frameworks.contains_key(&task.framework_id)
        })
    }

    /// True iff the agent at `ip` runs any task in a framework named exactly
    /// `framework_name`.
    pub fn has_framework(&self, ip: &str, framework_name: &str) -> bool {
        self.tasks_on(ip).iter().any(|task| {
            self.snapshot
                .frameworks
                .get(&task.framework_id)
                .is_some_and(|framework| framework.name == framework_name)
        })
    }

    /// True iff any task name on the agent at `ip` matches `regex`.
    pub fn has_task_matching(&self, ip: &str, regex: &Regex) -> bool {
        self.tasks_on(ip).iter().any(|task| regex.is_match(&task.name))
    }

    /// Forwards to the cluster client; idempotent.
    pub async fn set_agents_in_maintenance(
        &self,
        hosts: &HashMap<String, String>,
    ) -> Result<(), deathnode_cluster::Error> {
        self.cluster.set_agents_in_maintenance(hosts).await
    }
}

#[cfg(test)]
mod tests {
    use deathnode_cluster::InMemoryClusterClient;
    use deathnode_core::cluster_view::{Agent, Framework, Label, Task};

    use super::*;

    fn agent(ip: &str) -> Agent {
        Agent {
            agent_id: format!("agent-{ip}"),
            hostname: format!("host-{ip}"),
            private_ip: ip.to_string(),
        }
    }

    fn task(agent_id: &str, framework_id: &str, name: &str, labels: Vec<Label>) -> Task {
        Task {
            name: name.to_string(),
            state: "TASK_RUNNING".to_string(),
            agent_id: agent_id.to_string(),
            framework_id: framework_id.to_string(),
            labels,
            is_protected: false,
        }
    }

    async fn view_with(
        agents: Vec<Agent>,
        frameworks: Vec<Framework>,
        tasks: Vec<Task>,
        protected_frameworks: Vec<String>,
        protected_task_labels: Vec<String>,
    ) -> ClusterView {
        let cluster = InMemoryClusterClient::new();
        cluster.set_agents(agents).await;
        cluster.set_frameworks(frameworks).await;
        cluster.set_tasks(tasks).await;

        let cluster = Arc::new(ClusterClientImplementation::InMemory(cluster));
        let mut view = ClusterView::new(cluster, protected_frameworks, protected_task_labels);
        view.refresh().await;
        view
    }

    #[tokio::test]
    async fn agent_running_protected_framework_task_is_protected() {
        let view = view_with(
            vec![agent("10.0.0.1")],
            vec![Framework {
                framework_id: "fw-1".into(),
                name: "marathon".into(),
            }],
            vec![task("agent-10.0.0.1", "fw-1", "app", vec![])],
            vec!["marathon".into()],
            vec![],
        )
        .await;

        assert!(view.is_protected("10.0.0.1"));
        assert!(view.has_framework("10.0.0.1", "marathon"));
        assert!(!view.has_framework("10.0.0.1", "chronos"));
    }

    #[tokio::test]
    async fn agent_running_protected_label_task_is_protected() {
        let label = Label {
            key: "role".into(),
            value: "true".into(),
        };
        let view = view_with(
            vec![agent("10.0.0.2")],
            vec![],
            vec![task("agent-10.0.0.2", "fw-unprotected", "app", vec![label])],
            vec![],
            vec!["role".into()],
        )
        .await;

        assert!(view.is_protected("10.0.0.2"));
    }

    #[tokio::test]
    async fn agent_with_no_protected_tasks_is_unprotected() {
        let view = view_with(
            vec![agent("10.0.0.3")],
            vec![],
            vec![task("agent-10.0.0.3", "fw-unprotected", "app", vec![])],
            vec![],
            vec![],
        )
        .await;

        assert!(!view.is_protected("10.0.0.3"));
    }

    #[tokio::test]
    async fn unknown_ip_is_unprotected() {
        let view = view_with(vec![], vec![], vec![], vec![], vec![]).await;
        assert!(!view.is_protected("10.0.0.9"));
    }

    #[tokio::test]
    async fn has_task_matching_uses_regex() {
        let view = view_with(
            vec![agent("10.0.0.4")],
            vec![],
            vec![task("agent-10.0.0.4", "fw-1", "worker-7", vec![])],
            vec![],
            vec![],
        )
        .await;

        let regex = Regex::new("^worker-[0-9]+$").unwrap();
        assert!(view.has_task_matching("10.0.0.4", &regex));

        let other = Regex::new("^scheduler-").unwrap();
        assert!(!view.has_task_matching("10.0.0.4", &other));
    }
}
