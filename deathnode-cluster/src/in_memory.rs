use std::collections::HashMap;

use async_trait::async_trait;
use deathnode_core::cluster_view::{Agent, Framework, Task};
use tokio::sync::RwLock;

use crate::{ClusterClient, Error};

/// In-process cluster-manager double used by tests and end-to-end
/// scenarios. Same role as `deathnode_cloud::InMemoryCloudClient`.
#[derive(Default)]
pub struct InMemoryClusterClient {
    agents: RwLock<Vec<Agent>>,
    frameworks: RwLock<Vec<Framework>>,
    tasks: RwLock<Vec<Task>>,
    maintenance: RwLock<HashMap<String, String>>,
}

impl InMemoryClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_agents(&self, agents: Vec<Agent>) {
        *self.agents.write().await = agents;
    }

    pub async fn set_frameworks(&self, frameworks: Vec<Framework>) {
        *self.frameworks.write().await = frameworks;
    }

    pub async fn set_tasks(&self, tasks: Vec<Task>) {
        *self.tasks.write().await = tasks;
    }

    pub async fn maintenance_schedule(&self) -> HashMap<String, String> {
        self.maintenance.read().await.clone()
    }
}

#[async_trait]
impl ClusterClient for InMemoryClusterClient {
    async fn get_agents(&self) -> Result<Vec<Agent>, Error> {
        Ok(self.agents.read().await.clone())
    }

    async fn get_frameworks(&self) -> Result<Vec<Framework>, Error> {
        Ok(self.frameworks.read().await.clone())
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, Error> {
        Ok(self
            .tasks
            .read()
            .await
            .iter()
            .filter(|task| task.state == "TASK_RUNNING")
            .cloned()
            .collect())
    }

    async fn set_agents_in_maintenance(
        &self,
        hosts: &HashMap<String, String>,
    ) -> Result<(), Error> {
        *self.maintenance.write().await = hosts.clone();
        Ok(())
    }
}
