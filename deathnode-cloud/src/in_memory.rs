use std::collections::HashMap;

use async_trait::async_trait;
use deathnode_core::{GroupName, InstanceId};
use tokio::sync::RwLock;

use crate::{CloudClient, CloudGroupSnapshot, CloudInstanceSnapshot, Error};

/// In-process cloud double used by tests and end-to-end scenarios.
/// State lives behind an `RwLock` the same way
/// `trino-lb-persistence::InMemoryPersistence` backs its maps, since this
/// plays the same "lightweight built-in backend" role.
#[derive(Default)]
pub struct InMemoryCloudClient {
    groups: RwLock<HashMap<GroupName, CloudGroupSnapshot>>,
    instances: RwLock<HashMap<InstanceId, CloudInstanceSnapshot>>,
    lifecycle_hooks: RwLock<HashMap<GroupName, u64>>,
    tags: RwLock<HashMap<InstanceId, HashMap<String, String>>>,
    heartbeats: RwLock<Vec<InstanceId>>,
}

impl InMemoryCloudClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_group(&self, group: CloudGroupSnapshot) {
        self.groups
            .write()
            .await
            .insert(group.group_name.clone(), group);
    }

    pub async fn seed_instance(&self, instance: CloudInstanceSnapshot) {
        self.instances
            .write()
            .await
            .insert(instance.instance_id.clone(), instance);
    }

    pub async fn set_lifecycle_state(&self, instance_id: &InstanceId, state: deathnode_core::instance::LifecycleState) {
        if let Some(instance) = self.instances.write().await.get_mut(instance_id) {
            instance.lifecycle_state = state;
        }
    }

    pub async fn completed_lifecycle_actions(&self) -> Vec<InstanceId> {
        self.instances
            .read()
            .await
            .values()
            .filter(|i| matches!(i.lifecycle_state, deathnode_core::instance::LifecycleState::Other(ref s) if s == "Terminated"))
            .map(|i| i.instance_id.clone())
            .collect()
    }

    /// Simulates the cloud no longer reporting a group, e.g. for an
    /// end-to-end test of a group disappearing between ticks.
    pub async fn remove_group(&self, group_name: &str) {
        self.groups.write().await.remove(group_name);
    }

    pub async fn heartbeats_recorded(&self) -> Vec<InstanceId> {
        self.heartbeats.read().await.clone()
    }
}

#[async_trait]
impl CloudClient for InMemoryCloudClient {
    async fn describe_groups_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<CloudGroupSnapshot>, Error> {
        Ok(self
            .groups
            .read()
            .await
            .values()
            .filter(|group| group.group_name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn describe_instance_by_id(
        &self,
        instance_id: &InstanceId,
    ) -> Result<CloudInstanceSnapshot, Error> {
        let mut snapshot = self
            .instances
            .read()
            .await
            .get(instance_id)
            .cloned()
            .ok_or_else(|| Error::InstanceNotFound {
                instance_id: instance_id.clone(),
            })?;

        if let Some(tags) = self.tags.read().await.get(instance_id) {
            snapshot.tags = tags.clone();
        }

        Ok(snapshot)
    }

    async fn describe_instances_by_tag(
        &self,
        key: &str,
    ) -> Result<Vec<CloudInstanceSnapshot>, Error> {
        let tags = self.tags.read().await;
        let instances = self.instances.read().await;

        Ok(tags
            .iter()
            .filter(|(_, tags)| tags.contains_key(key))
            .filter_map(|(instance_id, tags)| {
                instances.get(instance_id).map(|instance| {
                    let mut instance = instance.clone();
                    instance.tags = tags.clone();
                    instance
                })
            })
            .collect())
    }

    async fn set_asg_instance_protection(
        &self,
        _group: &GroupName,
        instance_ids: &[InstanceId],
    ) -> Result<(), Error> {
        let mut instances = self.instances.write().await;
        for instance_id in instance_ids {
            if let Some(instance) = instances.get_mut(instance_id) {
                instance.is_protected = true;
            }
        }
        Ok(())
    }

    async fn remove_asg_instance_protection(
        &self,
        _group: &GroupName,
        instance_id: &InstanceId,
    ) -> Result<(), Error> {
        if let Some(instance) = self.instances.write().await.get_mut(instance_id) {
            instance.is_protected = false;
        }
        Ok(())
    }

    async fn set_instance_tag(
        &self,
        key: &str,
        value: &str,
        instance_id: &InstanceId,
    ) -> Result<(), Error> {
        self.tags
            .write()
            .await
            .entry(instance_id.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn has_lifecycle_hook(&self, group: &GroupName) -> Result<bool, Error> {
        Ok(self.lifecycle_hooks.read().await.contains_key(group))
    }

    async fn put_lifecycle_hook(
        &self,
        group: &GroupName,
        timeout_seconds: u64,
    ) -> Result<(), Error> {
        self.lifecycle_hooks
            .write()
            .await
            .insert(group.clone(), timeout_seconds);
        Ok(())
    }

    async fn complete_lifecycle_action(
        &self,
        _group: &GroupName,
        instance_id: &InstanceId,
    ) -> Result<(), Error> {
        if let Some(instance) = self.instances.write().await.get_mut(instance_id) {
            instance.lifecycle_state =
                deathnode_core::instance::LifecycleState::Other("Terminated".to_string());
        }
        Ok(())
    }

    async fn record_lifecycle_action_heartbeat(
        &self,
        _group: &GroupName,
        instance_id: &InstanceId,
    ) -> Result<(), Error> {
        self.heartbeats.write().await.push(instance_id.clone());
        Ok(())
    }
}
