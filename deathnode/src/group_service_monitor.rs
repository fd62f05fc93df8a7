use std::collections::HashMap;
use std::sync::Arc;

use deathnode_cloud::{CloudClient, CloudClientImplementation};
use deathnode_core::{GroupName, GroupPrefix, InstanceId};
use snafu::Snafu;
use tracing::instrument;

use crate::clock::Clock;
use crate::group_monitor::GroupMonitor;
use crate::instance_monitor::InstanceMonitor;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("instance {instance_id:?} is not under any monitored group"))]
    InstanceNotFound { instance_id: InstanceId },
}

/// Set of GroupMonitors indexed by configured prefix; discovers new groups.
/// Grounded on
/// `original_source/monitor/autoscaling.go`'s `AutoscalingServiceMonitor`.
pub struct GroupServiceMonitor {
    prefixes: Vec<GroupPrefix>,
    groups: HashMap<GroupPrefix, HashMap<GroupName, GroupMonitor>>,
    cloud: Arc<CloudClientImplementation>,
    deathnode_mark: String,
    lifecycle_hook_timeout_seconds: u64,
}

impl GroupServiceMonitor {
    pub fn new(
        prefixes: Vec<GroupPrefix>,
        cloud: Arc<CloudClientImplementation>,
        deathnode_mark: String,
        lifecycle_hook_timeout_seconds: u64,
    ) -> Self {
        let groups = prefixes
            .iter()
            .cloned()
            .map(|prefix| (prefix, HashMap::new()))
            .collect();

        Self {
            prefixes,
            groups,
            cloud,
            deathnode_mark,
            lifecycle_hook_timeout_seconds,
        }
    }

    /// Prefix buckets are independent; a failure on one does not abort the
    /// others.
    #[instrument(skip(self, clock))]
    pub async fn refresh(&mut self, clock: &dyn Clock) {
        for prefix in self.prefixes.clone() {
            if let Err(source) = self.refresh_prefix(&prefix, clock).await {
                tracing::warn!(%source, %prefix, "failed to refresh group prefix");
            }
        }
    }

    async fn refresh_prefix(
        &mut self,
        prefix: &GroupPrefix,
        clock: &dyn Clock,
    ) -> Result<(), deathnode_cloud::Error> {
        let snapshots = self.cloud.describe_groups_by_prefix(prefix).await?;

        let bucket = self
            .groups
            .entry(prefix.clone())
            .or_insert_with(HashMap::new);

        for snapshot in &snapshots {
            if !bucket.contains_key(&snapshot.group_name) {
                match self.cloud.has_lifecycle_hook(&snapshot.group_name).await {
                    Ok(true) => {}
                    Ok(false) => {
                        if let Err(source) = self
                            .cloud
                            .put_lifecycle_hook(
                                &snapshot.group_name,
                                self.lifecycle_hook_timeout_seconds,
                            )
                            .await
                        {
                            tracing::warn!(%source, group = %snapshot.group_name, "failed to install lifecycle hook");
                        }
                    }
                    Err(source) => {
                        tracing::warn!(%source, group = %snapshot.group_name, "failed to check lifecycle hook presence");
                    }
                }

                bucket.insert(
                    snapshot.group_name.clone(),
                    GroupMonitor::new(
                        snapshot.group_name.clone(),
                        prefix.clone(),
                        Arc::clone(&self.cloud),
                        self.deathnode_mark.clone(),
                    ),
                );
            }
        }

        let present: std::collections::HashSet<&GroupName> =
            snapshots.iter().map(|s| &s.group_name).collect();
        bucket.retain(|name, _| present.contains(name));

        for snapshot in &snapshots {
            if let Some(group) = bucket.get_mut(&snapshot.group_name) {
                group.refresh(snapshot, clock).await;
            }
        }

        Ok(())
    }

    /// Linear lookup across all buckets.
    pub fn get_instance_by_id(
        &mut self,
        instance_id: &InstanceId,
    ) -> Result<(&GroupName, &mut InstanceMonitor), Error> {
        for group in self.groups.values_mut().flat_map(|bucket| bucket.values_mut()) {
            if let Some(monitor) = group.get_instance_monitor_mut(instance_id) {
                return Ok((&group.group_name, monitor));
            }
        }
        InstanceNotFoundSnafu {
            instance_id: instance_id.clone(),
        }
        .fail()
    }

    pub fn groups(&mut self) -> impl Iterator<Item = &mut GroupMonitor> {
        self.groups.values_mut().flat_map(|bucket| bucket.values_mut())
    }

    pub fn group_count(&self) -> usize {
        self.groups.values().map(HashMap::len).sum()
    }
}
