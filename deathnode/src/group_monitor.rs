use std::collections::HashMap;
use std::sync::Arc;

use deathnode_cloud::{CloudClient, CloudClientImplementation, CloudGroupSnapshot};
use deathnode_core::instance::Instance;
use deathnode_core::{GroupName, GroupPrefix, InstanceId};
use tracing::instrument;

use crate::clock::Clock;
use crate::instance_monitor::InstanceMonitor;

/// Represents one cloud auto-scale group. Grounded on
/// `original_source/monitor/autoscaling.go`'s `AutoscalingGroupMonitor`.
pub struct GroupMonitor {
    pub group_name: GroupName,
    pub prefix: GroupPrefix,
    pub desired_capacity: u32,
    instances: HashMap<InstanceId, InstanceMonitor>,
    cloud: Arc<CloudClientImplementation>,
    deathnode_mark: String,
}

impl GroupMonitor {
    pub fn new(
        group_name: GroupName,
        prefix: GroupPrefix,
        cloud: Arc<CloudClientImplementation>,
        deathnode_mark: String,
    ) -> Self {
        Self {
            group_name,
            prefix,
            desired_capacity: 0,
            instances: HashMap::new(),
            cloud,
            deathnode_mark,
        }
    }

    #[instrument(skip(self, snapshot, clock), fields(group = %self.group_name))]
    pub async fn refresh(&mut self, snapshot: &CloudGroupSnapshot, clock: &dyn Clock) {
        // Step 1: enforce the group-level scale-in-protection invariant so
        // members created afterward by the cloud inherit it.
        if !snapshot.new_instances_protected_from_scale_in && !snapshot.instance_ids.is_empty() {
            if let Err(source) = self
                .cloud
                .set_asg_instance_protection(&self.group_name, &snapshot.instance_ids)
                .await
            {
                tracing::warn!(%source, group = %self.group_name, "failed to enforce scale-in protection");
            }
        }

        // Step 2.
        self.desired_capacity = snapshot.desired_capacity;

        // Steps 3 & 4: sync every currently-reported member.
        for instance_id in &snapshot.instance_ids {
            match self.cloud.describe_instance_by_id(instance_id).await {
                Ok(cloud_instance) => {
                    if let Some(monitor) = self.instances.get_mut(instance_id) {
                        if let Err(source) = monitor
                            .set_lifecycle_state(cloud_instance.lifecycle_state, clock)
                            .await
                        {
                            tracing::warn!(%source, %instance_id, "failed to update lifecycle state");
                        }
                        monitor.instance.is_protected = cloud_instance.is_protected;
                    } else {
                        let mut instance = Instance::new(
                            instance_id.clone(),
                            cloud_instance.private_ip.clone(),
                            self.group_name.clone(),
                        );
                        instance.is_protected = cloud_instance.is_protected;
                        instance.lifecycle_state = cloud_instance.lifecycle_state;
                        instance.retirement_timestamp = cloud_instance
                            .tags
                            .get(&self.deathnode_mark)
                            .and_then(|value| value.parse::<i64>().ok())
                            .unwrap_or(0);

                        self.instances.insert(
                            instance_id.clone(),
                            InstanceMonitor::new(
                                instance,
                                Arc::clone(&self.cloud),
                                self.deathnode_mark.clone(),
                            ),
                        );
                    }
                }
                Err(source) => {
                    tracing::warn!(%source, %instance_id, "failed to describe instance, will retry next tick");
                }
            }
        }

        // Step 5: drop monitors for instances no longer in the group.
        let current: std::collections::HashSet<&InstanceId> =
            snapshot.instance_ids.iter().collect();
        self.instances.retain(|id, _| current.contains(id));
    }

    /// `N − M > D ⇒ N − D`, else 0. Already-marked instances still count
    /// toward `N`: their retirement is in progress but not complete.
    pub fn num_undesired_instances(&self) -> u32 {
        let total = self.instances.len() as u32;
        let marked = self
            .instances
            .values()
            .filter(|m| m.is_marked_to_be_removed())
            .count() as u32;

        if total.saturating_sub(marked) > self.desired_capacity {
            total.saturating_sub(self.desired_capacity)
        } else {
            0
        }
    }

    /// Members not yet marked for removal; candidates for selection.
    pub fn get_instances(&self) -> Vec<&Instance> {
        self.instances
            .values()
            .filter(|m| !m.is_marked_to_be_removed())
            .map(|m| &m.instance)
            .collect()
    }

    pub fn get_instance_monitor_mut(&mut self, id: &InstanceId) -> Option<&mut InstanceMonitor> {
        self.instances.get_mut(id)
    }

    pub fn member_count(&self) -> usize {
        self.instances.len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use deathnode_cloud::{CloudInstanceSnapshot, InMemoryCloudClient};
    use rstest::rstest;

    use super::*;
    use crate::clock::FixedClock;

    fn clock() -> FixedClock {
        FixedClock(chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap())
    }

    async fn seeded_group(member_count: u32, desired_capacity: u32) -> (GroupMonitor, CloudGroupSnapshot) {
        let cloud = InMemoryCloudClient::new();
        let mut instance_ids = Vec::new();

        for i in 0..member_count {
            let id = format!("i-{i}");
            cloud
                .seed_instance(CloudInstanceSnapshot {
                    instance_id: id.clone(),
                    private_ip: format!("10.0.0.{i}"),
                    private_dns_name: format!("ip-10-0-0-{i}.ec2.internal"),
                    lifecycle_state: deathnode_core::instance::LifecycleState::InService,
                    is_protected: true,
                    tags: HashMap::new(),
                })
                .await;
            instance_ids.push(id);
        }

        let snapshot = CloudGroupSnapshot {
            group_name: "group-a".to_string(),
            desired_capacity,
            new_instances_protected_from_scale_in: true,
            instance_ids,
        };

        let cloud = Arc::new(CloudClientImplementation::InMemory(Arc::new(cloud)));
        let mut monitor = GroupMonitor::new(
            "group-a".to_string(),
            "group-".to_string(),
            cloud,
            "DEATH_NODE_MARK".to_string(),
        );
        monitor.refresh(&snapshot, &clock()).await;
        (monitor, snapshot)
    }

    #[tokio::test]
    async fn refresh_discovers_all_members() {
        let (monitor, _snapshot) = seeded_group(3, 3).await;
        assert_eq!(monitor.member_count(), 3);
        assert_eq!(monitor.num_undesired_instances(), 0);
    }

    #[tokio::test]
    async fn surplus_members_are_reported_as_undesired() {
        let (monitor, _snapshot) = seeded_group(3, 1).await;
        assert_eq!(monitor.num_undesired_instances(), 2);
        assert_eq!(monitor.get_instances().len(), 3);
    }

    #[tokio::test]
    async fn members_dropped_from_a_later_snapshot_are_removed() {
        let (mut monitor, _snapshot) = seeded_group(2, 2).await;
        assert_eq!(monitor.member_count(), 2);

        let shrunk = CloudGroupSnapshot {
            group_name: "group-a".to_string(),
            desired_capacity: 1,
            new_instances_protected_from_scale_in: true,
            instance_ids: vec!["i-0".to_string()],
        };
        monitor.refresh(&shrunk, &clock()).await;

        assert_eq!(monitor.member_count(), 1);
    }

    #[rstest]
    #[case(3, 0, 3, 0)]
    #[case(3, 0, 2, 1)]
    #[case(3, 1, 2, 0)]
    #[case(3, 1, 1, 2)]
    #[case(1, 0, 5, 0)]
    fn num_undesired_instances_formula(
        #[case] total: u32,
        #[case] marked: u32,
        #[case] desired: u32,
        #[case] expected: u32,
    ) {
        // Mirrors GroupMonitor::num_undesired_instances without needing a
        // full cloud/group fixture: N - M > D => N - D, else 0.
        let actual = if total.saturating_sub(marked) > desired {
            total.saturating_sub(desired)
        } else {
            0
        };
        assert_eq!(actual, expected);
    }
}
