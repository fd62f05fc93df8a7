use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use deathnode_cloud::{CloudClient, CloudClientImplementation};
use deathnode_core::instance::LifecycleState;
use tracing::instrument;

use crate::cluster_view::ClusterView;
use crate::clock::Clock;
use crate::group_service_monitor::GroupServiceMonitor;

/// Reconciles marked-for-removal instances toward termination.
/// Grounded on `original_source/deathnode/notebook.go`'s `Notebook`.
pub struct Notebook {
    cloud: Arc<CloudClientImplementation>,
    deathnode_mark: String,
    delay_delete_seconds: u64,
    lifecycle_hook_timeout_seconds: u64,
    heartbeat_threshold_fraction: f64,
    last_delete_timestamp: Option<DateTime<Utc>>,
}

impl Notebook {
    pub fn new(
        cloud: Arc<CloudClientImplementation>,
        deathnode_mark: String,
        delay_delete_seconds: u64,
        lifecycle_hook_timeout_seconds: u64,
        heartbeat_threshold_fraction: f64,
    ) -> Self {
        Self {
            cloud,
            deathnode_mark,
            delay_delete_seconds,
            lifecycle_hook_timeout_seconds,
            heartbeat_threshold_fraction,
            last_delete_timestamp: None,
        }
    }

    /// Runs one full sweep over every tagged instance.
    #[instrument(skip(self, group_service, cluster_view, clock))]
    pub async fn destroy_instances_attempt(
        &mut self,
        group_service: &mut GroupServiceMonitor,
        cluster_view: &ClusterView,
        clock: &dyn Clock,
    ) {
        let tagged = match self
            .cloud
            .describe_instances_by_tag(&self.deathnode_mark)
            .await
        {
            Ok(tagged) => tagged,
            Err(source) => {
                tracing::warn!(%source, "failed to list tagged instances, skipping this sweep");
                return;
            }
        };

        let hosts: HashMap<String, String> = tagged
            .iter()
            .map(|instance| (instance.private_dns_name.clone(), instance.private_ip.clone()))
            .collect();
        if let Err(source) = cluster_view.set_agents_in_maintenance(&hosts).await {
            tracing::warn!(%source, "failed to submit maintenance schedule");
        }

        for instance in &tagged {
            self.destroy_attempt(&instance.instance_id, group_service, cluster_view, clock)
                .await;
        }
    }

    async fn destroy_attempt(
        &mut self,
        instance_id: &str,
        group_service: &mut GroupServiceMonitor,
        cluster_view: &ClusterView,
        clock: &dyn Clock,
    ) {
        let (group_name, monitor) = match group_service.get_instance_by_id(&instance_id.to_string())
        {
            Ok(found) => found,
            Err(_) => {
                tracing::warn!(%instance_id, "tagged instance is not under any monitored group, skipping");
                return;
            }
        };
        let group_name = group_name.clone();

        if monitor.instance.is_protected {
            if let Err(source) = monitor.remove_instance_protection(&group_name).await {
                tracing::warn!(%source, %instance_id, "failed to remove scale-in protection");
            }
        }

        self.heartbeat_if_near_hook_timeout(monitor, clock).await;

        if self.should_wait_for_next_destroy(clock) {
            tracing::debug!(%instance_id, "waiting out delay_delete_seconds before destroying another instance");
            return;
        }

        if cluster_view.is_protected(&monitor.instance.private_ip) {
            tracing::debug!(%instance_id, "still running protected work, not destroying yet");
            return;
        }

        if monitor.instance.lifecycle_state == LifecycleState::TerminatingWait {
            match self
                .cloud
                .complete_lifecycle_action(&group_name, &instance_id.to_string())
                .await
            {
                Ok(()) => {
                    tracing::info!(%instance_id, "completed lifecycle action, instance will terminate");
                    if self.delay_delete_seconds > 0 {
                        self.last_delete_timestamp = Some(clock.now());
                    }
                }
                Err(source) => {
                    tracing::warn!(%source, %instance_id, "failed to complete lifecycle action");
                }
            }
        } else {
            tracing::debug!(%instance_id, "cloud has not yet offered termination, waiting");
        }
    }

    /// Extends the cloud-side hook's own timeout proactively so a drain
    /// that legitimately outlives the hook timeout is not defeated by the
    /// hook expiring and the cloud reclaiming the node anyway.
    async fn heartbeat_if_near_hook_timeout(
        &self,
        monitor: &mut crate::instance_monitor::InstanceMonitor,
        clock: &dyn Clock,
    ) {
        if monitor.instance.lifecycle_state != LifecycleState::TerminatingWait {
            return;
        }
        if !monitor.is_marked_to_be_removed() {
            return;
        }

        let elapsed = (clock.now().timestamp() - monitor.instance.retirement_timestamp).max(0) as f64;
        let threshold = self.lifecycle_hook_timeout_seconds as f64 * self.heartbeat_threshold_fraction;
        if elapsed < threshold {
            return;
        }

        if let Err(source) = self
            .cloud
            .record_lifecycle_action_heartbeat(&monitor.instance.group_id, &monitor.instance.instance_id)
            .await
        {
            tracing::warn!(%source, instance_id = %monitor.instance.instance_id, "failed to record lifecycle heartbeat");
        }
    }

    fn should_wait_for_next_destroy(&self, clock: &dyn Clock) -> bool {
        if self.delay_delete_seconds == 0 {
            return false;
        }
        match self.last_delete_timestamp {
            Some(last) => (clock.now() - last).num_seconds() < self.delay_delete_seconds as i64,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use deathnode_cloud::{CloudGroupSnapshot, CloudInstanceSnapshot, InMemoryCloudClient};
    use deathnode_cluster::{ClusterClientImplementation, InMemoryClusterClient};
    use std::collections::HashMap as Map;

    use super::*;
    use crate::clock::FixedClock;

    fn clock_at(ts: i64) -> FixedClock {
        FixedClock(chrono::DateTime::from_timestamp(ts, 0).unwrap())
    }

    async fn setup(
        lifecycle_state: LifecycleState,
        retirement_timestamp: i64,
        delay_delete_seconds: u64,
    ) -> (
        Arc<InMemoryCloudClient>,
        GroupServiceMonitor,
        ClusterView,
        Notebook,
    ) {
        let in_memory = Arc::new(InMemoryCloudClient::new());
        in_memory
            .seed_group(CloudGroupSnapshot {
                group_name: "workers-a".to_string(),
                desired_capacity: 1,
                new_instances_protected_from_scale_in: true,
                instance_ids: vec!["i-1".to_string()],
            })
            .await;
        in_memory
            .seed_instance(CloudInstanceSnapshot {
                instance_id: "i-1".to_string(),
                private_ip: "10.0.0.1".to_string(),
                private_dns_name: "ip-10-0-0-1.ec2.internal".to_string(),
                lifecycle_state,
                is_protected: false,
                tags: Map::new(),
            })
            .await;
        // describe_instances_by_tag reads the separate tag index, so the tag
        // must be set through the same path `InstanceMonitor::tag_to_be_removed`
        // uses rather than embedded in the seeded snapshot.
        in_memory
            .set_instance_tag(
                "DEATH_NODE_MARK",
                &retirement_timestamp.to_string(),
                &"i-1".to_string(),
            )
            .await
            .unwrap();

        let cloud = Arc::new(CloudClientImplementation::InMemory(Arc::clone(&in_memory)));
        let mut group_service = GroupServiceMonitor::new(
            vec!["workers-".into()],
            Arc::clone(&cloud),
            "DEATH_NODE_MARK".into(),
            3600,
        );
        group_service.refresh(&clock_at(retirement_timestamp)).await;

        let cluster = Arc::new(ClusterClientImplementation::InMemory(
            InMemoryClusterClient::new(),
        ));
        let mut cluster_view = ClusterView::new(cluster, vec![], vec![]);
        cluster_view.refresh().await;

        let notebook = Notebook::new(cloud, "DEATH_NODE_MARK".into(), delay_delete_seconds, 3600, 0.95);

        (in_memory, group_service, cluster_view, notebook)
    }

    #[tokio::test]
    async fn terminating_wait_instance_with_no_protected_work_is_completed() {
        let (in_memory, mut group_service, cluster_view, mut notebook) =
            setup(LifecycleState::TerminatingWait, 1_700_000_000, 0).await;

        notebook
            .destroy_instances_attempt(&mut group_service, &cluster_view, &clock_at(1_700_000_100))
            .await;

        assert_eq!(
            in_memory.completed_lifecycle_actions().await,
            vec!["i-1".to_string()],
            "complete_lifecycle_action was called, moving the cloud-side instance to Terminated"
        );
    }

    #[tokio::test]
    async fn in_service_instance_is_not_completed() {
        let (_in_memory, mut group_service, cluster_view, mut notebook) =
            setup(LifecycleState::InService, 1_700_000_000, 0).await;

        // Should not panic or complete the lifecycle action; state stays InService.
        notebook
            .destroy_instances_attempt(&mut group_service, &cluster_view, &clock_at(1_700_000_100))
            .await;

        let (_group, monitor) = group_service.get_instance_by_id(&"i-1".to_string()).unwrap();
        assert_eq!(monitor.instance.lifecycle_state, LifecycleState::InService);
    }

    #[tokio::test]
    async fn delay_delete_throttles_a_second_completion_within_the_window() {
        let (_in_memory, mut group_service, cluster_view, mut notebook) =
            setup(LifecycleState::TerminatingWait, 1_700_000_000, 3600).await;

        notebook
            .destroy_instances_attempt(&mut group_service, &cluster_view, &clock_at(1_700_000_100))
            .await;
        assert!(notebook.last_delete_timestamp.is_some());

        let before = notebook.last_delete_timestamp;
        notebook
            .destroy_instances_attempt(&mut group_service, &cluster_view, &clock_at(1_700_000_200))
            .await;
        assert_eq!(notebook.last_delete_timestamp, before, "throttled: no new completion within the window");
    }

    #[tokio::test]
    async fn heartbeat_fires_once_past_the_threshold_fraction() {
        // T_lh = 3600, threshold fraction 0.95 => 3420s after tagging.
        let (in_memory, mut group_service, cluster_view, mut notebook) =
            setup(LifecycleState::TerminatingWait, 1_700_000_000, 0).await;

        notebook
            .destroy_instances_attempt(&mut group_service, &cluster_view, &clock_at(1_700_000_000 + 3421))
            .await;

        assert_eq!(in_memory.heartbeats_recorded().await, vec!["i-1".to_string()]);
    }

    #[tokio::test]
    async fn no_heartbeat_before_the_threshold_fraction() {
        let (in_memory, mut group_service, cluster_view, mut notebook) =
            setup(LifecycleState::TerminatingWait, 1_700_000_000, 0).await;

        notebook
            .destroy_instances_attempt(&mut group_service, &cluster_view, &clock_at(1_700_000_000 + 100))
            .await;

        assert!(in_memory.heartbeats_recorded().await.is_empty());
    }
}
