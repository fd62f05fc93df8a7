use std::sync::Arc;
use std::time::Duration;

use deathnode_cloud::CloudClientImplementation;
use deathnode_cluster::ClusterClientImplementation;
use deathnode_core::config::Config;
use tokio::time::{self, MissedTickBehavior};
use tracing::instrument;

use crate::clock::Clock;
use crate::cluster_view::ClusterView;
use crate::group_service_monitor::GroupServiceMonitor;
use crate::notebook::Notebook;
use crate::selection::{ConstraintImplementation, ConstraintPipeline, Recommender, RecommenderImplementation};

/// Top-level orchestrator. Constructed from configuration; owns
/// exactly one `GroupServiceMonitor`, one `ClusterView`, one `Notebook`, the
/// constraint pipeline, and a recommender. Grounded on
/// `original_source/deathnode/watcher.go`'s `Watcher`, with the tick loop
/// itself grounded on `trino-lb/src/scaling/mod.rs`'s
/// `time::interval` + `MissedTickBehavior::Delay` pattern.
pub struct Watcher {
    group_service: GroupServiceMonitor,
    cluster_view: ClusterView,
    notebook: Notebook,
    constraints: ConstraintPipeline,
    recommender: RecommenderImplementation,
    polling_seconds: u64,
}

impl Watcher {
    pub fn new(
        config: &Config,
        cloud: Arc<CloudClientImplementation>,
        cluster: Arc<ClusterClientImplementation>,
    ) -> Result<Self, crate::selection::BuildConstraintError> {
        let group_service = GroupServiceMonitor::new(
            config.group_prefixes.clone(),
            Arc::clone(&cloud),
            config.deathnode_mark.clone(),
            config.lifecycle_hook_timeout_seconds,
        );

        let cluster_view = ClusterView::new(
            Arc::clone(&cluster),
            config.protected_frameworks.clone(),
            config.protected_task_labels.clone(),
        );

        let notebook = Notebook::new(
            cloud,
            config.deathnode_mark.clone(),
            config.delay_delete_seconds,
            config.lifecycle_hook_timeout_seconds,
            config.heartbeat_threshold_fraction,
        );

        let constraints: Vec<ConstraintImplementation> = config
            .constraints
            .iter()
            .map(ConstraintImplementation::try_from)
            .collect::<Result<_, _>>()?;

        Ok(Self {
            group_service,
            cluster_view,
            notebook,
            constraints: ConstraintPipeline::new(constraints),
            recommender: config.recommender.into(),
            polling_seconds: config.polling_seconds,
        })
    }

    /// Runs ticks forever at `polling_seconds`. Ticks are strictly
    /// sequential: the interval is only re-armed once a tick's body has
    /// fully returned, so a slow tick cannot overlap the next one.
    pub async fn run(mut self, clock: &dyn Clock) -> ! {
        let mut interval = time::interval(Duration::from_secs(self.polling_seconds));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.tick(clock).await;
        }
    }

    /// One full control-loop iteration: refresh group/cluster state, tag as
    /// many victims per group as its surplus demands, then let the notebook
    /// advance every already-tagged instance toward termination.
    #[instrument(skip(self, clock))]
    pub async fn tick(&mut self, clock: &dyn Clock) {
        self.group_service.refresh(clock).await;
        self.cluster_view.refresh().await;

        for group in self.group_service.groups() {
            let undesired = group.num_undesired_instances();

            for _ in 0..undesired {
                let candidates = group.get_instances();
                if candidates.is_empty() {
                    break;
                }
                let filtered = self.constraints.apply(&candidates, &self.cluster_view);

                let Some(victim) = self.recommender.recommend(&filtered) else {
                    tracing::warn!(group = %group.group_name, "surplus detected but no candidate survived constraints");
                    break;
                };
                let victim_id = victim.instance_id.clone();

                let Some(monitor) = group.get_instance_monitor_mut(&victim_id) else {
                    break;
                };
                if let Err(source) = monitor.tag_to_be_removed(clock).await {
                    tracing::warn!(%source, instance_id = %victim_id, "failed to tag instance for removal");
                    break;
                }
            }
        }

        self.notebook
            .destroy_instances_attempt(&mut self.group_service, &self.cluster_view, clock)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as Map;

    use deathnode_cloud::{CloudClient, CloudGroupSnapshot, CloudInstanceSnapshot, InMemoryCloudClient};
    use deathnode_cluster::InMemoryClusterClient;
    use deathnode_core::instance::LifecycleState;

    use super::*;
    use crate::clock::FixedClock;
    use crate::selection::{ConstraintImplementation, NoConstraint};
    use crate::selection::recommender::FirstAvailableAgent;

    fn clock() -> FixedClock {
        FixedClock(chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap())
    }

    async fn watcher_over_group(
        member_count: u32,
        desired_capacity: u32,
    ) -> (Arc<InMemoryCloudClient>, Watcher) {
        let in_memory = Arc::new(InMemoryCloudClient::new());
        let mut instance_ids = Vec::new();
        for i in 0..member_count {
            let id = format!("i-{i}");
            in_memory
                .seed_instance(CloudInstanceSnapshot {
                    instance_id: id.clone(),
                    private_ip: format!("10.0.0.{i}"),
                    private_dns_name: format!("ip-10-0-0-{i}.ec2.internal"),
                    lifecycle_state: LifecycleState::InService,
                    is_protected: true,
                    tags: Map::new(),
                })
                .await;
            instance_ids.push(id);
        }
        in_memory
            .seed_group(CloudGroupSnapshot {
                group_name: "workers-a".to_string(),
                desired_capacity,
                new_instances_protected_from_scale_in: true,
                instance_ids,
            })
            .await;

        let cloud = Arc::new(CloudClientImplementation::InMemory(Arc::clone(&in_memory)));
        let group_service = GroupServiceMonitor::new(
            vec!["workers-".into()],
            Arc::clone(&cloud),
            "DEATH_NODE_MARK".into(),
            3600,
        );

        let cluster = Arc::new(ClusterClientImplementation::InMemory(
            InMemoryClusterClient::new(),
        ));
        let cluster_view = ClusterView::new(cluster, vec![], vec![]);

        let notebook = Notebook::new(Arc::clone(&cloud), "DEATH_NODE_MARK".into(), 0, 3600, 0.95);

        let watcher = Watcher {
            group_service,
            cluster_view,
            notebook,
            constraints: ConstraintPipeline::new(vec![ConstraintImplementation::NoConstraint(
                NoConstraint,
            )]),
            recommender: RecommenderImplementation::FirstAvailableAgent(FirstAvailableAgent),
            polling_seconds: 60,
        };

        (in_memory, watcher)
    }

    #[tokio::test]
    async fn no_surplus_tags_nothing() {
        let (in_memory, mut watcher) = watcher_over_group(3, 3).await;

        watcher.tick(&clock()).await;

        let tagged = in_memory
            .describe_instances_by_tag("DEATH_NODE_MARK")
            .await
            .unwrap();
        assert!(tagged.is_empty());
    }

    #[tokio::test]
    async fn surplus_of_two_tags_two_instances_within_one_tick() {
        let (in_memory, mut watcher) = watcher_over_group(3, 1).await;

        watcher.tick(&clock()).await;

        let tagged = in_memory
            .describe_instances_by_tag("DEATH_NODE_MARK")
            .await
            .unwrap();
        assert_eq!(tagged.len(), 2, "k = N - D = 3 - 1 = 2 victims tagged in a single tick");
    }
}
