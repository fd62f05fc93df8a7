use std::sync::Arc;

use deathnode_cloud::{CloudClient, CloudClientImplementation};
use deathnode_core::instance::{Instance, LifecycleState};
use deathnode_core::{GroupName, InstanceId};
use snafu::{ResultExt, Snafu};
use tracing::instrument;

use crate::clock::Clock;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to tag instance {instance_id:?} for removal"))]
    Tag {
        instance_id: InstanceId,
        source: deathnode_cloud::Error,
    },

    #[snafu(display("failed to remove scale-in protection for instance {instance_id:?}"))]
    RemoveProtection {
        instance_id: InstanceId,
        source: deathnode_cloud::Error,
    },
}

/// Per-instance state: IP, lifecycle state, protection flag, retirement tag.
/// Grounded on `original_source/monitor/instance.go`'s `instance` +
/// `InstanceMonitor` pair, collapsed into one struct since Rust ownership
/// makes the separate wrapper unnecessary.
pub struct InstanceMonitor {
    pub instance: Instance,
    cloud: Arc<CloudClientImplementation>,
    deathnode_mark: String,
}

impl InstanceMonitor {
    pub fn new(
        instance: Instance,
        cloud: Arc<CloudClientImplementation>,
        deathnode_mark: String,
    ) -> Self {
        Self {
            instance,
            cloud,
            deathnode_mark,
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance.instance_id
    }

    pub fn is_marked_to_be_removed(&self) -> bool {
        self.instance.is_marked_to_be_removed()
    }

    #[instrument(skip(self, clock), fields(instance_id = %self.instance.instance_id))]
    pub async fn tag_to_be_removed(&mut self, clock: &dyn Clock) -> Result<(), Error> {
        let now = clock.now().timestamp();
        self.cloud
            .set_instance_tag(&self.deathnode_mark, &now.to_string(), &self.instance.instance_id)
            .await
            .context(TagSnafu {
                instance_id: self.instance.instance_id.clone(),
            })?;
        self.instance.retirement_timestamp = now;
        Ok(())
    }

    #[instrument(skip(self), fields(instance_id = %self.instance.instance_id))]
    pub async fn remove_instance_protection(&mut self, group: &GroupName) -> Result<(), Error> {
        self.cloud
            .remove_asg_instance_protection(group, &self.instance.instance_id)
            .await
            .context(RemoveProtectionSnafu {
                instance_id: self.instance.instance_id.clone(),
            })?;
        self.instance.is_protected = false;
        Ok(())
    }

    /// If the instance transitions into `TerminatingWait` while still
    /// thought to be protected, the cloud moved to drain it without
    /// Deathnode's decision (e.g. marked unhealthy). Policy: take ownership
    /// of the drain by tagging it too, rather than leaving it stuck.
    #[instrument(skip(self, clock), fields(instance_id = %self.instance.instance_id))]
    pub async fn set_lifecycle_state(
        &mut self,
        new_state: LifecycleState,
        clock: &dyn Clock,
    ) -> Result<(), Error> {
        let entered_drain_while_protected =
            new_state == LifecycleState::TerminatingWait && self.instance.is_protected;

        self.instance.lifecycle_state = new_state;

        if entered_drain_while_protected && !self.is_marked_to_be_removed() {
            tracing::warn!(
                instance_id = %self.instance.instance_id,
                "instance entered TerminatingWait while still protected, taking ownership of its drain"
            );
            self.tag_to_be_removed(clock).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use deathnode_cloud::InMemoryCloudClient;

    use super::*;
    use crate::clock::FixedClock;

    fn clock() -> FixedClock {
        FixedClock(chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap())
    }

    fn monitor() -> InstanceMonitor {
        InstanceMonitor::new(
            Instance::new("i-1".into(), "10.0.0.1".into(), "group-a".into()),
            Arc::new(CloudClientImplementation::InMemory(Arc::new(
                InMemoryCloudClient::new(),
            ))),
            "DEATH_NODE_MARK".into(),
        )
    }

    #[tokio::test]
    async fn tag_to_be_removed_records_retirement_timestamp() {
        let mut monitor = monitor();
        assert!(!monitor.is_marked_to_be_removed());

        monitor.tag_to_be_removed(&clock()).await.unwrap();

        assert!(monitor.is_marked_to_be_removed());
        assert_eq!(monitor.instance.retirement_timestamp, 1_700_000_000);
    }

    #[tokio::test]
    async fn transition_to_terminating_wait_while_protected_self_tags() {
        let mut monitor = monitor();
        monitor.instance.is_protected = true;

        monitor
            .set_lifecycle_state(LifecycleState::TerminatingWait, &clock())
            .await
            .unwrap();

        assert!(monitor.is_marked_to_be_removed());
    }

    #[tokio::test]
    async fn transition_to_terminating_wait_while_unprotected_does_not_tag() {
        let mut monitor = monitor();
        monitor.instance.is_protected = false;

        monitor
            .set_lifecycle_state(LifecycleState::TerminatingWait, &clock())
            .await
            .unwrap();

        assert!(!monitor.is_marked_to_be_removed());
    }
}
