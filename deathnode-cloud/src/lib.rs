use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use deathnode_core::instance::LifecycleState;
use deathnode_core::{GroupName, InstanceId};
use enum_dispatch::enum_dispatch;
use snafu::Snafu;

pub mod aws;
pub mod in_memory;

pub use aws::AwsCloudClient;
pub use in_memory::InMemoryCloudClient;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("cloud API call {operation:?} failed"))]
    Call {
        operation: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[snafu(display("instance {instance_id:?} not found"))]
    InstanceNotFound { instance_id: String },

    #[snafu(display("group {group:?} not found"))]
    GroupNotFound { group: String },
}

/// A cloud auto-scale group as reported by the cloud, before any Deathnode
/// bookkeeping has been layered on top.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudGroupSnapshot {
    pub group_name: GroupName,
    pub desired_capacity: u32,
    pub new_instances_protected_from_scale_in: bool,
    pub instance_ids: Vec<InstanceId>,
}

/// A cloud VM as reported by the cloud.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudInstanceSnapshot {
    pub instance_id: InstanceId,
    pub private_ip: String,
    pub private_dns_name: String,
    pub lifecycle_state: LifecycleState,
    pub is_protected: bool,
    pub tags: HashMap<String, String>,
}

/// Typed wrapper over the cloud compute/autoscale APIs. Out of scope
/// as business logic: this is the narrow, external-collaborator contract
/// every component above it is built against.
#[async_trait]
#[enum_dispatch(CloudClientImplementation)]
pub trait CloudClient {
    /// Paginated; `group.name` starts with `prefix`.
    async fn describe_groups_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<CloudGroupSnapshot>, Error>;

    async fn describe_instance_by_id(
        &self,
        instance_id: &InstanceId,
    ) -> Result<CloudInstanceSnapshot, Error>;

    /// Only instances the cloud reports as running.
    async fn describe_instances_by_tag(
        &self,
        key: &str,
    ) -> Result<Vec<CloudInstanceSnapshot>, Error>;

    async fn set_asg_instance_protection(
        &self,
        group: &GroupName,
        instance_ids: &[InstanceId],
    ) -> Result<(), Error>;

    async fn remove_asg_instance_protection(
        &self,
        group: &GroupName,
        instance_id: &InstanceId,
    ) -> Result<(), Error>;

    /// Idempotent upsert.
    async fn set_instance_tag(
        &self,
        key: &str,
        value: &str,
        instance_id: &InstanceId,
    ) -> Result<(), Error>;

    async fn has_lifecycle_hook(&self, group: &GroupName) -> Result<bool, Error>;

    /// Installs the fixed `DEATHNODE` hook, targeting
    /// `autoscaling:EC2_INSTANCE_TERMINATING`, default result `CONTINUE`.
    async fn put_lifecycle_hook(
        &self,
        group: &GroupName,
        timeout_seconds: u64,
    ) -> Result<(), Error>;

    async fn complete_lifecycle_action(
        &self,
        group: &GroupName,
        instance_id: &InstanceId,
    ) -> Result<(), Error>;

    async fn record_lifecycle_action_heartbeat(
        &self,
        group: &GroupName,
        instance_id: &InstanceId,
    ) -> Result<(), Error>;
}

pub const LIFECYCLE_HOOK_NAME: &str = "DEATHNODE";

#[enum_dispatch]
pub enum CloudClientImplementation {
    Aws(AwsCloudClient),
    /// Shared via `Arc` (rather than owned) so tests can mutate the backing
    /// store through a handle kept alongside the one wrapped here.
    InMemory(Arc<InMemoryCloudClient>),
}

#[async_trait]
impl<T: CloudClient + Send + Sync> CloudClient for Arc<T> {
    async fn describe_groups_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<CloudGroupSnapshot>, Error> {
        (**self).describe_groups_by_prefix(prefix).await
    }

    async fn describe_instance_by_id(
        &self,
        instance_id: &InstanceId,
    ) -> Result<CloudInstanceSnapshot, Error> {
        (**self).describe_instance_by_id(instance_id).await
    }

    async fn describe_instances_by_tag(
        &self,
        key: &str,
    ) -> Result<Vec<CloudInstanceSnapshot>, Error> {
        (**self).describe_instances_by_tag(key).await
    }

    async fn set_asg_instance_protection(
        &self,
        group: &GroupName,
        instance_ids: &[InstanceId],
    ) -> Result<(), Error> {
        (**self).set_asg_instance_protection(group, instance_ids).await
    }

    async fn remove_asg_instance_protection(
        &self,
        group: &GroupName,
        instance_id: &InstanceId,
    ) -> Result<(), Error> {
        (**self)
            .remove_asg_instance_protection(group, instance_id)
            .await
    }

    async fn set_instance_tag(
        &self,
        key: &str,
        value: &str,
        instance_id: &InstanceId,
    ) -> Result<(), Error> {
        (**self).set_instance_tag(key, value, instance_id).await
    }

    async fn has_lifecycle_hook(&self, group: &GroupName) -> Result<bool, Error> {
        (**self).has_lifecycle_hook(group).await
    }

    async fn put_lifecycle_hook(
        &self,
        group: &GroupName,
        timeout_seconds: u64,
    ) -> Result<(), Error> {
        (**self).put_lifecycle_hook(group, timeout_seconds).await
    }

    async fn complete_lifecycle_action(
        &self,
        group: &GroupName,
        instance_id: &InstanceId,
    ) -> Result<(), Error> {
        (**self).complete_lifecycle_action(group, instance_id).await
    }

    async fn record_lifecycle_action_heartbeat(
        &self,
        group: &GroupName,
        instance_id: &InstanceId,
    ) -> Result<(), Error> {
        (**self)
            .record_lifecycle_action_heartbeat(group, instance_id)
            .await
    }
}
