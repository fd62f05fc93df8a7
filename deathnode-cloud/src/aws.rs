use std::collections::HashMap;

use async_trait::async_trait;
use deathnode_core::instance::LifecycleState;
use deathnode_core::{GroupName, InstanceId};
use snafu::ResultExt;
use tracing::instrument;

use crate::{
    CallSnafu, CloudClient, CloudGroupSnapshot, CloudInstanceSnapshot, Error, LIFECYCLE_HOOK_NAME,
};

/// Real cloud backend, wrapping the AWS SDK autoscaling and EC2 clients.
///
/// Grounded on the shape of `original_source/aws/client.go`'s
/// `ClientInterface`: one struct wrapping two SDK clients, one method per
/// operation.
pub struct AwsCloudClient {
    autoscaling: aws_sdk_autoscaling::Client,
    ec2: aws_sdk_ec2::Client,
}

impl AwsCloudClient {
    pub async fn new() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self {
            autoscaling: aws_sdk_autoscaling::Client::new(&config),
            ec2: aws_sdk_ec2::Client::new(&config),
        }
    }

    /// `DescribeInstances` (EC2) has no notion of the autoscaling lifecycle
    /// state or scale-in protection flag; those live on the separate
    /// `DescribeAutoScalingInstances` (autoscaling) call. Fold that in here
    /// so callers get one complete snapshot.
    async fn enrich_with_asg_state(
        &self,
        snapshot: &mut CloudInstanceSnapshot,
    ) -> Result<(), Error> {
        let output = self
            .autoscaling
            .describe_auto_scaling_instances()
            .instance_ids(&snapshot.instance_id)
            .send()
            .await
            .map_err(box_err)
            .context(CallSnafu {
                operation: "describe_auto_scaling_instances",
            })?;

        if let Some(asg_instance) = output.auto_scaling_instances().first() {
            snapshot.lifecycle_state = to_lifecycle_state(asg_instance.lifecycle_state());
            snapshot.is_protected = asg_instance.protected_from_scale_in().unwrap_or(false);
        }

        Ok(())
    }
}

fn box_err<E: std::error::Error + Send + Sync + 'static>(
    e: E,
) -> Box<dyn std::error::Error + Send + Sync> {
    Box::new(e)
}

fn to_lifecycle_state(state: Option<&str>) -> LifecycleState {
    match state {
        Some("InService") => LifecycleState::InService,
        Some("Terminating:Wait") => LifecycleState::TerminatingWait,
        Some(other) => LifecycleState::Other(other.to_string()),
        None => LifecycleState::Other(String::new()),
    }
}

#[async_trait]
impl CloudClient for AwsCloudClient {
    #[instrument(skip(self))]
    async fn describe_groups_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<CloudGroupSnapshot>, Error> {
        let mut groups = Vec::new();
        let mut next_token = None;

        loop {
            let mut request = self.autoscaling.describe_auto_scaling_groups();
            if let Some(token) = next_token {
                request = request.next_token(token);
            }

            let output = request
                .send()
                .await
                .map_err(box_err)
                .context(CallSnafu {
                    operation: "describe_auto_scaling_groups",
                })?;

            for group in output.auto_scaling_groups() {
                let Some(name) = group.auto_scaling_group_name() else {
                    continue;
                };
                if !name.starts_with(prefix) {
                    continue;
                }

                groups.push(CloudGroupSnapshot {
                    group_name: name.to_string(),
                    desired_capacity: group.desired_capacity().unwrap_or_default() as u32,
                    new_instances_protected_from_scale_in: group
                        .new_instances_protected_from_scale_in()
                        .unwrap_or(false),
                    instance_ids: group
                        .instances()
                        .iter()
                        .filter_map(|instance| instance.instance_id().map(str::to_string))
                        .collect(),
                });
            }

            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(groups)
    }

    #[instrument(skip(self))]
    async fn describe_instance_by_id(
        &self,
        instance_id: &InstanceId,
    ) -> Result<CloudInstanceSnapshot, Error> {
        let output = self
            .ec2
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(box_err)
            .context(CallSnafu {
                operation: "describe_instances",
            })?;

        let instance = output
            .reservations()
            .iter()
            .flat_map(|reservation| reservation.instances())
            .next()
            .ok_or_else(|| crate::Error::InstanceNotFound {
                instance_id: instance_id.clone(),
            })?;

        let mut snapshot = ec2_instance_to_snapshot(instance);
        self.enrich_with_asg_state(&mut snapshot).await?;
        Ok(snapshot)
    }

    #[instrument(skip(self))]
    async fn describe_instances_by_tag(
        &self,
        key: &str,
    ) -> Result<Vec<CloudInstanceSnapshot>, Error> {
        let filter = aws_sdk_ec2::types::Filter::builder()
            .name("tag-key")
            .values(key)
            .build();

        let output = self
            .ec2
            .describe_instances()
            .filters(filter)
            .send()
            .await
            .map_err(box_err)
            .context(CallSnafu {
                operation: "describe_instances",
            })?;

        let mut snapshots: Vec<CloudInstanceSnapshot> = output
            .reservations()
            .iter()
            .flat_map(|reservation| reservation.instances())
            .filter(|instance| {
                instance
                    .state()
                    .and_then(|s| s.name())
                    .map(|name| name.as_str() == "running")
                    .unwrap_or(false)
            })
            .map(ec2_instance_to_snapshot)
            .collect();

        for snapshot in &mut snapshots {
            self.enrich_with_asg_state(snapshot).await?;
        }

        Ok(snapshots)
    }

    #[instrument(skip(self))]
    async fn set_asg_instance_protection(
        &self,
        group: &GroupName,
        instance_ids: &[InstanceId],
    ) -> Result<(), Error> {
        self.autoscaling
            .set_instance_protection()
            .auto_scaling_group_name(group)
            .set_instance_ids(Some(instance_ids.to_vec()))
            .protected_from_scale_in(true)
            .send()
            .await
            .map_err(box_err)
            .context(CallSnafu {
                operation: "set_instance_protection",
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_asg_instance_protection(
        &self,
        group: &GroupName,
        instance_id: &InstanceId,
    ) -> Result<(), Error> {
        self.autoscaling
            .set_instance_protection()
            .auto_scaling_group_name(group)
            .instance_ids(instance_id)
            .protected_from_scale_in(false)
            .send()
            .await
            .map_err(box_err)
            .context(CallSnafu {
                operation: "set_instance_protection",
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_instance_tag(
        &self,
        key: &str,
        value: &str,
        instance_id: &InstanceId,
    ) -> Result<(), Error> {
        let tag = aws_sdk_ec2::types::Tag::builder()
            .key(key)
            .value(value)
            .build();

        self.ec2
            .create_tags()
            .resources(instance_id)
            .tags(tag)
            .send()
            .await
            .map_err(box_err)
            .context(CallSnafu {
                operation: "create_tags",
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn has_lifecycle_hook(&self, group: &GroupName) -> Result<bool, Error> {
        let output = self
            .autoscaling
            .describe_lifecycle_hooks()
            .auto_scaling_group_name(group)
            .send()
            .await
            .map_err(box_err)
            .context(CallSnafu {
                operation: "describe_lifecycle_hooks",
            })?;

        Ok(output
            .lifecycle_hooks()
            .iter()
            .any(|hook| hook.lifecycle_hook_name() == Some(LIFECYCLE_HOOK_NAME)))
    }

    #[instrument(skip(self))]
    async fn put_lifecycle_hook(
        &self,
        group: &GroupName,
        timeout_seconds: u64,
    ) -> Result<(), Error> {
        self.autoscaling
            .put_lifecycle_hook()
            .lifecycle_hook_name(LIFECYCLE_HOOK_NAME)
            .auto_scaling_group_name(group)
            .lifecycle_transition("autoscaling:EC2_INSTANCE_TERMINATING")
            .default_result("CONTINUE")
            .heartbeat_timeout(timeout_seconds as i32)
            .send()
            .await
            .map_err(box_err)
            .context(CallSnafu {
                operation: "put_lifecycle_hook",
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn complete_lifecycle_action(
        &self,
        group: &GroupName,
        instance_id: &InstanceId,
    ) -> Result<(), Error> {
        self.autoscaling
            .complete_lifecycle_action()
            .lifecycle_hook_name(LIFECYCLE_HOOK_NAME)
            .auto_scaling_group_name(group)
            .instance_id(instance_id)
            .lifecycle_action_result("CONTINUE")
            .send()
            .await
            .map_err(box_err)
            .context(CallSnafu {
                operation: "complete_lifecycle_action",
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn record_lifecycle_action_heartbeat(
        &self,
        group: &GroupName,
        instance_id: &InstanceId,
    ) -> Result<(), Error> {
        self.autoscaling
            .record_lifecycle_action_heartbeat()
            .lifecycle_hook_name(LIFECYCLE_HOOK_NAME)
            .auto_scaling_group_name(group)
            .instance_id(instance_id)
            .send()
            .await
            .map_err(box_err)
            .context(CallSnafu {
                operation: "record_lifecycle_action_heartbeat",
            })?;
        Ok(())
    }
}

fn ec2_instance_to_snapshot(instance: &aws_sdk_ec2::types::Instance) -> CloudInstanceSnapshot {
    let tags: HashMap<String, String> = instance
        .tags()
        .iter()
        .filter_map(|tag| Some((tag.key()?.to_string(), tag.value()?.to_string())))
        .collect();

    CloudInstanceSnapshot {
        instance_id: instance.instance_id().unwrap_or_default().to_string(),
        private_ip: instance.private_ip_address().unwrap_or_default().to_string(),
        private_dns_name: instance.private_dns_name().unwrap_or_default().to_string(),
        // EC2 itself has no notion of the autoscaling lifecycle state; callers
        // that need it read it off the autoscaling group's instance list
        // instead. This snapshot only carries what `describe_instances` has.
        lifecycle_state: LifecycleState::InService,
        is_protected: false,
        tags,
    }
}
