pub mod cluster_view;
pub mod config;
pub mod instance;

/// Cloud-unique identifier of a VM (e.g. an EC2 instance id).
pub type InstanceId = String;

/// Name of a cloud auto-scale group.
pub type GroupName = String;

/// Configured discovery prefix a group name must start with.
pub type GroupPrefix = String;

/// Cluster-manager framework identifier.
pub type FrameworkId = String;

/// Cluster-manager agent identifier.
pub type AgentId = String;
