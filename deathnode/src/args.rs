use clap::Parser;
use deathnode_core::config::ConfigInput;

/// Safely retires compute nodes from an auto-scaling Mesos-style cluster.
///
/// Required flags: a cluster-manager URL, at least one group prefix, at
/// least one protected framework, and at least one constraint.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Base URL of the cluster-manager HTTP API (e.g. Mesos master).
    #[arg(long = "cluster-manager-url")]
    pub cluster_manager_url: String,

    /// Group-name prefix to monitor. Repeatable; at least one is required.
    #[arg(long = "group-prefix", required = true)]
    pub group_prefixes: Vec<String>,

    /// Cluster-manager framework name whose tasks must not be killed.
    /// Repeatable; at least one is required.
    #[arg(long = "protected-framework", required = true)]
    pub protected_frameworks: Vec<String>,

    /// Task label key that, when set to a truthy value, protects the task.
    /// Repeatable.
    #[arg(long = "protected-task-label")]
    pub protected_task_labels: Vec<String>,

    /// A constraint from the closed set (`no_constraint`,
    /// `protected_constraint`, `filter_framework_constraint=<name>`,
    /// `task_name_regexp_constraint=<regex>`). Repeatable, applied in order;
    /// at least one is required.
    #[arg(long = "constraint", required = true)]
    pub constraints: Vec<String>,

    /// `first_available_agent` (default) or `smallest_instance_id`.
    #[arg(long = "recommender-type", default_value = "")]
    pub recommender_type: String,

    /// Cloud tag key used to mark an instance for removal.
    #[arg(long = "deathnode-mark", default_value = "")]
    pub deathnode_mark: String,

    /// Seconds between ticks.
    #[arg(long = "polling-seconds", default_value_t = 0)]
    pub polling_seconds: u64,

    /// Minimum seconds between successful terminations; 0 disables
    /// throttling.
    #[arg(long = "delay-delete-seconds", default_value_t = 0)]
    pub delay_delete_seconds: u64,

    /// Timeout given to the cloud lifecycle hook installed on each group.
    #[arg(long = "lifecycle-hook-timeout-seconds", default_value_t = 0)]
    pub lifecycle_hook_timeout_seconds: u64,

    /// Fraction of the lifecycle hook timeout after which a heartbeat is
    /// sent to extend it.
    #[arg(long = "heartbeat-threshold-fraction", default_value_t = 0.0)]
    pub heartbeat_threshold_fraction: f64,

    /// Reset any lifecycle action already in flight on startup.
    #[arg(long = "reset-lifecycle")]
    pub reset_lifecycle: bool,

    /// Enable debug logging.
    #[arg(long)]
    pub debug: bool,
}

impl From<Args> for ConfigInput {
    fn from(args: Args) -> Self {
        Self {
            cluster_manager_url: args.cluster_manager_url,
            group_prefixes: args.group_prefixes,
            protected_frameworks: args.protected_frameworks,
            protected_task_labels: args.protected_task_labels,
            constraints: args.constraints,
            recommender: args.recommender_type,
            deathnode_mark: args.deathnode_mark,
            polling_seconds: args.polling_seconds,
            delay_delete_seconds: args.delay_delete_seconds,
            lifecycle_hook_timeout_seconds: args.lifecycle_hook_timeout_seconds,
            heartbeat_threshold_fraction: args.heartbeat_threshold_fraction,
            reset_lifecycle: args.reset_lifecycle,
            debug: args.debug,
        }
    }
}
