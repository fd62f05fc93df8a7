pub mod recommender;

use deathnode_core::config::ConstraintSpec;
use deathnode_core::instance::Instance;
use enum_dispatch::enum_dispatch;
use regex::Regex;
use snafu::ResultExt;

pub use recommender::{Recommender, RecommenderImplementation};

use crate::cluster_view::ClusterView;

/// A pure filter over candidate instances. Grounded on
/// `trino-lb/src/routing/mod.rs`'s `RouterImplementationTrait` +
/// `enum_dispatch` mechanism; business semantics grounded on
/// `original_source/deathnode/constraints.go`.
#[enum_dispatch(ConstraintImplementation)]
pub trait Constraint {
    /// Filters `candidates` down to instances the operator allows killing.
    /// `no_constraint` aside, implementations must apply the fallback rule
    /// themselves only if they don't use [`apply_with_fallback`]; the
    /// pipeline below always routes through it.
    fn filter<'a>(&self, candidates: &[&'a Instance], view: &ClusterView) -> Vec<&'a Instance>;
}

/// If `filter_fn` would empty the candidate set, returns the input
/// unchanged instead (the fallback rule). A fully restrictive filter must
/// not stall the pipeline; the conflict surfaces later, at the drain stage,
/// where the instance cannot progress past `TerminatingWait` while
/// protected work remains.
fn apply_with_fallback<'a>(
    candidates: &[&'a Instance],
    filtered: Vec<&'a Instance>,
) -> Vec<&'a Instance> {
    if filtered.is_empty() && !candidates.is_empty() {
        candidates.to_vec()
    } else {
        filtered
    }
}

pub struct NoConstraint;

impl Constraint for NoConstraint {
    fn filter<'a>(&self, candidates: &[&'a Instance], _view: &ClusterView) -> Vec<&'a Instance> {
        candidates.to_vec()
    }
}

pub struct ProtectedConstraint;

impl Constraint for ProtectedConstraint {
    fn filter<'a>(&self, candidates: &[&'a Instance], view: &ClusterView) -> Vec<&'a Instance> {
        let filtered = candidates
            .iter()
            .copied()
            .filter(|instance| !view.is_protected(&instance.private_ip))
            .collect();
        apply_with_fallback(candidates, filtered)
    }
}

pub struct FilterFrameworkConstraint {
    pub framework: String,
}

impl Constraint for FilterFrameworkConstraint {
    fn filter<'a>(&self, candidates: &[&'a Instance], view: &ClusterView) -> Vec<&'a Instance> {
        let filtered = candidates
            .iter()
            .copied()
            .filter(|instance| !view.has_framework(&instance.private_ip, &self.framework))
            .collect();
        apply_with_fallback(candidates, filtered)
    }
}

pub struct TaskNameRegexpConstraint {
    pub regex: Regex,
}

impl Constraint for TaskNameRegexpConstraint {
    fn filter<'a>(&self, candidates: &[&'a Instance], view: &ClusterView) -> Vec<&'a Instance> {
        let filtered = candidates
            .iter()
            .copied()
            .filter(|instance| !view.has_task_matching(&instance.private_ip, &self.regex))
            .collect();
        apply_with_fallback(candidates, filtered)
    }
}

#[enum_dispatch]
pub enum ConstraintImplementation {
    NoConstraint(NoConstraint),
    ProtectedConstraint(ProtectedConstraint),
    FilterFrameworkConstraint(FilterFrameworkConstraint),
    TaskNameRegexpConstraint(TaskNameRegexpConstraint),
}

#[derive(Debug, snafu::Snafu)]
#[snafu(display("constraint {raw:?} has an invalid regex"))]
pub struct BuildConstraintError {
    raw: String,
    source: regex::Error,
}

impl TryFrom<&ConstraintSpec> for ConstraintImplementation {
    type Error = BuildConstraintError;

    fn try_from(spec: &ConstraintSpec) -> Result<Self, Self::Error> {
        Ok(match spec {
            ConstraintSpec::NoConstraint => NoConstraint.into(),
            ConstraintSpec::ProtectedConstraint => ProtectedConstraint.into(),
            ConstraintSpec::FilterFrameworkConstraint { framework } => {
                FilterFrameworkConstraint {
                    framework: framework.clone(),
                }
                .into()
            }
            ConstraintSpec::TaskNameRegexpConstraint { regex } => TaskNameRegexpConstraint {
                regex: Regex::new(regex).context(BuildConstraintSnafu { raw: regex.clone() })?,
            }
            .into(),
        })
    }
}

/// Applies every constraint in configured order, composing their
/// intersection with the fallback rule re-applied per step.
pub struct ConstraintPipeline {
    constraints: Vec<ConstraintImplementation>,
}

impl ConstraintPipeline {
    pub fn new(constraints: Vec<ConstraintImplementation>) -> Self {
        Self { constraints }
    }

    pub fn apply<'a>(&self, instances: &[&'a Instance], view: &ClusterView) -> Vec<&'a Instance> {
        let mut current = instances.to_vec();
        for constraint in &self.constraints {
            current = constraint.filter(&current, view);
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use deathnode_cluster::{ClusterClientImplementation, InMemoryClusterClient};
    use deathnode_core::cluster_view::{Agent, Framework, Label, Task};

    use super::*;

    fn instance(id: &str, ip: &str) -> Instance {
        Instance::new(id.to_string(), ip.to_string(), "group-a".to_string())
    }

    async fn view_protecting(ip: &str) -> ClusterView {
        let cluster = InMemoryClusterClient::new();
        cluster
            .set_agents(vec![Agent {
                agent_id: "agent-1".into(),
                hostname: "host-1".into(),
                private_ip: ip.to_string(),
            }])
            .await;
        cluster
            .set_frameworks(vec![Framework {
                framework_id: "fw-1".into(),
                name: "marathon".into(),
            }])
            .await;
        cluster
            .set_tasks(vec![Task {
                name: "app-1".into(),
                state: "TASK_RUNNING".into(),
                agent_id: "agent-1".into(),
                framework_id: "fw-1".into(),
                labels: vec![Label {
                    key: "ignored".into(),
                    value: "ignored".into(),
                }],
                is_protected: false,
            }])
            .await;

        let cluster = Arc::new(ClusterClientImplementation::InMemory(cluster));
        let mut view = ClusterView::new(cluster, vec!["marathon".into()], vec![]);
        view.refresh().await;
        view
    }

    #[tokio::test]
    async fn no_constraint_is_identity() {
        let view = view_protecting("10.0.0.1").await;
        let a = instance("i-1", "10.0.0.1");
        let candidates = vec![&a];

        let out = NoConstraint.filter(&candidates, &view);
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn protected_constraint_drops_protected_instances() {
        let view = view_protecting("10.0.0.1").await;
        let protected = instance("i-1", "10.0.0.1");
        let free = instance("i-2", "10.0.0.2");
        let candidates = vec![&protected, &free];

        let out = ProtectedConstraint.filter(&candidates, &view);
        assert_eq!(out, vec![&free]);
    }

    #[tokio::test]
    async fn protected_constraint_falls_back_when_it_would_empty_the_set() {
        let view = view_protecting("10.0.0.1").await;
        let protected = instance("i-1", "10.0.0.1");
        let candidates = vec![&protected];

        let out = ProtectedConstraint.filter(&candidates, &view);
        assert_eq!(out, candidates);
    }

    #[tokio::test]
    async fn filter_framework_constraint_drops_matching_framework() {
        let view = view_protecting("10.0.0.1").await;
        let on_marathon = instance("i-1", "10.0.0.1");
        let elsewhere = instance("i-2", "10.0.0.2");
        let candidates = vec![&on_marathon, &elsewhere];

        let constraint = FilterFrameworkConstraint {
            framework: "marathon".to_string(),
        };
        let out = constraint.filter(&candidates, &view);
        assert_eq!(out, vec![&elsewhere]);
    }

    #[tokio::test]
    async fn task_name_regexp_constraint_drops_matching_task_names() {
        let view = view_protecting("10.0.0.1").await;
        let running_app = instance("i-1", "10.0.0.1");
        let candidates = vec![&running_app];

        let constraint = TaskNameRegexpConstraint {
            regex: Regex::new("^app-").unwrap(),
        };
        let out = constraint.filter(&candidates, &view);
        assert_eq!(out, candidates, "fallback applies: filtering would empty the set");
    }

    #[tokio::test]
    async fn pipeline_composes_constraints_in_order() {
        let view = view_protecting("10.0.0.1").await;
        let protected = instance("i-1", "10.0.0.1");
        let free = instance("i-2", "10.0.0.2");
        let candidates = vec![&protected, &free];

        let pipeline = ConstraintPipeline::new(vec![
            NoConstraint.into(),
            ProtectedConstraint.into(),
        ]);
        let out = pipeline.apply(&candidates, &view);
        assert_eq!(out, vec![&free]);
    }
}
