use std::str::FromStr;

use snafu::{ResultExt, Snafu};
use url::Url;

fn default_deathnode_mark() -> String {
    "DEATH_NODE_MARK".to_string()
}

fn default_polling_seconds() -> u64 {
    60
}

fn default_lifecycle_hook_timeout_seconds() -> u64 {
    3600
}

fn default_heartbeat_threshold_fraction() -> f64 {
    0.95
}

/// One entry of the closed constraint set. Parsed from a CLI value of
/// the shape `name` or `name=parameter`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConstraintSpec {
    NoConstraint,
    ProtectedConstraint,
    FilterFrameworkConstraint { framework: String },
    TaskNameRegexpConstraint { regex: String },
}

#[derive(Snafu, Debug)]
pub enum ParseConstraintError {
    #[snafu(display("unknown constraint {name:?}"))]
    UnknownConstraint { name: String },

    #[snafu(display("constraint {name:?} requires a parameter, e.g. {name}=value"))]
    MissingParameter { name: String },
}

impl FromStr for ConstraintSpec {
    type Err = ParseConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, param) = match s.split_once('=') {
            Some((name, param)) => (name, Some(param)),
            None => (s, None),
        };

        match name {
            "no_constraint" => Ok(Self::NoConstraint),
            "protected_constraint" => Ok(Self::ProtectedConstraint),
            "filter_framework_constraint" => Ok(Self::FilterFrameworkConstraint {
                framework: param.context(MissingParameterSnafu { name })?.to_string(),
            }),
            "task_name_regexp_constraint" => Ok(Self::TaskNameRegexpConstraint {
                regex: param.context(MissingParameterSnafu { name })?.to_string(),
            }),
            _ => UnknownConstraintSnafu { name }.fail(),
        }
    }
}

/// One entry of the closed recommender set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecommenderSpec {
    #[default]
    FirstAvailableAgent,
    SmallestInstanceId,
}

#[derive(Snafu, Debug)]
#[snafu(display("unknown recommender {name:?}"))]
pub struct ParseRecommenderError {
    name: String,
}

impl FromStr for RecommenderSpec {
    type Err = ParseRecommenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first_available_agent" => Ok(Self::FirstAvailableAgent),
            "smallest_instance_id" => Ok(Self::SmallestInstanceId),
            _ => ParseRecommenderSnafu { name: s }.fail(),
        }
    }
}

/// Unvalidated configuration as collected from the CLI. Lives in `core` (no
/// `clap` dependency) so it can be constructed and validated in tests without
/// pulling in argument parsing; the binary crate's `Args` maps into this.
#[derive(Clone, Debug, Default)]
pub struct ConfigInput {
    pub cluster_manager_url: String,
    pub group_prefixes: Vec<String>,
    pub protected_frameworks: Vec<String>,
    pub protected_task_labels: Vec<String>,
    pub constraints: Vec<String>,
    pub recommender: String,
    pub deathnode_mark: String,
    pub polling_seconds: u64,
    pub delay_delete_seconds: u64,
    pub lifecycle_hook_timeout_seconds: u64,
    pub heartbeat_threshold_fraction: f64,
    pub reset_lifecycle: bool,
    pub debug: bool,
}

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("clusterManagerUrl {url:?} is not a valid URL"))]
    InvalidClusterManagerUrl { url: String, source: url::ParseError },

    #[snafu(display("at least one groupPrefix is required"))]
    EmptyGroupPrefixes,

    #[snafu(display("at least one protectedFramework is required"))]
    EmptyProtectedFrameworks,

    #[snafu(display("at least one constraint is required"))]
    EmptyConstraints,

    #[snafu(display("invalid constraint {raw:?}"))]
    InvalidConstraint {
        raw: String,
        source: ParseConstraintError,
    },

    #[snafu(display("invalid recommenderType {raw:?}"))]
    InvalidRecommender {
        raw: String,
        source: ParseRecommenderError,
    },
}

/// Validated, ready-to-use configuration. Construction is the only
/// place "unknown constraint/recommender name" or "missing required flag" is
/// detected; once built, every field is known-good.
#[derive(Clone, Debug)]
pub struct Config {
    pub cluster_manager_url: Url,
    pub group_prefixes: Vec<String>,
    pub protected_frameworks: Vec<String>,
    pub protected_task_labels: Vec<String>,
    pub constraints: Vec<ConstraintSpec>,
    pub recommender: RecommenderSpec,
    pub deathnode_mark: String,
    pub polling_seconds: u64,
    pub delay_delete_seconds: u64,
    pub lifecycle_hook_timeout_seconds: u64,
    pub heartbeat_threshold_fraction: f64,
    pub reset_lifecycle: bool,
    pub debug: bool,
}

impl TryFrom<ConfigInput> for Config {
    type Error = Error;

    fn try_from(input: ConfigInput) -> Result<Self, Self::Error> {
        if input.group_prefixes.is_empty() {
            return EmptyGroupPrefixesSnafu.fail();
        }
        if input.protected_frameworks.is_empty() {
            return EmptyProtectedFrameworksSnafu.fail();
        }
        if input.constraints.is_empty() {
            return EmptyConstraintsSnafu.fail();
        }

        let cluster_manager_url =
            Url::parse(&input.cluster_manager_url).context(InvalidClusterManagerUrlSnafu {
                url: input.cluster_manager_url.clone(),
            })?;

        let constraints = input
            .constraints
            .iter()
            .map(|raw| {
                raw.parse::<ConstraintSpec>()
                    .context(InvalidConstraintSnafu { raw: raw.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let recommender = if input.recommender.is_empty() {
            RecommenderSpec::default()
        } else {
            input
                .recommender
                .parse::<RecommenderSpec>()
                .context(InvalidRecommenderSnafu {
                    raw: input.recommender.clone(),
                })?
        };

        let deathnode_mark = if input.deathnode_mark.is_empty() {
            default_deathnode_mark()
        } else {
            input.deathnode_mark
        };

        Ok(Self {
            cluster_manager_url,
            group_prefixes: input.group_prefixes,
            protected_frameworks: input.protected_frameworks,
            protected_task_labels: input.protected_task_labels,
            constraints,
            recommender,
            deathnode_mark,
            polling_seconds: if input.polling_seconds == 0 {
                default_polling_seconds()
            } else {
                input.polling_seconds
            },
            delay_delete_seconds: input.delay_delete_seconds,
            lifecycle_hook_timeout_seconds: if input.lifecycle_hook_timeout_seconds == 0 {
                default_lifecycle_hook_timeout_seconds()
            } else {
                input.lifecycle_hook_timeout_seconds
            },
            heartbeat_threshold_fraction: if input.heartbeat_threshold_fraction == 0.0 {
                default_heartbeat_threshold_fraction()
            } else {
                input.heartbeat_threshold_fraction
            },
            reset_lifecycle: input.reset_lifecycle,
            debug: input.debug,
        })
    }
}
