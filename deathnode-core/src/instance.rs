use strum::{Display, EnumString};

use crate::{GroupName, InstanceId};

/// Where an instance sits in the cloud's own termination lifecycle.
///
/// `TerminatingWait` is the state the cloud's lifecycle hook holds an
/// instance in until Deathnode calls `complete_lifecycle_action`.
#[derive(Clone, Copy, Debug, Default, Display, EnumString, PartialEq, Eq)]
#[strum(serialize_all = "PascalCase")]
pub enum LifecycleState {
    #[default]
    InService,
    TerminatingWait,
    /// Anything the cloud reports that isn't one of the two states above
    /// (e.g. `Pending`, `Terminating`, `Terminated`).
    #[strum(default)]
    Other(String),
}

/// A cloud VM participating in the monitored fleet.
///
/// `retirement_timestamp > 0` iff the instance carries the configured
/// retirement tag; this mirrors the cloud-tag ground truth rather than
/// being independently authoritative (see `is_marked_to_be_removed`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instance {
    pub instance_id: InstanceId,
    pub private_ip: String,
    pub lifecycle_state: LifecycleState,
    pub group_id: GroupName,
    pub is_protected: bool,
    pub retirement_timestamp: i64,
}

impl Instance {
    pub fn new(instance_id: InstanceId, private_ip: String, group_id: GroupName) -> Self {
        Self {
            instance_id,
            private_ip,
            lifecycle_state: LifecycleState::default(),
            group_id,
            is_protected: false,
            retirement_timestamp: 0,
        }
    }

    pub fn is_marked_to_be_removed(&self) -> bool {
        self.retirement_timestamp > 0
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, false)]
    #[case(-1, false)]
    #[case(1, true)]
    #[case(1_700_000_000, true)]
    fn is_marked_to_be_removed_matches_timestamp_sign(
        #[case] retirement_timestamp: i64,
        #[case] expected: bool,
    ) {
        let mut instance = Instance::new("i-1".into(), "10.0.0.1".into(), "group-a".into());
        instance.retirement_timestamp = retirement_timestamp;
        assert_eq!(instance.is_marked_to_be_removed(), expected);
    }
}
