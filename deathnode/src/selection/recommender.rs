use deathnode_core::config::RecommenderSpec;
use deathnode_core::instance::Instance;
use enum_dispatch::enum_dispatch;

/// Picks one instance from an already-filtered candidate list.
#[enum_dispatch(RecommenderImplementation)]
pub trait Recommender {
    fn recommend<'a>(&self, candidates: &[&'a Instance]) -> Option<&'a Instance>;
}

pub struct FirstAvailableAgent;

impl Recommender for FirstAvailableAgent {
    fn recommend<'a>(&self, candidates: &[&'a Instance]) -> Option<&'a Instance> {
        candidates.first().copied()
    }
}

pub struct SmallestInstanceId;

impl Recommender for SmallestInstanceId {
    fn recommend<'a>(&self, candidates: &[&'a Instance]) -> Option<&'a Instance> {
        candidates
            .iter()
            .copied()
            .min_by(|a, b| a.instance_id.cmp(&b.instance_id))
    }
}

#[enum_dispatch]
pub enum RecommenderImplementation {
    FirstAvailableAgent(FirstAvailableAgent),
    SmallestInstanceId(SmallestInstanceId),
}

impl From<RecommenderSpec> for RecommenderImplementation {
    fn from(spec: RecommenderSpec) -> Self {
        match spec {
            RecommenderSpec::FirstAvailableAgent => FirstAvailableAgent.into(),
            RecommenderSpec::SmallestInstanceId => SmallestInstanceId.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str) -> Instance {
        Instance::new(id.to_string(), "10.0.0.1".to_string(), "group-a".to_string())
    }

    #[test]
    fn first_available_agent_returns_the_first_candidate() {
        let a = instance("i-2");
        let b = instance("i-1");
        let candidates = vec![&a, &b];

        let picked = FirstAvailableAgent.recommend(&candidates);
        assert_eq!(picked.unwrap().instance_id, "i-2");
    }

    #[test]
    fn first_available_agent_returns_none_for_empty_candidates() {
        let candidates: Vec<&Instance> = vec![];
        assert!(FirstAvailableAgent.recommend(&candidates).is_none());
    }

    #[test]
    fn smallest_instance_id_picks_the_lexicographically_smallest() {
        let a = instance("i-9");
        let b = instance("i-10");
        let c = instance("i-2");
        let candidates = vec![&a, &b, &c];

        let picked = SmallestInstanceId.recommend(&candidates);
        // Lexicographic: "i-10" < "i-2" < "i-9".
        assert_eq!(picked.unwrap().instance_id, "i-10");
    }
}
