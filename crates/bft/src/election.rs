//! Deterministic leader election.

use keystone_types::{Round, ValidatorId, ValidatorSet};

/// Maps every round to its leader. Implementations must be pure: every
/// validator evaluates the same function and must reach the same answer
/// without communication.
pub trait ProposerElection: Send {
    fn leader_for(&self, round: Round) -> ValidatorId;
}

/// Plain round-robin over the sorted validator ids, ignoring stake.
pub struct RotatingLeaders {
    ids: Vec<ValidatorId>,
}

impl RotatingLeaders {
    pub fn new(set: &ValidatorSet) -> Self {
        RotatingLeaders {
            ids: set.iter().map(|v| v.id).collect(),
        }
    }
}

impl ProposerElection for RotatingLeaders {
    fn leader_for(&self, round: Round) -> ValidatorId {
        self.ids[(round.number() % self.ids.len() as u64) as usize]
    }
}

/// Stake-weighted rotation: each validator owns a share of leader slots
/// proportional to its voting power. Rounds are scattered over the slot space
/// with a fixed odd multiplier so consecutive rounds don't map to consecutive
/// slots of the same heavy validator.
pub struct WeightedRotatingLeaders {
    // (cumulative power end-exclusive, id), zero-power validators excluded
    cumulative: Vec<(u64, ValidatorId)>,
    total_power: u64,
}

const ROUND_SCATTER: u64 = 0x9e37_79b9_7f4a_7c15;

impl WeightedRotatingLeaders {
    pub fn new(set: &ValidatorSet) -> Self {
        let mut cumulative = Vec::with_capacity(set.len());
        let mut total_power = 0u64;
        for v in set.iter().filter(|v| v.voting_power > 0) {
            total_power += v.voting_power;
            cumulative.push((total_power, v.id));
        }
        WeightedRotatingLeaders {
            cumulative,
            total_power,
        }
    }
}

impl ProposerElection for WeightedRotatingLeaders {
    fn leader_for(&self, round: Round) -> ValidatorId {
        let slot = round.number().wrapping_mul(ROUND_SCATTER) % self.total_power;
        // First entry whose cumulative end is past the slot.
        let idx = self
            .cumulative
            .partition_point(|(end, _)| *end <= slot);
        self.cumulative[idx].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_types::test_utils::{validator_set, weighted_validator_set};

    #[test]
    fn test_rotating_leaders_cycle() {
        let (_, set) = validator_set(4);
        let election = RotatingLeaders::new(&set);
        assert_eq!(election.leader_for(Round::of(0)), ValidatorId(0));
        assert_eq!(election.leader_for(Round::of(3)), ValidatorId(3));
        assert_eq!(election.leader_for(Round::of(4)), ValidatorId(0));
    }

    #[test]
    fn test_weighted_leaders_deterministic_and_member() {
        let (_, set) = weighted_validator_set(&[5, 1, 3]);
        let a = WeightedRotatingLeaders::new(&set);
        let b = WeightedRotatingLeaders::new(&set);
        for r in 0..100 {
            let leader = a.leader_for(Round::of(r));
            assert_eq!(leader, b.leader_for(Round::of(r)));
            assert!(set.contains(leader));
        }
    }

    #[test]
    fn test_weighted_leaders_skip_zero_power() {
        let (_, set) = weighted_validator_set(&[0, 1, 1]);
        let election = WeightedRotatingLeaders::new(&set);
        for r in 0..50 {
            assert_ne!(election.leader_for(Round::of(r)), ValidatorId(0));
        }
    }

    #[test]
    fn test_weighted_leaders_favor_stake() {
        let (_, set) = weighted_validator_set(&[90, 5, 5]);
        let election = WeightedRotatingLeaders::new(&set);
        let heavy = (0..1000)
            .filter(|&r| election.leader_for(Round::of(r)) == ValidatorId(0))
            .count();
        assert!(heavy > 700, "heavy validator led only {heavy}/1000 rounds");
    }
}
