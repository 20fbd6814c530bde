//! Round, epoch and validator identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A consensus round within an epoch.
///
/// Rounds are epoch-scoped: every epoch starts over at `Round::initial()`,
/// which is the round of the epoch-initial vertex. The first proposal of an
/// epoch is made in round 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Round(pub u64);

impl Round {
    pub const fn initial() -> Self {
        Round(0)
    }

    pub const fn of(number: u64) -> Self {
        Round(number)
    }

    pub fn number(&self) -> u64 {
        self.0
    }

    pub fn is_initial(&self) -> bool {
        self.0 == 0
    }

    pub fn next(&self) -> Round {
        Round(self.0 + 1)
    }

    pub fn previous(&self) -> Round {
        Round(self.0.saturating_sub(1))
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Round({})", self.0)
    }
}

/// A consensus epoch. The validator set is fixed for the duration of an epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Epoch(pub u64);

impl Epoch {
    pub const GENESIS: Epoch = Epoch(0);

    pub const fn of(number: u64) -> Self {
        Epoch(number)
    }

    pub fn number(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Epoch {
        Epoch(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({})", self.0)
    }
}

/// Stable identifier of a validator within an epoch's validator set.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ValidatorId(pub u64);

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validator({})", self.0)
    }
}
