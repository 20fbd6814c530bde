//! Validator sets and quorum accounting.

use crate::certificates::TimestampedSignature;
use crate::crypto::PublicKey;
use crate::identifiers::ValidatorId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub id: ValidatorId,
    pub public_key: PublicKey,
    pub voting_power: u64,
}

/// The validator set of one epoch, sorted by validator id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: Vec<ValidatorInfo>,
}

impl ValidatorSet {
    pub fn new(mut validators: Vec<ValidatorInfo>) -> Self {
        validators.sort_by_key(|v| v.id);
        validators.dedup_by_key(|v| v.id);
        ValidatorSet { validators }
    }

    pub fn get(&self, id: ValidatorId) -> Option<&ValidatorInfo> {
        self.validators
            .binary_search_by_key(&id, |v| v.id)
            .ok()
            .map(|i| &self.validators[i])
    }

    pub fn contains(&self, id: ValidatorId) -> bool {
        self.get(id).is_some()
    }

    pub fn public_key(&self, id: ValidatorId) -> Option<PublicKey> {
        self.get(id).map(|v| v.public_key)
    }

    pub fn voting_power(&self, id: ValidatorId) -> u64 {
        self.get(id).map(|v| v.voting_power).unwrap_or(0)
    }

    pub fn total_voting_power(&self) -> u64 {
        self.validators.iter().map(|v| v.voting_power).sum()
    }

    /// Minimum voting power a quorum must carry: strictly more than 2/3 of
    /// the total.
    pub fn quorum_threshold(&self) -> u64 {
        (self.total_voting_power() * 2) / 3 + 1
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidatorInfo> {
        self.validators.iter()
    }
}

/// Accumulates signatures from distinct validators toward the quorum
/// threshold. A validator's signature is only ever counted once; replacing a
/// signature requires removing the old one first.
#[derive(Debug, Clone, Default)]
pub struct ValidationState {
    signatures: BTreeMap<ValidatorId, TimestampedSignature>,
    accumulated_power: u64,
}

impl ValidationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the author is not a member of the set. Inserting the
    /// same author again overwrites the stored signature without
    /// double-counting its power.
    pub fn add_signature(
        &mut self,
        set: &ValidatorSet,
        author: ValidatorId,
        signature: TimestampedSignature,
    ) -> bool {
        let Some(info) = set.get(author) else {
            return false;
        };
        if self.signatures.insert(author, signature).is_none() {
            self.accumulated_power += info.voting_power;
        }
        true
    }

    pub fn remove_signature(&mut self, set: &ValidatorSet, author: ValidatorId) {
        if self.signatures.remove(&author).is_some() {
            self.accumulated_power -= set.voting_power(author);
        }
    }

    pub fn complete(&self, set: &ValidatorSet) -> bool {
        self.accumulated_power >= set.quorum_threshold()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn accumulated_power(&self) -> u64 {
        self.accumulated_power
    }

    pub fn signatures(&self) -> &BTreeMap<ValidatorId, TimestampedSignature> {
        &self.signatures
    }

    pub fn into_signatures(self) -> BTreeMap<ValidatorId, TimestampedSignature> {
        self.signatures
    }
}
