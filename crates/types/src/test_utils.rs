//! Deterministic fixtures shared by tests across the workspace.

use crate::crypto::KeyPair;
use crate::identifiers::ValidatorId;
use crate::validator::{ValidatorInfo, ValidatorSet};

/// A keypair derived from a small index, stable across runs.
pub fn deterministic_keypair(index: u64) -> KeyPair {
    let mut seed = [0u8; 32];
    seed[..8].copy_from_slice(&index.to_le_bytes());
    seed[31] = 0x4b;
    KeyPair::from_seed(seed)
}

/// `n` validators with ids 0..n and voting power 1 each, plus their keys
/// (indexed by validator id).
pub fn validator_set(n: usize) -> (Vec<KeyPair>, ValidatorSet) {
    weighted_validator_set(&vec![1; n])
}

/// Validators with the given voting powers, ids assigned in order.
pub fn weighted_validator_set(powers: &[u64]) -> (Vec<KeyPair>, ValidatorSet) {
    let keys: Vec<KeyPair> = (0..powers.len() as u64).map(deterministic_keypair).collect();
    let validators = keys
        .iter()
        .zip(powers)
        .enumerate()
        .map(|(i, (keys, &voting_power))| ValidatorInfo {
            id: ValidatorId(i as u64),
            public_key: keys.public_key(),
            voting_power,
        })
        .collect();
    (keys, ValidatorSet::new(validators))
}
