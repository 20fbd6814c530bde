//! Opaque transaction payloads.

use crate::hash::Hash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque payload unit carried by vertices. Consensus orders transactions;
/// it never interprets them.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction(pub Vec<u8>);

impl Transaction {
    pub fn hash(&self) -> Hash {
        Hash::of(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transaction({:?}, {} bytes)", self.hash(), self.0.len())
    }
}
