//! Core types for the keystone consensus engine.
//!
//! Everything here is plain data: content-addressed hashes, ed25519 keys and
//! signatures, rounds and epochs, validator sets, vertices, votes and the
//! certificates assembled from them. Protocol logic lives in `keystone-bft`;
//! these types carry no behavior beyond construction, accessors and hashing.

pub mod certificates;
pub mod crypto;
pub mod hash;
pub mod identifiers;
pub mod ledger;
pub mod safety;
pub mod signing;
pub mod transaction;
pub mod validator;
pub mod vertex;
pub mod vote;

pub mod test_utils;

pub use certificates::{HighQc, QuorumCertificate, TimeoutCertificate, TimestampedSignature};
pub use crypto::{CryptoError, KeyPair, PublicKey, Signature};
pub use hash::{Hash, HashParseError};
pub use identifiers::{Epoch, Round, ValidatorId};
pub use ledger::LedgerHeader;
pub use safety::SafetyState;
pub use transaction::Transaction;
pub use validator::{ValidationState, ValidatorInfo, ValidatorSet};
pub use vertex::{ExecutedVertex, Vertex, VertexWithHash};
pub use vote::{BftHeader, Vote, VoteData};
