//! A FIFO transaction pool.
//!
//! Transactions are deduplicated by hash, bounded in number, and handed to
//! proposals in submission order. Commits remove the included transactions.

use keystone_core::TransactionSource;
use keystone_types::{Hash, Transaction};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Maximum transactions held; further submissions are rejected.
    pub max_transactions: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            max_transactions: 10_000,
        }
    }
}

#[derive(Default)]
pub struct Mempool {
    config: MempoolConfig,
    transactions: HashMap<Hash, Transaction>,
    order: VecDeque<Hash>,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Mempool {
            config,
            transactions: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns false when the pool is full or the transaction is already
    /// present.
    pub fn add(&mut self, transaction: Transaction) -> bool {
        if self.transactions.len() >= self.config.max_transactions {
            debug!("Mempool full, rejecting transaction");
            return false;
        }
        let hash = transaction.hash();
        if self.transactions.contains_key(&hash) {
            return false;
        }
        self.transactions.insert(hash, transaction);
        self.order.push_back(hash);
        trace!(?hash, pending = self.transactions.len(), "Transaction added");
        true
    }

    /// Drop transactions that were committed as part of a vertex payload.
    pub fn remove_committed(&mut self, hashes: &[Hash]) {
        if hashes.is_empty() {
            return;
        }
        for hash in hashes {
            self.transactions.remove(hash);
        }
        self.order.retain(|h| self.transactions.contains_key(h));
        trace!(
            removed = hashes.len(),
            pending = self.transactions.len(),
            "Committed transactions removed"
        );
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.transactions.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

impl TransactionSource for Mempool {
    fn transactions_for_proposal(&self, max: usize, exclude: &HashSet<Hash>) -> Vec<Transaction> {
        self.order
            .iter()
            .filter(|hash| !exclude.contains(hash))
            .filter_map(|hash| self.transactions.get(hash))
            .take(max)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(data: &str) -> Transaction {
        Transaction(data.as_bytes().to_vec())
    }

    #[test]
    fn test_add_deduplicates() {
        let mut pool = Mempool::new(MempoolConfig::default());
        assert!(pool.add(tx("a")));
        assert!(!pool.add(tx("a")));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_full_pool_rejects() {
        let mut pool = Mempool::new(MempoolConfig {
            max_transactions: 2,
        });
        assert!(pool.add(tx("a")));
        assert!(pool.add(tx("b")));
        assert!(!pool.add(tx("c")));
    }

    #[test]
    fn test_proposal_order_is_submission_order() {
        let mut pool = Mempool::new(MempoolConfig::default());
        pool.add(tx("first"));
        pool.add(tx("second"));
        pool.add(tx("third"));

        let picked = pool.transactions_for_proposal(2, &HashSet::new());
        assert_eq!(picked, vec![tx("first"), tx("second")]);
    }

    #[test]
    fn test_proposal_skips_excluded() {
        let mut pool = Mempool::new(MempoolConfig::default());
        pool.add(tx("pending"));
        pool.add(tx("fresh"));

        let exclude: HashSet<Hash> = [tx("pending").hash()].into();
        let picked = pool.transactions_for_proposal(10, &exclude);
        assert_eq!(picked, vec![tx("fresh")]);
    }

    #[test]
    fn test_remove_committed() {
        let mut pool = Mempool::new(MempoolConfig::default());
        pool.add(tx("a"));
        pool.add(tx("b"));
        pool.remove_committed(&[tx("a").hash()]);

        assert_eq!(pool.len(), 1);
        assert!(!pool.contains(&tx("a").hash()));
        let picked = pool.transactions_for_proposal(10, &HashSet::new());
        assert_eq!(picked, vec![tx("b")]);
    }
}
