use std::collections::{HashSet, VecDeque};

use log::debug;

use crate::common::Hash;
use crate::tx::Transaction;

/// Pending transactions in arrival order, de-duplicated by transaction id.
#[derive(Default)]
pub struct Mempool {
    queue: VecDeque<(Hash, Transaction)>,
    known: HashSet<Hash>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transaction. Returns its id, or `None` if it is already pending.
    pub fn add(&mut self, tx: Transaction) -> Option<Hash> {
        let tx_id = tx.tx_id();
        if !self.known.insert(tx_id.clone()) {
            debug!("tx {} already in mempool", tx_id);
            return None
        }
        self.queue.push_back((tx_id.clone(), tx));
        Some(tx_id)
    }

    pub fn contains(&self, tx_id: &Hash) -> bool {
        self.known.contains(tx_id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Transaction> {
        self.queue.iter().map(|(_, tx)| tx)
    }

    /// Take every pending transaction, oldest first.
    pub fn drain(&mut self) -> Vec<(Hash, Transaction)> {
        self.known.clear();
        self.queue.drain(..).collect()
    }
}

#[test]
fn test_mempool_dedup() {
    let tx = |nonce| Transaction::new(nonce, 0, vec![]);
    let mut pool = Mempool::new();
    let h1 = pool.add(tx(1)).unwrap();
    assert!(pool.add(tx(1)).is_none());
    let h2 = pool.add(tx(2)).unwrap();
    assert_eq!(pool.len(), 2);
    assert!(pool.contains(&h1));
    let drained: Vec<_> = pool.drain().into_iter().map(|(h, _)| h).collect();
    assert_eq!(drained, vec![h1.clone(), h2]);
    assert!(pool.is_empty());
    assert!(pool.add(tx(1)).is_some());
}
