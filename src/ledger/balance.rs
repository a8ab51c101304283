use dashmap::DashMap;

use super::block::Block;
use super::crypto::Address;
use super::transaction::Origin;

/// The derived balance index: address to signed balance.
///
/// Owned exclusively by the ledger. Balances are a memoized derivation of
/// the chain, not a source of truth: `rebuild` recomputes the whole index
/// from the chain alone, and `apply_block` keeps it current incrementally as
/// blocks are appended.
#[derive(Debug, Default)]
pub struct BalanceIndex {
    accounts: DashMap<Address, i64>,
}

impl BalanceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The confirmed balance of an address; zero when never seen
    pub fn get(&self, address: &Address) -> i64 {
        self.accounts.get(address).map(|entry| *entry).unwrap_or(0)
    }

    /// Sets an address balance directly. Used when restoring a persisted
    /// snapshot.
    pub fn set(&self, address: Address, balance: i64) {
        self.accounts.insert(address, balance);
    }

    /// Applies the balance deltas of a finalized block: debit the sender,
    /// credit the recipient, for every contained transaction
    pub fn apply_block(&self, block: &Block) {
        for tx in &block.transactions {
            if let Origin::User(from) = &tx.origin {
                *self.accounts.entry(from.clone()).or_insert(0) -= tx.amount as i64;
            }

            *self.accounts.entry(tx.to.clone()).or_insert(0) += tx.amount as i64;
        }
    }

    /// Discards the index and refolds it over the full chain
    pub fn rebuild(&self, chain: &[Block]) {
        self.accounts.clear();

        for block in chain {
            self.apply_block(block);
        }
    }

    /// A snapshot of every tracked address and its balance, sorted by
    /// address for deterministic output
    pub fn snapshot(&self) -> Vec<(Address, i64)> {
        let mut entries: Vec<(Address, i64)> = self
            .accounts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::transaction::Transaction;

    fn addr(s: &str) -> Address {
        Address(s.to_string())
    }

    #[test]
    fn test_unknown_address_is_zero() {
        let index = BalanceIndex::new();
        assert_eq!(index.get(&addr("nobody")), 0);
    }

    #[test]
    fn test_apply_block_credits_and_debits() {
        let index = BalanceIndex::new();

        let transfer = Transaction::new(addr("alice"), addr("bob"), 400);
        let block = Block::new(
            1,
            vec![Transaction::mint(addr("alice"), 1000), transfer],
            "prev".to_string(),
        );

        index.apply_block(&block);

        assert_eq!(index.get(&addr("alice")), 600);
        assert_eq!(index.get(&addr("bob")), 400);
    }

    #[test]
    fn test_rebuild_matches_incremental_application() {
        let incremental = BalanceIndex::new();
        let rebuilt = BalanceIndex::new();

        let blocks = vec![
            Block::genesis(),
            Block::new(
                1,
                vec![
                    Transaction::mint(addr("alice"), 1000),
                    Transaction::reward(addr("bob"), 100),
                ],
                "prev".to_string(),
            ),
            Block::new(
                2,
                vec![Transaction::new(addr("alice"), addr("carol"), 250)],
                "prev".to_string(),
            ),
        ];

        for block in &blocks {
            incremental.apply_block(block);
        }
        rebuilt.rebuild(&blocks);

        assert_eq!(incremental.snapshot(), rebuilt.snapshot());
        assert_eq!(rebuilt.get(&addr("alice")), 750);
        assert_eq!(rebuilt.get(&addr("carol")), 250);
    }
}
