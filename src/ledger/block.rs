use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::crypto::Address;
use super::transaction::Transaction;

/// Sentinel previous-hash of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Errors that can occur during block operations
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Mining was cancelled before a valid hash was found")]
    MiningCancelled,
}

/// A shared flag that aborts an in-flight proof-of-work search.
///
/// Cancellation is checked between hash attempts, never after a block has
/// been appended, so cancelling is always safe for ledger state.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of the search holding this flag
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A block in the chain: an ordered batch of transactions plus linkage
/// metadata and its own content hash.
///
/// Once appended to the chain a block is immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Transactions in inclusion order
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block; "0" for genesis
    pub previous_hash: String,

    /// Proof-of-work search counter; stays zero under proof of stake
    pub nonce: u64,

    /// The proof-of-stake validator that forged this block; absent under
    /// proof of work
    pub producer: Option<Address>,

    /// Hash of the current block (calculated)
    pub hash: String,
}

impl Block {
    /// Creates a new draft block on top of the given previous hash
    ///
    /// # Arguments
    ///
    /// * `index` - The index of the block in the chain
    /// * `transactions` - The transactions to include, in inclusion order
    /// * `previous_hash` - The hash of the previous block
    pub fn new(index: u64, transactions: Vec<Transaction>, previous_hash: String) -> Self {
        let mut block = Block {
            index,
            timestamp: Utc::now(),
            transactions,
            previous_hash,
            nonce: 0,
            producer: None,
            hash: String::new(),
        };

        block.hash = block.calculate_hash();
        block
    }

    /// Creates the genesis block. Fixed content, so every ledger starts from
    /// the same hash.
    pub fn genesis() -> Self {
        let mut block = Block {
            index: 0,
            timestamp: DateTime::UNIX_EPOCH,
            transactions: vec![Transaction::genesis()],
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            nonce: 0,
            producer: None,
            hash: String::new(),
        };

        block.hash = block.calculate_hash();
        block
    }

    /// Calculates the hash of the block
    ///
    /// Deterministic over the block's fields: no wall-clock reads, no
    /// randomness.
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the block as a hexadecimal string
    pub fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();

        let data = serde_json::json!({
            "index": self.index,
            "timestamp": self.timestamp,
            "transactions": self.transactions,
            "previous_hash": self.previous_hash,
            "nonce": self.nonce,
            "producer": self.producer,
        });

        hasher.update(data.to_string().as_bytes());

        format!("{:x}", hasher.finalize())
    }

    /// Proof-of-work path: increments the nonce and recomputes the hash
    /// until it carries `difficulty` leading zero hex digits.
    ///
    /// The search is CPU-bound and unbounded; expected work multiplies by 16
    /// per difficulty level. The cancel flag is the caller's only way to
    /// impose a timeout.
    pub fn mine(&mut self, difficulty: u8, cancel: &CancelFlag) -> Result<(), BlockError> {
        let target = "0".repeat(difficulty as usize);

        self.hash = self.calculate_hash();
        while !self.hash.starts_with(&target) {
            if cancel.is_cancelled() {
                return Err(BlockError::MiningCancelled);
            }

            self.nonce += 1;
            self.hash = self.calculate_hash();
        }

        Ok(())
    }

    /// Proof-of-stake path: records the producer and computes the hash once
    pub fn forge(&mut self, producer: Address) {
        self.producer = Some(producer);
        self.hash = self.calculate_hash();
    }

    /// Checks that every contained transaction is individually valid.
    /// Short-circuits on the first failure.
    pub fn has_valid_transactions(&self, strict: bool) -> bool {
        self.transactions.iter().all(|tx| tx.is_valid(strict))
    }

    /// Shape check against malformed deserialized data. Not a cryptographic
    /// check.
    pub fn is_valid_structure(&self) -> bool {
        !self.hash.is_empty()
            && !self.previous_hash.is_empty()
            && self
                .transactions
                .iter()
                .all(|tx| !tx.id.is_empty() && !tx.hash.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::crypto::Wallet;

    fn sample_transactions() -> Vec<Transaction> {
        vec![
            Transaction::mint(Address("alice".to_string()), 10),
            Transaction::mint(Address("bob".to_string()), 20),
        ]
    }

    #[test]
    fn test_new_block() {
        let block = Block::new(1, sample_transactions(), "previous_hash".to_string());

        assert_eq!(block.index, 1);
        assert_eq!(block.nonce, 0);
        assert_eq!(block.previous_hash, "previous_hash");
        assert!(block.producer.is_none());
        assert!(!block.hash.is_empty());
    }

    #[test]
    fn test_hash_is_idempotent() {
        let block = Block::new(1, sample_transactions(), "previous_hash".to_string());

        assert_eq!(block.calculate_hash(), block.calculate_hash());
        assert_eq!(block.hash, block.calculate_hash());
    }

    #[test]
    fn test_changing_any_field_changes_hash() {
        let block = Block::new(1, sample_transactions(), "previous_hash".to_string());
        let original = block.hash.clone();

        let mut tampered = block.clone();
        tampered.nonce += 1;
        assert_ne!(tampered.calculate_hash(), original);

        let mut tampered = block.clone();
        tampered.producer = Some(Address("mallory".to_string()));
        assert_ne!(tampered.calculate_hash(), original);

        let mut tampered = block.clone();
        tampered.transactions[0].amount = 999;
        assert_ne!(tampered.calculate_hash(), original);
    }

    #[test]
    fn test_mine_meets_difficulty() {
        let mut block = Block::new(1, sample_transactions(), "previous_hash".to_string());

        block.mine(2, &CancelFlag::new()).unwrap();

        assert!(block.hash.starts_with("00"));
        assert_eq!(block.hash, block.calculate_hash());
    }

    #[test]
    fn test_mine_zero_difficulty_terminates_immediately() {
        let mut block = Block::new(1, sample_transactions(), "previous_hash".to_string());

        block.mine(0, &CancelFlag::new()).unwrap();

        assert_eq!(block.nonce, 0);
    }

    #[test]
    fn test_mine_respects_cancellation() {
        let mut block = Block::new(1, sample_transactions(), "previous_hash".to_string());

        let cancel = CancelFlag::new();
        cancel.cancel();

        // Difficulty high enough that the initial hash will not satisfy it
        let result = block.mine(16, &cancel);
        assert!(matches!(result, Err(BlockError::MiningCancelled)));
    }

    #[test]
    fn test_forge_sets_producer_and_hash() {
        let mut block = Block::new(1, sample_transactions(), "previous_hash".to_string());
        let producer = Address("validator-1".to_string());

        block.forge(producer.clone());

        assert_eq!(block.producer, Some(producer));
        assert_eq!(block.nonce, 0);
        assert_eq!(block.hash, block.calculate_hash());
    }

    #[test]
    fn test_has_valid_transactions() {
        let mut block = Block::new(1, sample_transactions(), "previous_hash".to_string());
        assert!(block.has_valid_transactions(true));

        // An unsigned transfer invalidates the whole block
        let sender = Wallet::new().unwrap();
        block.transactions.push(Transaction::new(
            sender.address().clone(),
            Address("carol".to_string()),
            5,
        ));
        assert!(!block.has_valid_transactions(false));
    }

    #[test]
    fn test_genesis_is_deterministic() {
        assert_eq!(Block::genesis().hash, Block::genesis().hash);
        assert_eq!(Block::genesis().previous_hash, GENESIS_PREVIOUS_HASH);
    }
}
