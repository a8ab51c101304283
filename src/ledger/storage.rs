use sled::{Db, Tree};
use thiserror::Error;

use std::path::Path;

use super::balance::BalanceIndex;
use super::block::Block;
use super::crypto::Address;
use super::transaction::Transaction;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

/// Persistent storage for the ledger.
///
/// The chain is stored as an ordered list of block records keyed by
/// big-endian block index, so iterating the tree yields chain order
/// directly. Pending transactions are keyed by queue position the same way,
/// and the balance snapshot maps address bytes to an encoded balance.
/// Loading reconstructs real `Block` and `Transaction` values, so their
/// hash methods stay callable after a restart.
pub struct LedgerStore {
    /// The database instance
    db: Db,

    /// Tree for the block records
    blocks: Tree,

    /// Tree for the pending queue
    pending: Tree,

    /// Tree for the balance snapshot
    balances: Tree,
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore").finish()
    }
}

impl LedgerStore {
    /// Opens (or creates) a store at the given directory
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;

        let blocks = db.open_tree("blocks")?;
        let pending = db.open_tree("pending")?;
        let balances = db.open_tree("balances")?;

        Ok(Self {
            db,
            blocks,
            pending,
            balances,
        })
    }

    /// Saves the full ledger state: every block, the pending queue, and the
    /// balance snapshot, then flushes to disk
    pub fn save(
        &self,
        chain: &[Block],
        pending: &[Transaction],
        balances: &BalanceIndex,
    ) -> Result<(), StorageError> {
        for block in chain {
            let key = block.index.to_be_bytes();
            let value = bincode::serialize(block)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;

            self.blocks.insert(key, value)?;
        }

        self.pending.clear()?;
        for (position, tx) in pending.iter().enumerate() {
            let key = (position as u64).to_be_bytes();
            let value = bincode::serialize(tx)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;

            self.pending.insert(key, value)?;
        }

        self.balances.clear()?;
        for (address, balance) in balances.snapshot() {
            let value = bincode::serialize(&balance)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;

            self.balances.insert(address.0.as_bytes(), value)?;
        }

        self.db.flush()?;
        Ok(())
    }

    /// Loads the saved ledger state, or `None` when the store is empty
    ///
    /// # Returns
    ///
    /// The chain in index order, the pending queue in submission order, and
    /// the balance snapshot
    #[allow(clippy::type_complexity)]
    pub fn load(
        &self,
    ) -> Result<Option<(Vec<Block>, Vec<Transaction>, Vec<(Address, i64)>)>, StorageError> {
        if self.blocks.is_empty() {
            return Ok(None);
        }

        let mut chain = Vec::new();
        for result in self.blocks.iter() {
            let (_, value) = result?;
            let block: Block = bincode::deserialize(&value)
                .map_err(|e| StorageError::DeserializationError(e.to_string()))?;

            chain.push(block);
        }

        let mut pending = Vec::new();
        for result in self.pending.iter() {
            let (_, value) = result?;
            let tx: Transaction = bincode::deserialize(&value)
                .map_err(|e| StorageError::DeserializationError(e.to_string()))?;

            pending.push(tx);
        }

        let mut balances = Vec::new();
        for result in self.balances.iter() {
            let (key, value) = result?;
            let address = String::from_utf8(key.to_vec())
                .map_err(|e| StorageError::CorruptRecord(e.to_string()))?;
            let balance: i64 = bincode::deserialize(&value)
                .map_err(|e| StorageError::DeserializationError(e.to_string()))?;

            balances.push((Address(address), balance));
        }

        Ok(Some((chain, pending, balances)))
    }
}
