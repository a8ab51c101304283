use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use super::crypto::{verify_signature, Address, CryptoError, DigitalSignature, Wallet};

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Transaction not signed")]
    NotSigned,

    #[error("Transaction already signed")]
    AlreadySigned,

    #[error("Wallet address does not match the transaction sender")]
    SignerMismatch,

    #[error("Transfer amount must be positive")]
    ZeroAmount,

    #[error("Invalid sender or recipient address")]
    InvalidAddress,

    #[error("A transfer cannot originate from the system")]
    SystemTransfer,

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// The origin of a transaction: a user account, or the system itself.
///
/// System origin is reserved for supply-creating transactions (mint, reward,
/// genesis); those carry no signature and are exempt from verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    System,
    User(Address),
}

impl Origin {
    /// The user address behind this origin, if any
    pub fn address(&self) -> Option<&Address> {
        match self {
            Origin::System => None,
            Origin::User(address) => Some(address),
        }
    }
}

/// The kind of value movement a transaction performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TxType {
    Transfer,
    Mint,
    Reward,
    Genesis,
}

/// A single atomic unit of value transfer or issuance.
///
/// The content hash covers every field including the signature, so it is a
/// pure function of the transaction's current state and is recomputed after
/// any mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Unique identifier for the transaction
    pub id: String,

    /// Who the value moves out of
    pub origin: Origin,

    /// Recipient address
    pub to: Address,

    /// Amount being moved
    pub amount: u64,

    /// The kind of transaction
    #[serde(rename = "type")]
    pub tx_type: TxType,

    /// Timestamp when the transaction was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Digital signature; present only on signed transfers
    pub signature: Option<DigitalSignature>,

    /// Content hash over all of the above
    pub hash: String,
}

impl Transaction {
    fn build(origin: Origin, to: Address, amount: u64, tx_type: TxType) -> Self {
        let mut tx = Transaction {
            id: Uuid::new_v4().to_string(),
            origin,
            to,
            amount,
            tx_type,
            timestamp: Utc::now(),
            signature: None,
            hash: String::new(),
        };

        tx.hash = tx.calculate_hash();
        tx
    }

    /// Creates a new unsigned transfer transaction
    ///
    /// # Arguments
    ///
    /// * `from` - The sender's address
    /// * `to` - The recipient's address
    /// * `amount` - The amount to transfer
    pub fn new(from: Address, to: Address, amount: u64) -> Self {
        Self::build(Origin::User(from), to, amount, TxType::Transfer)
    }

    /// Creates a mint transaction. Minting is one of the only two ways new
    /// supply enters the ledger, the other being block rewards.
    pub fn mint(to: Address, amount: u64) -> Self {
        Self::build(Origin::System, to, amount, TxType::Mint)
    }

    /// Creates a block reward transaction for the given producer
    pub fn reward(to: Address, amount: u64) -> Self {
        Self::build(Origin::System, to, amount, TxType::Reward)
    }

    /// Creates the genesis transaction.
    ///
    /// Fixed id and timestamp so the genesis block hashes identically on
    /// every node start.
    pub fn genesis() -> Self {
        let mut tx = Transaction {
            id: "genesis".to_string(),
            origin: Origin::System,
            to: Address("0".to_string()),
            amount: 0,
            tx_type: TxType::Genesis,
            timestamp: DateTime::UNIX_EPOCH,
            signature: None,
            hash: String::new(),
        };

        tx.hash = tx.calculate_hash();
        tx
    }

    /// Whether this transaction was originated by the system itself
    pub fn is_system(&self) -> bool {
        self.origin == Origin::System
    }

    /// The bytes a transfer signature is computed over: every field except
    /// the signature and the content hash
    pub fn signable_bytes(&self) -> Vec<u8> {
        let data = serde_json::json!({
            "id": self.id,
            "from": self.origin,
            "to": self.to,
            "amount": self.amount,
            "type": self.tx_type,
            "timestamp": self.timestamp,
        });

        data.to_string().into_bytes()
    }

    /// Calculates the content hash of the transaction
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of all fields (including the signature) as a
    /// hexadecimal string
    pub fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();

        let data = serde_json::json!({
            "id": self.id,
            "from": self.origin,
            "to": self.to,
            "amount": self.amount,
            "type": self.tx_type,
            "timestamp": self.timestamp,
            "signature": self.signature,
        });

        hasher.update(data.to_string().as_bytes());

        format!("{:x}", hasher.finalize())
    }

    /// Signs the transaction with a wallet and refreshes the content hash.
    ///
    /// Signing a system-originated transaction is a no-op: mint, reward and
    /// genesis transactions are exempt from signature verification.
    ///
    /// # Arguments
    ///
    /// * `wallet` - The wallet to sign with; must hold the sender's key
    pub fn sign(&mut self, wallet: &Wallet) -> Result<(), TransactionError> {
        let sender = match self.origin.address() {
            Some(address) => address,
            None => return Ok(()),
        };

        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned);
        }

        if wallet.address() != sender {
            return Err(TransactionError::SignerMismatch);
        }

        let message = self.signable_bytes();
        let signature = wallet.sign(&message)?;

        self.signature = Some(signature);
        self.hash = self.calculate_hash();

        Ok(())
    }

    /// Validates the transaction against the admission rules.
    ///
    /// System-originated transactions (mint, reward, genesis) are always
    /// valid. Transfers require a sender, a recipient, a positive amount,
    /// and a signature. With `strict` set, the signature is verified against
    /// the sender's public key; otherwise its presence is enough.
    ///
    /// Cryptographic failures (an address that does not decode to a key, a
    /// malformed signature) surface as `CryptoError`, distinct from plain
    /// validation failures.
    pub fn validate(&self, strict: bool) -> Result<(), TransactionError> {
        if self.tx_type != TxType::Transfer {
            return Ok(());
        }

        let sender = match self.origin.address() {
            Some(address) => address,
            None => return Err(TransactionError::SystemTransfer),
        };

        if sender.0.is_empty() || self.to.0.is_empty() {
            return Err(TransactionError::InvalidAddress);
        }

        if self.amount == 0 {
            return Err(TransactionError::ZeroAmount);
        }

        let signature = match &self.signature {
            Some(signature) => signature,
            None => return Err(TransactionError::NotSigned),
        };

        if strict {
            let public_key = sender.to_public_key()?;
            let verified = verify_signature(&self.signable_bytes(), signature, &public_key)?;

            if !verified {
                return Err(TransactionError::InvalidSignature);
            }
        }

        Ok(())
    }

    /// Pure validity predicate: never panics, never propagates.
    ///
    /// Cryptographic failures count as invalid here; chain validation uses
    /// this to keep diagnostics strictly boolean.
    pub fn is_valid(&self, strict: bool) -> bool {
        self.validate(strict).is_ok()
    }

    /// Constructs and signs a transfer from the given wallet in one step
    pub fn transfer(wallet: &Wallet, to: Address, amount: u64) -> Result<Self, TransactionError> {
        let mut tx = Self::new(wallet.address().clone(), to, amount);
        tx.sign(wallet)?;
        Ok(tx)
    }
}
