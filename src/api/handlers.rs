use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::ledger::{Address, Block, ChainInfo, Ledger, LedgerError, Transaction, Wallet};

/// Shared handle to the ledger state
pub type LedgerData = web::Data<Ledger>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The number of blocks in the chain
    pub height: u64,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's address
    pub from: String,

    /// The recipient's address
    pub to: String,

    /// The amount to transfer
    pub amount: u64,

    /// The sender's private key (for signing)
    pub private_key: String,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// The index of the block that will include this transaction
    pub block_index: u64,
}

/// Request for the produce endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ProduceRequest {
    /// The reward address. Required under proof of work; ignored under
    /// proof of stake, where the producer is drawn by stake weight.
    pub reward_address: Option<String>,
}

/// Response for the produce endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ProduceResponse {
    /// The message
    pub message: String,

    /// The newly produced block
    pub block: Block,
}

/// Request for the mint endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MintRequest {
    /// The address to credit
    pub to: String,

    /// The amount to mint
    pub amount: u64,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    /// The address queried
    pub address: String,

    /// Balance derived from finalized blocks only
    pub confirmed: i64,

    /// Confirmed balance folded with pending transaction effects
    pub projected: i64,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

/// A registered validator and its stake
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidatorEntry {
    /// The validator's address
    pub address: String,

    /// The validator's stake
    pub stake: u64,
}

/// Request for the validator registration endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RegisterValidatorRequest {
    /// The validator's address
    pub address: String,

    /// The stake to register with
    pub stake: u64,
}

fn error_json(err: &LedgerError) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "error": err.to_string()
    }))
}

/// Get the full chain
///
/// Returns every block and the chain's validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Chain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(ledger: LedgerData) -> impl Responder {
    let chain = ledger.chain();
    let is_valid = ledger.is_chain_valid();

    let response = ChainResponse {
        height: chain.len() as u64,
        chain,
        is_valid,
    };

    HttpResponse::Ok().json(response)
}

/// Get a chain summary
///
/// Returns height, difficulty, pending count, total supply and validity
#[utoipa::path(
    get,
    path = "/api/v1/chain/info",
    responses(
        (status = 200, description = "Chain info retrieved successfully", body = ChainInfo)
    )
)]
pub async fn get_chain_info(ledger: LedgerData) -> impl Responder {
    HttpResponse::Ok().json(ledger.chain_info())
}

/// Get a block by index
#[utoipa::path(
    get,
    path = "/api/v1/blocks/{index}",
    responses(
        (status = 200, description = "Block retrieved successfully", body = Block),
        (status = 404, description = "No block at that index")
    )
)]
pub async fn get_block(ledger: LedgerData, index: web::Path<u64>) -> impl Responder {
    match ledger.block(index.into_inner()) {
        Some(block) => HttpResponse::Ok().json(block),
        None => HttpResponse::NotFound().json(serde_json::json!({
            "error": "No block at that index"
        })),
    }
}

/// Get all finalized transactions
///
/// Returns every transaction across all blocks, flattened in chain order
#[utoipa::path(
    get,
    path = "/api/v1/transactions",
    responses(
        (status = 200, description = "Transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_all_transactions(ledger: LedgerData) -> impl Responder {
    HttpResponse::Ok().json(ledger.all_transactions())
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(ledger: LedgerData) -> impl Responder {
    HttpResponse::Ok().json(ledger.pending_transactions())
}

/// Create a new transfer transaction
///
/// Signs the transfer with the supplied private key and submits it to the
/// pending queue
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction created successfully", body = TransactionResponse),
        (status = 400, description = "Invalid transaction data")
    )
)]
pub async fn new_transaction(
    ledger: LedgerData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let private_key_bytes = match hex::decode(&transaction_req.private_key) {
        Ok(bytes) => bytes,
        Err(_) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Invalid private key format. Must be a hex string."
            }));
        }
    };

    let wallet = match Wallet::from_secret_key(&private_key_bytes) {
        Ok(wallet) => wallet,
        Err(err) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("Invalid private key: {}", err)
            }));
        }
    };

    if wallet.address().0 != transaction_req.from {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Private key does not match sender address"
        }));
    }

    let transaction = match Transaction::transfer(
        &wallet,
        Address(transaction_req.to.clone()),
        transaction_req.amount,
    ) {
        Ok(tx) => tx,
        Err(err) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("Failed to sign transaction: {}", err)
            }));
        }
    };

    match ledger.submit_transaction(transaction) {
        Ok(block_index) => {
            let response = TransactionResponse {
                message: "Transaction will be added to block".to_string(),
                block_index,
            };

            HttpResponse::Created().json(response)
        }
        Err(err) => error_json(&err),
    }
}

/// Produce a new block
///
/// Drains the pending queue into a new block, mined or forged according to
/// the configured consensus policy. Mining runs on a blocking worker so the
/// server stays responsive.
#[utoipa::path(
    post,
    path = "/api/v1/produce",
    request_body = ProduceRequest,
    responses(
        (status = 200, description = "Block produced successfully", body = ProduceResponse),
        (status = 400, description = "Production failed"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn produce_block(
    ledger: LedgerData,
    produce_req: web::Json<ProduceRequest>,
) -> impl Responder {
    let worker = ledger.get_ref().clone();
    let reward_to = produce_req.reward_address.clone().map(Address);

    let result = web::block(move || worker.produce_block(reward_to)).await;

    match result {
        Ok(Ok(block)) => {
            let response = ProduceResponse {
                message: "New block produced".to_string(),
                block,
            };

            HttpResponse::Ok().json(response)
        }
        Ok(Err(err)) => error_json(&err),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Production worker failed: {}", err)
        })),
    }
}

/// Check if the chain is valid
///
/// Validates the entire chain
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Chain validation status", body = bool)
    )
)]
pub async fn validate_chain(ledger: LedgerData) -> impl Responder {
    let is_valid = ledger.is_chain_valid();
    HttpResponse::Ok().json(is_valid)
}

/// Create a new wallet
///
/// Creates a new wallet with a random keypair
///
/// The private key must be stored by your own
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_wallet() -> impl Responder {
    match Wallet::new() {
        Ok(wallet) => {
            let address = wallet.address().0.clone();
            let private_key = hex::encode(wallet.export_secret_key());

            let response = WalletResponse {
                address,
                private_key,
            };

            HttpResponse::Created().json(response)
        }
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to create wallet: {}", err)
        })),
    }
}

/// Mint new tokens
///
/// Creates a system-originated mint transaction and submits it to the
/// pending queue
#[utoipa::path(
    post,
    path = "/api/v1/mint",
    request_body = MintRequest,
    responses(
        (status = 201, description = "Mint transaction submitted", body = Transaction),
        (status = 400, description = "Invalid mint request")
    )
)]
pub async fn mint_tokens(ledger: LedgerData, mint_req: web::Json<MintRequest>) -> impl Responder {
    match ledger.mint_tokens(Address(mint_req.to.clone()), mint_req.amount) {
        Ok(tx) => HttpResponse::Created().json(tx),
        Err(err) => error_json(&err),
    }
}

/// Get the balance of an address
///
/// Returns both the confirmed balance and the projected balance that
/// accounts for pending transactions
#[utoipa::path(
    get,
    path = "/api/v1/balance/{address}",
    responses(
        (status = 200, description = "Balance retrieved successfully", body = BalanceResponse)
    )
)]
pub async fn get_balance(ledger: LedgerData, address: web::Path<String>) -> impl Responder {
    let address = Address(address.into_inner());

    let response = BalanceResponse {
        confirmed: ledger.confirmed_balance(&address),
        projected: ledger.projected_balance(&address),
        address: address.0,
    };

    HttpResponse::Ok().json(response)
}

/// Get the registered validators
///
/// Only meaningful under proof of stake
#[utoipa::path(
    get,
    path = "/api/v1/validators",
    responses(
        (status = 200, description = "Validators retrieved successfully", body = Vec<ValidatorEntry>),
        (status = 400, description = "The ledger is not running proof of stake")
    )
)]
pub async fn get_validators(ledger: LedgerData) -> impl Responder {
    match ledger.validators() {
        Some(validators) => {
            let entries: Vec<ValidatorEntry> = validators
                .into_iter()
                .map(|(address, stake)| ValidatorEntry {
                    address: address.0,
                    stake,
                })
                .collect();

            HttpResponse::Ok().json(entries)
        }
        None => HttpResponse::BadRequest().json(serde_json::json!({
            "error": "The ledger is not running proof of stake"
        })),
    }
}

/// Register a validator
///
/// Registers an address for proof-of-stake selection. The stake must meet
/// the minimum.
#[utoipa::path(
    post,
    path = "/api/v1/validators/register",
    request_body = RegisterValidatorRequest,
    responses(
        (status = 200, description = "Registration outcome", body = bool),
        (status = 400, description = "The ledger is not running proof of stake")
    )
)]
pub async fn register_validator(
    ledger: LedgerData,
    register_req: web::Json<RegisterValidatorRequest>,
) -> impl Responder {
    match ledger.register_validator(Address(register_req.address.clone()), register_req.stake) {
        Ok(registered) => HttpResponse::Ok().json(registered),
        Err(err) => error_json(&err),
    }
}
