use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::time::Duration;

mod api;
mod ledger;

use ledger::consensus::{ConsensusPolicy, DEFAULT_DIFFICULTY, DEFAULT_MINIMUM_STAKE};
use ledger::{Address, Ledger, Wallet};

// Pick the production policy from the environment: CONSENSUS=pos selects
// proof of stake, anything else proof of work
fn consensus_policy_from_env() -> ConsensusPolicy {
    match std::env::var("CONSENSUS").as_deref() {
        Ok("pos") => {
            let minimum_stake = std::env::var("MINIMUM_STAKE")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(DEFAULT_MINIMUM_STAKE);

            info!("Using proof of stake with minimum stake {}", minimum_stake);
            ConsensusPolicy::proof_of_stake(minimum_stake)
        }
        _ => {
            let difficulty = std::env::var("DIFFICULTY")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(DEFAULT_DIFFICULTY);

            info!("Using proof of work at difficulty {}", difficulty);
            ConsensusPolicy::proof_of_work(difficulty)
        }
    }
}

// Initialize the ledger from storage, falling back to an in-memory ledger
fn initialize_ledger(policy: ConsensusPolicy) -> Ledger {
    let data_dir = "data/ledger";

    std::fs::create_dir_all(data_dir).unwrap_or_else(|e| {
        warn!("Failed to create data directory: {}", e);
    });

    match Ledger::with_store(data_dir, policy.clone()) {
        Ok(ledger) => {
            info!("Loaded ledger from storage at {}", data_dir);
            ledger
        }
        Err(err) => {
            warn!("Failed to open ledger storage: {}", err);
            warn!("Creating in-memory ledger instead");
            Ledger::new(policy)
        }
    }
}

// Create a demo wallet with some pending funds on a fresh chain
fn create_demo_wallet(ledger: &Ledger) -> Option<Wallet> {
    match Wallet::new() {
        Ok(wallet) => {
            info!("Created demo wallet with address: {}", wallet.address());

            let private_key = wallet.export_secret_key();
            info!("Demo wallet private key: {}", hex::encode(&private_key));

            if ledger.height() == 1 {
                match ledger.mint_tokens(wallet.address().clone(), 1000) {
                    Ok(_) => {
                        info!("Minted 1000 units to the demo wallet (pending until the next block)")
                    }
                    Err(err) => warn!("Failed to mint demo funds: {}", err),
                }
            }

            Some(wallet)
        }
        Err(err) => {
            warn!("Failed to create demo wallet: {}", err);
            None
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_chain_info,
        api::handlers::get_block,
        api::handlers::get_all_transactions,
        api::handlers::get_pending_transactions,
        api::handlers::new_transaction,
        api::handlers::produce_block,
        api::handlers::validate_chain,
        api::handlers::create_wallet,
        api::handlers::mint_tokens,
        api::handlers::get_balance,
        api::handlers::get_validators,
        api::handlers::register_validator
    ),
    components(
        schemas(
            ledger::Block,
            ledger::Transaction,
            ledger::TxType,
            ledger::Origin,
            ledger::Address,
            ledger::DigitalSignature,
            ledger::ChainInfo,
            api::schema::DateTimeUtc,
            api::handlers::ChainResponse,
            api::handlers::TransactionRequest,
            api::handlers::TransactionResponse,
            api::handlers::ProduceRequest,
            api::handlers::ProduceResponse,
            api::handlers::MintRequest,
            api::handlers::BalanceResponse,
            api::handlers::WalletResponse,
            api::handlers::ValidatorEntry,
            api::handlers::RegisterValidatorRequest
        )
    ),
    tags(
        (name = "ledger", description = "Ledger API endpoints")
    ),
    info(
        title = "Solochain API",
        version = "1.0.0",
        description = "A single-node ledger API",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let policy = consensus_policy_from_env();
    let ledger = initialize_ledger(policy);

    create_demo_wallet(&ledger);

    // Optional background production loop
    let auto_forge = std::env::var("AUTO_FORGE_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(|secs| {
            let reward_to = std::env::var("MINER_ADDRESS").ok().map(Address);
            info!("Auto-forging every {} seconds", secs);
            ledger.start_auto_forge(Duration::from_secs(secs), reward_to)
        });

    let ledger_data = web::Data::new(ledger);

    info!("Starting HTTP server at http://localhost:8080");

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Configure OpenAPI documentation
        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(ledger_data.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone()),
            )
    })
    .bind(("127.0.0.1", 8080))
    .context("Failed to bind HTTP server")?
    .run()
    .await?;

    if let Some(handle) = auto_forge {
        handle.stop();
    }

    Ok(())
}
