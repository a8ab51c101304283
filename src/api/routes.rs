use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/chain/info", web::get().to(handlers::get_chain_info))
            .route("/blocks/{index}", web::get().to(handlers::get_block))
            .route("/transactions", web::get().to(handlers::get_all_transactions))
            .route("/transactions/pending", web::get().to(handlers::get_pending_transactions))
            .route("/transactions/new", web::post().to(handlers::new_transaction))
            .route("/produce", web::post().to(handlers::produce_block))
            .route("/validate", web::get().to(handlers::validate_chain))
            .route("/wallet/new", web::post().to(handlers::create_wallet))
            .route("/mint", web::post().to(handlers::mint_tokens))
            .route("/balance/{address}", web::get().to(handlers::get_balance))
            .route("/validators", web::get().to(handlers::get_validators))
            .route("/validators/register", web::post().to(handlers::register_validator))
    );
}
