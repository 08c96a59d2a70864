pub mod blob_store;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod metrics_defs;
pub mod protocol;
pub mod service;

#[cfg(test)]
mod testutils;

use errors::RelayError;
use service::{Relay, RelayService};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;

/// Validates `config`, builds the relay and serves it alongside the admin
/// listener until either listener fails.
pub async fn run(config: config::Config) -> Result<(), RelayError> {
    config.validate()?;

    let relay = Arc::new(Relay::from_config(&config)?);
    tracing::info!(
        dispatch_url = %relay.dispatch_url(),
        stores_uploads = relay.stores_uploads(),
        "Relay configured"
    );

    let relay_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        RelayService::new(relay),
    );
    // Every dependency is built before serving starts, so the relay is ready
    // as soon as the admin listener is up.
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::<_, RelayError>::new(|| true),
    );

    tokio::try_join!(relay_task, admin_task)?;
    Ok(())
}
