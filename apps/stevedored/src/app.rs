//! Wires the engine, ticket issuer and HTTP server together.

use std::sync::Arc;

use anyhow::Context;
use stevedore_server::{AppState, BearerAuth};
use stevedore_storage::{HuggingFaceHub, LocationRegistry};
use stevedore_ticket::TicketIssuer;
use stevedore_transfer::TransferService;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Runs the daemon until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    // -- Storage --
    let locations =
        LocationRegistry::from_config(&config.locations).context("invalid [[locations]] entry")?;
    if locations.is_empty() {
        tracing::warn!("no locations configured");
    }
    let hub = HuggingFaceHub::new(&config.huggingface).context("invalid [huggingface] section")?;

    // -- Engine --
    let base_url = config.server.public_base_url.clone();
    let transfers = Arc::new(TransferService::new(
        Arc::new(locations),
        hub,
        config.transfer.clone(),
        base_url.clone(),
    ));
    let sweeper = transfers.spawn_sweeper(cancel.clone());

    let tickets = Arc::new(TicketIssuer::new(config.tickets.ttl(), base_url));
    let purger = tickets.spawn_purger(config.tickets.purge_interval(), cancel.clone());

    // -- HTTP --
    let state = AppState::new(
        transfers,
        tickets,
        BearerAuth::new(config.auth.tokens.clone()),
        cancel.clone(),
    );
    let mut server = tokio::spawn({
        let server_config = config.server.clone();
        async move { stevedore_server::serve(&server_config, state).await }
    });

    // -- Wait for shutdown, or for the server to stop on its own --
    let served = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            cancel.cancel();
            (&mut server).await
        }
        result = &mut server => result,
    };

    // -- Graceful shutdown --
    cancel.cancel();
    let _ = tokio::join!(sweeper, purger);
    served.context("server task panicked")??;
    Ok(())
}
