use std::sync::Arc;

use stevedore_ticket::TicketIssuer;
use stevedore_transfer::TransferService;
use tokio_util::sync::CancellationToken;

use crate::auth::BearerAuth;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub transfers: Arc<TransferService>,
    pub tickets: Arc<TicketIssuer>,
    pub auth: Arc<BearerAuth>,
    /// Fires when the server starts draining; open progress streams end.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        transfers: Arc<TransferService>,
        tickets: Arc<TicketIssuer>,
        auth: BearerAuth,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transfers,
            tickets,
            auth: Arc::new(auth),
            shutdown,
        }
    }
}
