//! Error types for ticket redemption.

/// Why a ticket was refused. Every variant means "connection refused".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TicketError {
    #[error("ticket is unknown or already used")]
    Unknown,

    #[error("ticket expired")]
    Expired,

    #[error("ticket not valid for {0}")]
    WrongResource(String),
}
