//! One-time tickets for connections that cannot carry an `Authorization`
//! header (server-sent event streams, browser uploads).
//!
//! A ticket is scoped to one resource and one resource type, expires after
//! a short TTL, and is consumed by its first redemption attempt.

pub mod error;
pub mod issuer;

pub use error::TicketError;
pub use issuer::{DEFAULT_TICKET_TTL, Grant, TicketIssuer};
