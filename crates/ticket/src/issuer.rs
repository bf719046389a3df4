//! Ticket issuance and single-use redemption.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use stevedore_protocol::{ResourceType, TicketResponse};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TicketError;

pub const DEFAULT_TICKET_TTL: Duration = Duration::from_secs(30);

/// Random bytes per ticket; the URL carries them hex-encoded.
const TICKET_BYTES: usize = 16;

/// Characters escaped inside a URL path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// What a redeemed ticket grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub resource: String,
    pub resource_type: ResourceType,
}

#[derive(Debug)]
struct Entry {
    grant: Grant,
    expires_at: Instant,
}

/// Mints and redeems one-time tickets.
pub struct TicketIssuer {
    ttl: Duration,
    base_url: String,
    tickets: Mutex<HashMap<String, Entry>>,
}

impl TicketIssuer {
    /// `base_url` prefixes the returned stream URLs (may be empty).
    pub fn new(ttl: Duration, base_url: impl Into<String>) -> Self {
        Self {
            ttl,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tickets: Mutex::new(HashMap::new()),
        }
    }

    fn tickets(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mints a ticket for `resource`, valid once within the TTL.
    pub fn issue(&self, resource: &str, resource_type: ResourceType) -> TicketResponse {
        let entry = Entry {
            grant: Grant {
                resource: resource.to_string(),
                resource_type,
            },
            expires_at: Instant::now() + self.ttl,
        };
        let ticket = {
            let mut tickets = self.tickets();
            // A live ticket is never handed out twice.
            let ticket = std::iter::repeat_with(|| hex::encode(rand::random::<[u8; TICKET_BYTES]>()))
                .find(|candidate| !tickets.contains_key(candidate))
                .unwrap_or_default();
            tickets.insert(ticket.clone(), entry);
            ticket
        };
        debug!(resource, ?resource_type, "ticket issued");

        let sse_url = format!("{}?ticket={ticket}", self.stream_path(resource, resource_type));
        TicketResponse {
            ticket,
            sse_url,
            expires_at: Utc::now()
                + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero()),
            expires_in: self.ttl.as_secs(),
        }
    }

    /// Path a client opens with the ticket attached.
    pub fn stream_path(&self, resource: &str, resource_type: ResourceType) -> String {
        let resource = utf8_percent_encode(resource, SEGMENT);
        match resource_type {
            ResourceType::Transfer => format!("{}/transfer/{resource}/events", self.base_url),
            ResourceType::Upload => format!("{}/upload/{resource}", self.base_url),
        }
    }

    /// Consumes `ticket`. The ticket is gone after this call whatever the
    /// outcome.
    pub fn redeem(&self, ticket: &str) -> Result<Grant, TicketError> {
        let entry = self.tickets().remove(ticket).ok_or(TicketError::Unknown)?;
        if Instant::now() >= entry.expires_at {
            return Err(TicketError::Expired);
        }
        Ok(entry.grant)
    }

    /// Consumes `ticket` and checks it was issued for exactly this resource.
    pub fn redeem_for(
        &self,
        ticket: &str,
        resource_type: ResourceType,
        resource: &str,
    ) -> Result<(), TicketError> {
        let grant = self.redeem(ticket).inspect_err(|e| {
            warn!(resource, error = %e, "ticket rejected");
        })?;
        if grant.resource_type != resource_type || grant.resource != resource {
            warn!(resource, granted = %grant.resource, "ticket presented for another resource");
            return Err(TicketError::WrongResource(resource.to_string()));
        }
        Ok(())
    }

    /// Drops expired tickets. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut tickets = self.tickets();
        let before = tickets.len();
        tickets.retain(|_, entry| entry.expires_at > now);
        before - tickets.len()
    }

    pub fn outstanding(&self) -> usize {
        self.tickets().len()
    }

    /// Runs [`purge_expired`](Self::purge_expired) every `interval` until
    /// `cancel` fires.
    pub fn spawn_purger(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let issuer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = issuer.purge_expired();
                        if purged > 0 {
                            debug!(purged, "expired tickets purged");
                        }
                    }
                }
            }
            info!("ticket purger stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TicketIssuer {
        TicketIssuer::new(Duration::from_secs(30), "")
    }

    #[tokio::test]
    async fn issue_returns_stream_url() {
        let issuer = issuer();
        let resp = issuer.issue("job-1", ResourceType::Transfer);
        assert_eq!(resp.ticket.len(), 32);
        assert_eq!(
            resp.sse_url,
            format!("/transfer/job-1/events?ticket={}", resp.ticket)
        );
        assert_eq!(resp.expires_in, 30);
        assert!(resp.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn tickets_are_distinct_hex() {
        let issuer = issuer();
        let tickets: std::collections::HashSet<String> = (0..64)
            .map(|_| issuer.issue("job-1", ResourceType::Transfer).ticket)
            .collect();
        assert_eq!(tickets.len(), 64);
        assert_eq!(issuer.outstanding(), 64);
        assert!(tickets.iter().all(|t| t.len() == 2 * TICKET_BYTES));
        assert!(tickets.iter().all(|t| t.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())));
    }

    #[tokio::test]
    async fn upload_url_escapes_key() {
        let issuer = TicketIssuer::new(Duration::from_secs(30), "https://files.example/");
        assert_eq!(
            issuer.stream_path("loc1/docs/a b.txt", ResourceType::Upload),
            "https://files.example/upload/loc1/docs/a%20b.txt"
        );
    }

    #[tokio::test]
    async fn second_redemption_fails() {
        let issuer = issuer();
        let resp = issuer.issue("job-1", ResourceType::Transfer);

        let grant = issuer.redeem(&resp.ticket).unwrap();
        assert_eq!(grant.resource, "job-1");
        assert_eq!(grant.resource_type, ResourceType::Transfer);

        assert_eq!(issuer.redeem(&resp.ticket), Err(TicketError::Unknown));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_ticket_is_refused() {
        let issuer = issuer();
        let resp = issuer.issue("job-1", ResourceType::Transfer);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(issuer.redeem(&resp.ticket), Err(TicketError::Expired));
        assert_eq!(issuer.redeem(&resp.ticket), Err(TicketError::Unknown));
    }

    #[tokio::test]
    async fn wrong_resource_consumes_ticket() {
        let issuer = issuer();
        let resp = issuer.issue("job-1", ResourceType::Transfer);

        assert_eq!(
            issuer.redeem_for(&resp.ticket, ResourceType::Transfer, "job-2"),
            Err(TicketError::WrongResource("job-2".into()))
        );
        assert_eq!(
            issuer.redeem_for(&resp.ticket, ResourceType::Transfer, "job-1"),
            Err(TicketError::Unknown)
        );
    }

    #[tokio::test]
    async fn resource_type_must_match() {
        let issuer = issuer();
        let resp = issuer.issue("loc1/a.txt", ResourceType::Upload);
        assert!(
            issuer
                .redeem_for(&resp.ticket, ResourceType::Transfer, "loc1/a.txt")
                .is_err()
        );
    }

    #[tokio::test]
    async fn unknown_ticket_is_refused() {
        assert_eq!(issuer().redeem("deadbeef"), Err(TicketError::Unknown));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired() {
        let issuer = issuer();
        issuer.issue("old", ResourceType::Transfer);
        tokio::time::advance(Duration::from_secs(20)).await;
        let fresh = issuer.issue("new", ResourceType::Transfer);
        tokio::time::advance(Duration::from_secs(15)).await;

        assert_eq!(issuer.purge_expired(), 1);
        assert_eq!(issuer.outstanding(), 1);
        assert!(issuer.redeem(&fresh.ticket).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn purger_runs_until_cancelled() {
        let issuer = Arc::new(issuer());
        issuer.issue("job-1", ResourceType::Transfer);

        let cancel = CancellationToken::new();
        let handle = issuer.spawn_purger(Duration::from_secs(60), cancel.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(issuer.outstanding(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
