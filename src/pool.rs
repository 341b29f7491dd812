//! A connected relay session: the set of relays that accepted a connection.

use std::{collections::HashSet, sync::Arc, time::Duration};

use futures_util::{future::join_all, stream::FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::connection::{PublishAck, RelayConnection};
use crate::error::{Error, Result};
use crate::event::{Event, Filter};

/// Connections to every reachable relay of one address set.
///
/// Only [`crate::manager::ConnectionManager`] constructs pools; everything
/// else borrows the current one through it.
pub struct RelayPool {
    id: u64,
    addresses: Vec<String>,
    connections: Vec<Arc<RelayConnection>>,
}

impl RelayPool {
    /// Connect to all `addresses` concurrently. Succeeds when at least one
    /// relay connects; unreachable relays are logged and left out.
    pub(crate) async fn connect(
        id: u64,
        addresses: &[String],
        tor_socks: Option<&str>,
        read_timeout: Duration,
    ) -> Result<Self> {
        if addresses.is_empty() {
            return Err(Error::ConnectionFailed("no relays configured".into()));
        }
        let attempts = join_all(
            addresses
                .iter()
                .map(|url| RelayConnection::connect(url, tor_socks, read_timeout)),
        )
        .await;

        let mut connections = Vec::new();
        let mut failures = Vec::new();
        for (url, attempt) in addresses.iter().zip(attempts) {
            match attempt {
                Ok(conn) => connections.push(Arc::new(conn)),
                Err(e) => {
                    warn!(relay = %url, "connect failed: {e}");
                    failures.push(e.to_string());
                }
            }
        }
        if connections.is_empty() {
            return Err(Error::ConnectionFailed(failures.join("; ")));
        }
        info!(
            session = id,
            connected = connections.len(),
            configured = addresses.len(),
            "relay session established"
        );
        Ok(Self {
            id,
            addresses: addresses.to_vec(),
            connections,
        })
    }

    /// Identifier unique among sessions created by one manager.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Addresses this session was configured with, reachable or not.
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Addresses that actually connected.
    pub fn connected_relays(&self) -> Vec<&str> {
        self.connections.iter().map(|c| c.url()).collect()
    }

    /// Query every relay and merge the results, de-duplicated by event id.
    ///
    /// Individual relay failures are logged; the call only fails when every
    /// relay failed.
    pub async fn fetch_events(&self, filter: &Filter) -> Result<Vec<Event>> {
        let results = join_all(self.connections.iter().map(|conn| conn.query(filter))).await;
        let mut seen = HashSet::new();
        let mut events = Vec::new();
        let mut failures = Vec::new();
        for (conn, result) in self.connections.iter().zip(results) {
            match result {
                Ok(batch) => {
                    debug!(relay = conn.url(), count = batch.len(), "query finished");
                    events.extend(batch.into_iter().filter(|ev| seen.insert(ev.id.clone())));
                }
                Err(e) => {
                    warn!(relay = conn.url(), "query failed: {e}");
                    failures.push(e.to_string());
                }
            }
        }
        if failures.len() == self.connections.len() {
            return Err(Error::ConnectionFailed(failures.join("; ")));
        }
        Ok(events)
    }

    /// Send `event` to every relay and resolve on the first acceptance.
    ///
    /// Sends to slower relays keep running in the background after the first
    /// acknowledgement; a relay that was offline simply misses the event.
    /// Fails with [`Error::ConnectionFailed`] when no relay answered at all,
    /// and with [`Error::Relay`] when at least one relay rejected the event.
    pub async fn publish(&self, event: &Event) -> Result<PublishAck> {
        let mut pending: FuturesUnordered<_> = self
            .connections
            .iter()
            .map(|conn| {
                let conn = conn.clone();
                let event = event.clone();
                tokio::spawn(async move { conn.publish(&event).await })
            })
            .collect();

        let mut reasons = Vec::new();
        let mut answered = false;
        while let Some(joined) = pending.next().await {
            match joined {
                Ok(Ok(ack)) if ack.accepted => {
                    info!(relay = %ack.relay, event = %event.id, "event accepted");
                    return Ok(ack);
                }
                Ok(Ok(ack)) => {
                    warn!(relay = %ack.relay, event = %event.id, reason = %ack.message, "event rejected");
                    answered = true;
                    reasons.push(format!("{}: {}", ack.relay, ack.message));
                }
                Ok(Err(e)) => {
                    warn!(event = %event.id, "publish failed: {e}");
                    reasons.push(e.to_string());
                }
                Err(e) => reasons.push(format!("publish task failed: {e}")),
            }
        }
        if !answered {
            return Err(Error::ConnectionFailed(reasons.join("; ")));
        }
        Err(Error::Relay {
            relay: self.addresses.join(","),
            message: format!("no relay accepted event {}: {}", event.id, reasons.join("; ")),
        })
    }

    /// Close every connection.
    pub async fn close(&self) {
        join_all(self.connections.iter().map(|conn| conn.close())).await;
        debug!(session = self.id, "relay session closed");
    }
}
