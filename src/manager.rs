//! Ownership of the relay address list and the single shared relay session.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::config::Settings;
use crate::connection::PublishAck;
use crate::error::{Error, Result};
use crate::event::{Event, Filter};
use crate::pool::RelayPool;

/// Read access to relay data.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch every event matching `filter` from the current relay set.
    async fn fetch_events(&self, filter: &Filter) -> Result<Vec<Event>>;
}

/// Write access to relay data.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one signed event, resolving once some relay accepted it.
    async fn publish(&self, event: &Event) -> Result<PublishAck>;
}

#[async_trait]
impl<T: EventSource + ?Sized> EventSource for Arc<T> {
    async fn fetch_events(&self, filter: &Filter) -> Result<Vec<Event>> {
        (**self).fetch_events(filter).await
    }
}

#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish(&self, event: &Event) -> Result<PublishAck> {
        (**self).publish(event).await
    }
}

/// Lifecycle of the shared session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Ordered, de-duplicated list of relay addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayList(Vec<String>);

impl RelayList {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = RelayList::default();
        for url in urls {
            list.add(url.as_ref());
        }
        list
    }

    /// Append `url` unless it is blank or already present.
    pub fn add(&mut self, url: &str) -> bool {
        let url = url.trim();
        if url.is_empty() || self.0.iter().any(|existing| existing == url) {
            return false;
        }
        self.0.push(url.to_string());
        true
    }

    pub fn remove(&mut self, url: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|existing| existing != url.trim());
        self.0.len() != before
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Transport options applied to every session.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Optional SOCKS5 proxy (host:port).
    pub tor_socks: Option<String>,
    /// Upper bound for connecting and for each read from a relay.
    pub read_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            tor_socks: None,
            read_timeout: Duration::from_secs(5),
        }
    }
}

struct Inner {
    addresses: RelayList,
    session: Option<Arc<RelayPool>>,
}

/// Sole owner of the relay session.
///
/// The async mutex is held for the whole connect, so concurrent callers of
/// [`ensure_connected`](Self::ensure_connected) wait for the in-flight
/// connect instead of building a second session, and [`reconnect`](Self::reconnect)
/// tears the old session down before the new one is created.
pub struct ConnectionManager {
    options: ConnectionOptions,
    inner: Mutex<Inner>,
    state: watch::Sender<ConnectionState>,
    next_session: AtomicU64,
}

impl ConnectionManager {
    pub fn new(addresses: RelayList, options: ConnectionOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            options,
            inner: Mutex::new(Inner {
                addresses,
                session: None,
            }),
            state,
            next_session: AtomicU64::new(0),
        }
    }

    pub fn from_settings(cfg: &Settings) -> Self {
        Self::new(
            RelayList::new(&cfg.relays),
            ConnectionOptions {
                tor_socks: cfg.tor_socks.clone(),
                read_timeout: cfg.query_timeout,
            },
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Current address list.
    pub async fn addresses(&self) -> RelayList {
        self.inner.lock().await.addresses.clone()
    }

    /// Return the live session, connecting first if there is none.
    pub async fn ensure_connected(&self) -> Result<Arc<RelayPool>> {
        let mut inner = self.inner.lock().await;
        if let Some(session) = &inner.session {
            return Ok(session.clone());
        }
        self.connect_locked(&mut inner).await
    }

    /// Tear down the current session, replace the address list, and connect
    /// against the new set.
    pub async fn reconnect(&self, addresses: RelayList) -> Result<Arc<RelayPool>> {
        let mut inner = self.inner.lock().await;
        if let Some(old) = inner.session.take() {
            old.close().await;
        }
        self.state.send_replace(ConnectionState::Disconnected);
        info!(relays = ?addresses.as_slice(), "reconnecting with new relay set");
        inner.addresses = addresses;
        self.connect_locked(&mut inner).await
    }

    /// Release the session. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.session.take() {
            session.close().await;
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    async fn connect_locked(&self, inner: &mut Inner) -> Result<Arc<RelayPool>> {
        self.state.send_replace(ConnectionState::Connecting);
        let id = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let result = RelayPool::connect(
            id,
            inner.addresses.as_slice(),
            self.options.tor_socks.as_deref(),
            self.options.read_timeout,
        )
        .await;
        match result {
            Ok(pool) => {
                let pool = Arc::new(pool);
                inner.session = Some(pool.clone());
                self.state.send_replace(ConnectionState::Connected);
                Ok(pool)
            }
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Drop `session` if it is still current, so the next call reconnects.
    async fn invalidate(&self, session: &RelayPool) {
        let mut inner = self.inner.lock().await;
        if inner.session.as_ref().is_some_and(|s| s.id() == session.id()) {
            warn!(session = session.id(), "every relay failed; dropping session");
            inner.session = None;
            self.state.send_replace(ConnectionState::Disconnected);
        }
    }
}

#[async_trait]
impl EventSource for ConnectionManager {
    async fn fetch_events(&self, filter: &Filter) -> Result<Vec<Event>> {
        let session = self.ensure_connected().await?;
        match session.fetch_events(filter).await {
            Err(Error::ConnectionFailed(reason)) => {
                self.invalidate(&session).await;
                Err(Error::ConnectionFailed(reason))
            }
            other => other,
        }
    }
}

#[async_trait]
impl EventPublisher for ConnectionManager {
    async fn publish(&self, event: &Event) -> Result<PublishAck> {
        let session = self.ensure_connected().await?;
        match session.publish(event).await {
            Err(Error::ConnectionFailed(reason)) => {
                self.invalidate(&session).await;
                Err(Error::ConnectionFailed(reason))
            }
            other => other,
        }
    }
}
