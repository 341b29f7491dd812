//! In-memory relay used by reader, coordinator, and session tests.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};

use async_trait::async_trait;

use crate::connection::PublishAck;
use crate::error::{Error, Result};
use crate::event::{Event, Filter, Tag, UnsignedEvent};
use crate::manager::{EventPublisher, EventSource};
use crate::signer::LocalKeySigner;

/// Stores events, answers filters like a relay would, and records publishes.
#[derive(Default)]
pub struct MemoryRelay {
    events: Mutex<Vec<Event>>,
    published: Mutex<Vec<Event>>,
    queries: AtomicUsize,
    fail_fetch: AtomicBool,
    /// Reject publishes once this many events have been accepted.
    accept_limit: Mutex<Option<usize>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<Event>) -> Self {
        let relay = Self::new();
        relay.events.lock().unwrap().extend(events);
        relay
    }

    pub fn published(&self) -> Vec<Event> {
        self.published.lock().unwrap().clone()
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn fail_fetches(&self) {
        self.fail_fetch.store(true, Ordering::SeqCst);
    }

    pub fn accept_only(&self, count: usize) {
        *self.accept_limit.lock().unwrap() = Some(count);
    }
}

#[async_trait]
impl EventSource for MemoryRelay {
    async fn fetch_events(&self, filter: &Filter) -> Result<Vec<Event>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::ConnectionFailed("memory relay offline".into()));
        }
        let mut matched: Vec<Event> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|ev| filter.matches(ev))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matched.truncate(limit as usize);
        }
        Ok(matched)
    }
}

#[async_trait]
impl EventPublisher for MemoryRelay {
    async fn publish(&self, event: &Event) -> Result<PublishAck> {
        let mut published = self.published.lock().unwrap();
        if let Some(limit) = *self.accept_limit.lock().unwrap() {
            if published.len() >= limit {
                return Err(Error::Relay {
                    relay: "memory".into(),
                    message: "rate limited".into(),
                });
            }
        }
        published.push(event.clone());
        self.events.lock().unwrap().push(event.clone());
        Ok(PublishAck {
            relay: "memory".into(),
            accepted: true,
            message: String::new(),
        })
    }
}

/// Signed event from `signer` with the given shape.
pub fn signed(
    signer: &LocalKeySigner,
    kind: u32,
    tags: Vec<Tag>,
    content: &str,
    created_at: u64,
) -> Event {
    let unsigned = UnsignedEvent {
        kind,
        tags,
        content: content.into(),
    };
    signer.sign_at(&unsigned, created_at).unwrap()
}
