//! Relay data access, event synthesis, and signing for Angor project profiles.
//!
//! A profile is a kind 0 metadata event plus several application data
//! records (project text, FAQ, members, media, relay set) told apart by their
//! `d` tag. [`session::ProfileEditSession`] loads them through a
//! [`reader::RecordReader`], and saves them by synthesizing unsigned events
//! and passing them through a [`signing::SigningCoordinator`]. All relay
//! traffic goes through one [`manager::ConnectionManager`].

pub mod badges;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod keys;
pub mod manager;
pub mod pool;
pub mod reader;
pub mod records;
pub mod session;
pub mod signer;
pub mod signing;
pub mod synth;

#[cfg(test)]
mod test_utils;

pub use error::{Error, Result};
pub use event::{Event, Filter, Tag, UnsignedEvent};
pub use manager::{ConnectionManager, ConnectionState, EventPublisher, EventSource, RelayList};
pub use reader::RecordReader;
pub use records::{ProfileRecord, RecordKind};
pub use session::ProfileEditSession;
pub use signing::{SigningCoordinator, SigningMethod, SigningOutcome, SigningRequest};
pub use synth::{synthesize, EditableState};
