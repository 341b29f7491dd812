//! Signers: the delegated external signer seam and a local key signer.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use secp256k1::{All, Keypair, Message, Secp256k1, SecretKey};

use crate::error::{Error, Result};
use crate::event::{Event, UnsignedEvent};
use crate::keys;

/// A signer that holds the user's key and signs on request, such as a
/// browser extension reached over NIP-07.
#[async_trait]
pub trait ExternalSigner: Send + Sync {
    /// Public key (hex) of the account the signer will sign with.
    async fn get_identity(&self) -> Result<String>;

    /// Stamp, hash, and sign `event`.
    async fn sign(&self, event: &UnsignedEvent) -> Result<Event>;
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Signs events with a private key held in memory.
pub struct LocalKeySigner {
    secp: Secp256k1<All>,
    keypair: Keypair,
    pubkey: String,
}

impl LocalKeySigner {
    pub fn from_secret_key(secret: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &secret);
        let pubkey = keys::derive_public_key(&secret);
        Self {
            secp,
            keypair,
            pubkey,
        }
    }

    pub fn from_bytes(secret: &[u8; 32]) -> Result<Self> {
        SecretKey::from_slice(secret)
            .map(Self::from_secret_key)
            .map_err(|e| Error::InvalidKeyFormat(e.to_string()))
    }

    /// Parse a private key given as `nsec` or hex.
    pub fn parse(private_key: &str) -> Result<Self> {
        keys::parse_secret_key(private_key).map(Self::from_secret_key)
    }

    /// Hex public key.
    pub fn public_key(&self) -> &str {
        &self.pubkey
    }

    /// Sign `event` with an explicit timestamp.
    pub fn sign_at(&self, event: &UnsignedEvent, created_at: u64) -> Result<Event> {
        let hash = event.id_for(&self.pubkey, created_at)?;
        let msg = Message::from_digest_slice(&hash).map_err(|e| Error::Signing(e.to_string()))?;
        let sig = self
            .secp
            .sign_schnorr_with_rng(&msg, &self.keypair, &mut rand::thread_rng());
        Ok(Event {
            id: hex::encode(hash),
            pubkey: self.pubkey.clone(),
            kind: event.kind,
            created_at,
            tags: event.tags.clone(),
            content: event.content.clone(),
            sig: hex::encode(sig.as_ref()),
        })
    }

    /// Sign `event` stamped with the current time.
    pub fn sign_now(&self, event: &UnsignedEvent) -> Result<Event> {
        self.sign_at(event, unix_now())
    }
}

#[async_trait]
impl ExternalSigner for LocalKeySigner {
    async fn get_identity(&self) -> Result<String> {
        Ok(self.pubkey.clone())
    }

    async fn sign(&self, event: &UnsignedEvent) -> Result<Event> {
        self.sign_now(event)
    }
}
