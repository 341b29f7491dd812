//! Signing and publishing a batch of synthesized events.
//!
//! A [`SigningCoordinator`] walks one request through
//! `Idle -> AwaitingSignature -> Validating -> Publishing -> Idle`, or ends in
//! `Cancelled`. The signer's identity is always checked against the profile
//! owner before anything is signed, and nothing is published until every
//! event in the batch carries a valid signature.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::event::{Event, UnsignedEvent, KIND_BADGE_AWARD, KIND_BADGE_DEFINITION, KIND_METADATA};
use crate::keys;
use crate::manager::EventPublisher;
use crate::signer::{ExternalSigner, LocalKeySigner};

/// Content longer than this is summarized in previews.
pub const PREVIEW_LIMIT: usize = 280;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningState {
    Idle,
    AwaitingSignature,
    Validating,
    Publishing,
    Cancelled,
}

/// How the user chose to sign.
#[derive(Debug, Clone)]
pub enum SigningMethod {
    /// Delegate to the installed external signer.
    Extension,
    /// Sign locally with a private key given as `nsec` or hex.
    PrivateKey(String),
}

/// Result of a signing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningOutcome {
    pub signed: bool,
    /// Ids of the published events, in publish order.
    pub published: Vec<String>,
}

/// Events awaiting a signature by `expected_identity`.
#[derive(Debug, Clone, PartialEq)]
pub struct SigningRequest {
    pub events: Vec<UnsignedEvent>,
    /// Hex public key of the profile owner.
    pub expected_identity: String,
}

impl SigningRequest {
    /// `expected_identity` may be npub or hex.
    pub fn new(events: Vec<UnsignedEvent>, expected_identity: &str) -> Result<Self> {
        Ok(Self {
            events,
            expected_identity: keys::normalize_identity(expected_identity)?,
        })
    }

    /// Human readable summary, one line per event.
    pub fn preview(&self) -> String {
        self.events
            .iter()
            .map(|ev| {
                let label = match (ev.kind, ev.discriminator()) {
                    (KIND_METADATA, _) => "profile metadata".to_string(),
                    (KIND_BADGE_DEFINITION, Some(slug)) => format!("badge definition {slug}"),
                    (KIND_BADGE_AWARD, _) => "badge award".to_string(),
                    (kind, Some(d)) => format!("kind {kind} {d}"),
                    (kind, None) => format!("kind {kind}"),
                };
                let chars = ev.content.chars().count();
                if chars > PREVIEW_LIMIT {
                    format!("{label}: {chars} characters")
                } else if ev.content.is_empty() {
                    format!("{label}: {} tag(s)", ev.tags.len())
                } else {
                    format!("{label}: {}", ev.content)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn check_identity(expected: &str, actual: &str) -> Result<()> {
    let actual = keys::normalize_identity(actual)?;
    if actual != expected {
        return Err(Error::IdentityMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Ordered publish tasks. Each event is awaited before the next is sent.
pub struct PublishPlan {
    events: Vec<Event>,
}

impl PublishPlan {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Publish in order, stopping at the first failure. Already published
    /// events are reported, not rolled back.
    pub async fn execute<P: EventPublisher + ?Sized>(self, publisher: &P) -> Result<Vec<String>> {
        let mut published = Vec::with_capacity(self.events.len());
        for event in self.events {
            match publisher.publish(&event).await {
                Ok(ack) => {
                    info!(event = %event.id, kind = event.kind, relay = %ack.relay, "published");
                    published.push(event.id);
                }
                Err(e) => {
                    warn!(event = %event.id, done = published.len(), "publish aborted: {e}");
                    return Err(Error::PublishFailed {
                        published,
                        failed: event.id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(published)
    }
}

/// Validates signer identity, signs, and hands events to a publisher.
pub struct SigningCoordinator<P> {
    publisher: P,
    extension: Option<Arc<dyn ExternalSigner>>,
    state: watch::Sender<SigningState>,
}

impl<P: EventPublisher> SigningCoordinator<P> {
    pub fn new(publisher: P) -> Self {
        let (state, _) = watch::channel(SigningState::Idle);
        Self {
            publisher,
            extension: None,
            state,
        }
    }

    /// Install the delegated signer.
    pub fn with_extension(mut self, signer: Arc<dyn ExternalSigner>) -> Self {
        self.extension = Some(signer);
        self
    }

    pub fn has_extension(&self) -> bool {
        self.extension.is_some()
    }

    pub fn state(&self) -> SigningState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SigningState> {
        self.state.subscribe()
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Open a request; the caller shows [`SigningRequest::preview`] and then
    /// calls [`complete`](Self::complete) or [`cancel`](Self::cancel).
    pub fn request_signature(
        &self,
        events: Vec<UnsignedEvent>,
        expected_identity: &str,
    ) -> Result<SigningRequest> {
        let request = SigningRequest::new(events, expected_identity)?;
        self.state.send_replace(SigningState::AwaitingSignature);
        Ok(request)
    }

    /// Abandon `request`. Nothing has been signed or published.
    pub fn cancel(&self, request: SigningRequest) -> SigningOutcome {
        info!(events = request.events.len(), "signing cancelled");
        self.state.send_replace(SigningState::Cancelled);
        SigningOutcome::default()
    }

    /// Sign with the external signer after confirming it holds the expected
    /// account. Returned events are verified before they are accepted.
    pub async fn sign_with_extension(&self, request: &SigningRequest) -> Result<Vec<Event>> {
        let signer = self.extension.as_ref().ok_or(Error::ExtensionUnavailable)?;
        let identity = signer.get_identity().await?;
        check_identity(&request.expected_identity, &identity)?;

        let mut signed = Vec::with_capacity(request.events.len());
        for unsigned in &request.events {
            let event = signer.sign(unsigned).await?;
            event.verify()?;
            check_identity(&request.expected_identity, &event.pubkey)?;
            if event.kind != unsigned.kind || event.tags != unsigned.tags || event.content != unsigned.content {
                return Err(Error::Signing(format!(
                    "signer altered event {} before signing",
                    event.id
                )));
            }
            signed.push(event);
        }
        Ok(signed)
    }

    /// Sign with a private key after confirming it belongs to the expected
    /// account.
    pub fn sign_with_private_key(
        &self,
        request: &SigningRequest,
        private_key: &str,
    ) -> Result<Vec<Event>> {
        let signer = LocalKeySigner::parse(private_key)?;
        check_identity(&request.expected_identity, signer.public_key())?;
        request.events.iter().map(|ev| signer.sign_now(ev)).collect()
    }

    /// Sign every event in `request` with `method`, then publish them in order.
    pub async fn complete(
        &self,
        request: SigningRequest,
        method: SigningMethod,
    ) -> Result<SigningOutcome> {
        self.state.send_replace(SigningState::Validating);
        let signed = match &method {
            SigningMethod::Extension => self.sign_with_extension(&request).await,
            SigningMethod::PrivateKey(key) => self.sign_with_private_key(&request, key),
        };
        let signed = match signed {
            Ok(signed) => signed,
            Err(e) => {
                // The request stays open so the user can pick another path.
                self.state.send_replace(SigningState::AwaitingSignature);
                return Err(e);
            }
        };

        self.state.send_replace(SigningState::Publishing);
        let result = PublishPlan::new(signed).execute(&self.publisher).await;
        self.state.send_replace(SigningState::Idle);
        Ok(SigningOutcome {
            signed: true,
            published: result?,
        })
    }
}
