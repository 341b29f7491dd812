//! Issuing the project member badge.
//!
//! Duplicate awards are prevented by looking for an existing award before
//! issuing one. The look-up and the publish are separate relay round trips,
//! so two concurrent issuers can still both award.

use tracing::info;

use crate::error::Result;
use crate::keys;
use crate::manager::{EventPublisher, EventSource};
use crate::reader::RecordReader;
use crate::records::{badge_coordinate, BadgeDefinition};
use crate::signing::{SigningCoordinator, SigningMethod};
use crate::synth::{badge_award_event, badge_definition_event};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwardOutcome {
    /// The recipient already held the badge; nothing was signed.
    AlreadyAwarded,
    /// A new award event was published.
    Awarded { event_id: String },
}

/// Return the coordinate of `badge` as issued by `issuer`, publishing the
/// definition first if the issuer never did.
pub async fn ensure_definition<S, P>(
    reader: &RecordReader<S>,
    coordinator: &SigningCoordinator<P>,
    issuer: &str,
    badge: &BadgeDefinition,
    method: SigningMethod,
) -> Result<String>
where
    S: EventSource,
    P: EventPublisher,
{
    let issuer = keys::normalize_identity(issuer)?;
    let coordinate = badge_coordinate(&issuer, &badge.slug);
    if reader.find_badge_definition(&issuer, &badge.slug).await?.is_some() {
        return Ok(coordinate);
    }
    let request = coordinator.request_signature(vec![badge_definition_event(badge)], &issuer)?;
    coordinator.complete(request, method).await?;
    info!(%coordinate, "badge definition published");
    Ok(coordinate)
}

/// Award the badge at `coordinate` to `recipient` unless they already hold it.
pub async fn award_badge<S, P>(
    reader: &RecordReader<S>,
    coordinator: &SigningCoordinator<P>,
    issuer: &str,
    coordinate: &str,
    recipient: &str,
    method: SigningMethod,
) -> Result<AwardOutcome>
where
    S: EventSource,
    P: EventPublisher,
{
    let issuer = keys::normalize_identity(issuer)?;
    let recipient = keys::normalize_identity(recipient)?;
    if reader.check_badge_awarded(&issuer, coordinate, &recipient).await? {
        return Ok(AwardOutcome::AlreadyAwarded);
    }
    let request =
        coordinator.request_signature(vec![badge_award_event(coordinate, &recipient)], &issuer)?;
    let outcome = coordinator.complete(request, method).await?;
    let event_id = outcome.published.into_iter().next().unwrap_or_default();
    info!(%recipient, event = %event_id, "badge awarded");
    Ok(AwardOutcome::Awarded { event_id })
}
