//! Turning editable state into unsigned event descriptors.
//!
//! Everything here is pure: no clock, no network, no signer. The same state
//! always yields the same descriptors in the same order.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::{Tag, UnsignedEvent, KIND_APP_DATA, KIND_BADGE_AWARD, KIND_BADGE_DEFINITION, KIND_METADATA};
use crate::records::{
    BadgeDefinition, FaqItem, IdentityLink, MediaItem, Members, ProfileRecord, ProjectContent,
    RecordKind, RemoteFaqItem,
};

/// Sections of a profile to publish. `None` sections are left untouched on
/// the relays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditableState {
    pub profile: Option<ProfileRecord>,
    pub project: Option<ProjectContent>,
    pub faq: Option<Vec<FaqItem>>,
    pub members: Option<Members>,
    pub media: Option<Vec<MediaItem>>,
    pub relays: Option<Vec<String>>,
}

/// Kind 0 content. `identity_tags` travel as `i` tags instead.
#[derive(Serialize)]
struct MetadataContent<'a> {
    name: &'a str,
    display_name: &'a str,
    about: &'a str,
    picture: &'a str,
    banner: &'a str,
    nip05: &'a str,
    lud16: &'a str,
    website: &'a str,
}

fn app_data(record: RecordKind, content: String) -> UnsignedEvent {
    UnsignedEvent {
        kind: KIND_APP_DATA,
        tags: vec![Tag::new(["d", record.discriminator()])],
        content,
    }
}

/// `["i", "platform:identity", proof]` for every complete link.
pub fn identity_tags(links: &[IdentityLink]) -> Vec<Tag> {
    links
        .iter()
        .filter(|link| !link.platform.is_empty() && !link.identity.is_empty())
        .map(|link| {
            Tag::new([
                "i".to_string(),
                format!("{}:{}", link.platform, link.identity),
                link.proof.clone(),
            ])
        })
        .collect()
}

pub fn profile_event(profile: &ProfileRecord) -> Result<UnsignedEvent> {
    let content = MetadataContent {
        name: &profile.name,
        display_name: &profile.display_name,
        about: &profile.about,
        picture: &profile.picture,
        banner: &profile.banner,
        nip05: &profile.nip05,
        lud16: &profile.lud16,
        website: &profile.website,
    };
    Ok(UnsignedEvent {
        kind: KIND_METADATA,
        tags: identity_tags(&profile.identity_tags),
        content: serde_json::to_string(&content)?,
    })
}

/// Build one descriptor per populated section, in publish order: profile,
/// project, faq, members, media, relays.
pub fn synthesize(state: &EditableState) -> Result<Vec<UnsignedEvent>> {
    let mut events = Vec::new();
    if let Some(profile) = &state.profile {
        events.push(profile_event(profile)?);
    }
    if let Some(project) = &state.project {
        events.push(app_data(RecordKind::Project, project.content.clone()));
    }
    if let Some(faq) = &state.faq {
        let remote: Vec<RemoteFaqItem> = faq
            .iter()
            .map(|item| RemoteFaqItem {
                question: item.question.clone(),
                answer: item.answer.clone(),
            })
            .collect();
        events.push(app_data(RecordKind::Faq, serde_json::to_string(&remote)?));
    }
    if let Some(members) = &state.members {
        events.push(app_data(RecordKind::Members, serde_json::to_string(members)?));
    }
    if let Some(media) = &state.media {
        events.push(app_data(RecordKind::Media, serde_json::to_string(media)?));
    }
    if let Some(relays) = &state.relays {
        events.push(app_data(RecordKind::Relays, serde_json::to_string(relays)?));
    }
    Ok(events)
}

/// NIP-58 badge definition (kind 30009).
pub fn badge_definition_event(badge: &BadgeDefinition) -> UnsignedEvent {
    UnsignedEvent {
        kind: KIND_BADGE_DEFINITION,
        tags: vec![
            Tag::new(["d", badge.slug.as_str()]),
            Tag::new(["name", badge.name.as_str()]),
            Tag::new(["description", badge.description.as_str()]),
            Tag::new(["image", badge.image.as_str(), "1024x1024"]),
            Tag::new(["thumb", badge.thumb.as_str(), "256x256"]),
        ],
        content: String::new(),
    }
}

/// NIP-58 badge award (kind 8) of the definition at `coordinate`.
pub fn badge_award_event(coordinate: &str, recipient: &str) -> UnsignedEvent {
    UnsignedEvent {
        kind: KIND_BADGE_AWARD,
        tags: vec![Tag::new(["a", coordinate]), Tag::new(["p", recipient])],
        content: String::new(),
    }
}
