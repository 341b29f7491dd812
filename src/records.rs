//! Typed payloads of the records an Angor profile is made of.

use serde::{Deserialize, Serialize};

use crate::event::KIND_BADGE_DEFINITION;

/// Relays used when nothing is configured.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://purplepag.es",
    "wss://relay.primal.net",
    "wss://nos.lol",
    "wss://relay.angor.io",
    "wss://relay2.angor.io",
];

/// Slug of the badge granted to project team members.
pub const MEMBER_BADGE_SLUG: &str = "angor-project-member";

/// Logical records multiplexed under the application data kind, each told
/// apart by its `d` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Project,
    Faq,
    Members,
    Media,
    Relays,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [
        RecordKind::Project,
        RecordKind::Faq,
        RecordKind::Members,
        RecordKind::Media,
        RecordKind::Relays,
    ];

    /// Value of the `d` tag identifying this record.
    pub fn discriminator(self) -> &'static str {
        match self {
            RecordKind::Project => "angor:project",
            RecordKind::Faq => "angor:faq",
            RecordKind::Members => "angor:members",
            RecordKind::Media => "angor:media",
            RecordKind::Relays => "angor:relays",
        }
    }

    pub fn from_discriminator(d: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.discriminator() == d)
    }
}

/// External identity claim carried as an `i` tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityLink {
    pub platform: String,
    pub identity: String,
    #[serde(default)]
    pub proof: String,
}

/// Editable profile metadata. Every field is a plain string so absent remote
/// fields become empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileRecord {
    pub name: String,
    pub display_name: String,
    pub about: String,
    pub picture: String,
    pub banner: String,
    pub nip05: String,
    pub lud16: String,
    pub website: String,
    pub identity_tags: Vec<IdentityLink>,
}

/// Project description; stored as plain text, not JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContent {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
}

/// FAQ entry. `id` only exists locally and is never published.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqItem {
    #[serde(default)]
    pub id: String,
    pub question: String,
    pub answer: String,
}

/// FAQ entry as it appears on relays.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RemoteFaqItem {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

/// Team members, by public key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Members {
    #[serde(default)]
    pub pubkeys: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub url: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
}

/// Public profile of a team member, as shown next to the members list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProfile {
    pub npub: String,
    pub pubkey: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
}

/// A NIP-58 badge definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeDefinition {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub thumb: String,
}

impl BadgeDefinition {
    /// Definition of the team member badge issued by a project.
    pub fn project_member(image: &str, thumb: &str) -> Self {
        Self {
            slug: MEMBER_BADGE_SLUG.into(),
            name: "Angor Project Member".into(),
            description: "Member of an Angor project team".into(),
            image: image.into(),
            thumb: thumb.into(),
        }
    }
}

/// Coordinate (`kind:issuer:slug`) of a badge definition.
pub fn badge_coordinate(issuer: &str, slug: &str) -> String {
    format!("{KIND_BADGE_DEFINITION}:{issuer}:{slug}")
}

/// Slug part of a badge coordinate.
pub fn coordinate_slug(coordinate: &str) -> Option<&str> {
    let mut parts = coordinate.splitn(3, ':');
    let kind = parts.next()?;
    let _issuer = parts.next()?;
    let slug = parts.next()?;
    (kind == KIND_BADGE_DEFINITION.to_string()).then_some(slug)
}
