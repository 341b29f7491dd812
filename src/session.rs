//! Editing session for one profile: load, edit locally, save.

use std::collections::HashSet;

use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::event::UnsignedEvent;
use crate::keys;
use crate::manager::{EventPublisher, EventSource};
use crate::reader::{identity_links_from_tags, RecordReader};
use crate::records::{
    FaqItem, MediaItem, MediaType, MemberProfile, Members, ProfileRecord, ProjectContent, RecordKind,
};
use crate::signing::{SigningCoordinator, SigningMethod, SigningOutcome};
use crate::synth::{synthesize, EditableState};

/// Owns the editable copy of one profile and its records.
pub struct ProfileEditSession<S> {
    reader: RecordReader<S>,
    identity: String,
    pub profile: ProfileRecord,
    pub project: ProjectContent,
    pub faq: Vec<FaqItem>,
    pub members: Members,
    pub media: Vec<MediaItem>,
    pub relays: Vec<String>,
    /// Records that exist on the relays, so clearing one still publishes.
    remote: HashSet<RecordKind>,
    /// Profile as last loaded; the target of [`reset`](Self::reset).
    snapshot: Option<ProfileRecord>,
}

impl<S: EventSource> ProfileEditSession<S> {
    /// Start an empty session for `identity` (npub or hex).
    pub fn new(source: S, identity: &str) -> Result<Self> {
        Ok(Self {
            reader: RecordReader::new(source),
            identity: keys::normalize_identity(identity)?,
            profile: ProfileRecord::default(),
            project: ProjectContent::default(),
            faq: Vec::new(),
            members: Members::default(),
            media: Vec::new(),
            relays: Vec::new(),
            remote: HashSet::new(),
            snapshot: None,
        })
    }

    /// Hex public key of the profile owner.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn npub(&self) -> Result<String> {
        keys::encode_npub(&self.identity)
    }

    pub fn reader(&self) -> &RecordReader<S> {
        &self.reader
    }

    /// Whether `record` was found on the relays at the last load or save.
    pub fn exists_remotely(&self, record: RecordKind) -> bool {
        self.remote.contains(&record)
    }

    /// Replace local state with the latest version of every record. Records
    /// that were never published load as empty defaults.
    pub async fn load(&mut self) -> Result<()> {
        let id = self.identity.as_str();
        let reader = &self.reader;
        let (profile, project, faq, members, media, relays) = tokio::try_join!(
            reader.load_profile_metadata(id),
            reader.load_project(id),
            reader.load_faq(id),
            reader.load_members(id),
            reader.load_media(id),
            reader.load_relay_set(id),
        )?;

        self.remote.clear();
        let mut mark = |kind, found: bool| {
            if found {
                self.remote.insert(kind);
            }
        };
        mark(RecordKind::Project, project.is_some());
        mark(RecordKind::Faq, faq.is_some());
        mark(RecordKind::Members, members.is_some());
        mark(RecordKind::Media, media.is_some());
        mark(RecordKind::Relays, relays.is_some());

        self.snapshot = profile.map(|loaded| {
            let mut profile = loaded.profile;
            let links = identity_links_from_tags(&loaded.tags);
            if !links.is_empty() {
                profile.identity_tags = links;
            }
            profile
        });
        self.profile = self.snapshot.clone().unwrap_or_default();
        self.project = project.unwrap_or_default();
        self.faq = faq.unwrap_or_default();
        self.members = members.unwrap_or_default();
        self.media = media.unwrap_or_default();
        self.relays = relays.unwrap_or_default();
        info!(
            identity = %self.identity,
            profile = self.snapshot.is_some(),
            records = self.remote.len(),
            "profile loaded"
        );
        Ok(())
    }

    /// Profiles of the current team members.
    pub async fn member_profiles(&self) -> Result<Vec<MemberProfile>> {
        self.reader.fetch_member_profiles(&self.members.pubkeys).await
    }

    /// Whether the profile fields differ from the loaded snapshot.
    pub fn is_dirty(&self) -> bool {
        match &self.snapshot {
            Some(snapshot) => *snapshot != self.profile,
            None => self.profile != ProfileRecord::default(),
        }
    }

    /// Restore the profile fields to the loaded snapshot.
    pub fn reset(&mut self) {
        self.profile = self.snapshot.clone().unwrap_or_default();
    }

    /// Sections to publish: always the profile, and every other record that
    /// has content or already exists remotely.
    pub fn editable_state(&self) -> EditableState {
        let keep = |kind: RecordKind, empty: bool| !empty || self.exists_remotely(kind);
        EditableState {
            profile: Some(self.profile.clone()),
            project: keep(RecordKind::Project, self.project.content.is_empty())
                .then(|| self.project.clone()),
            faq: keep(RecordKind::Faq, self.faq.is_empty()).then(|| self.faq.clone()),
            members: keep(RecordKind::Members, self.members.pubkeys.is_empty())
                .then(|| self.members.clone()),
            media: keep(RecordKind::Media, self.media.is_empty()).then(|| self.media.clone()),
            relays: keep(RecordKind::Relays, self.relays.is_empty()).then(|| self.relays.clone()),
        }
    }

    /// Unsigned events a save would publish.
    pub fn pending_events(&self) -> Result<Vec<UnsignedEvent>> {
        synthesize(&self.editable_state())
    }

    /// Sign and publish the current state as the profile owner.
    pub async fn save<P: EventPublisher>(
        &mut self,
        coordinator: &SigningCoordinator<P>,
        method: SigningMethod,
    ) -> Result<SigningOutcome> {
        let state = self.editable_state();
        let request = coordinator.request_signature(synthesize(&state)?, &self.identity)?;
        let outcome = coordinator.complete(request, method).await?;
        for (kind, present) in [
            (RecordKind::Project, state.project.is_some()),
            (RecordKind::Faq, state.faq.is_some()),
            (RecordKind::Members, state.members.is_some()),
            (RecordKind::Media, state.media.is_some()),
            (RecordKind::Relays, state.relays.is_some()),
        ] {
            if present {
                self.remote.insert(kind);
            }
        }
        Ok(outcome)
    }

    /// Append a FAQ entry and return its local id.
    pub fn add_faq(&mut self, question: &str, answer: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.faq.push(FaqItem {
            id: id.clone(),
            question: question.to_string(),
            answer: answer.to_string(),
        });
        id
    }

    pub fn remove_faq(&mut self, id: &str) -> bool {
        let before = self.faq.len();
        self.faq.retain(|item| item.id != id);
        self.faq.len() != before
    }

    /// Add a team member given as npub or hex. Returns `false` if already listed.
    pub fn add_member(&mut self, identity: &str) -> Result<bool> {
        let hex = keys::normalize_identity(identity)?;
        if self.member_index(&hex).is_some() {
            return Ok(false);
        }
        self.members.pubkeys.push(hex);
        Ok(true)
    }

    pub fn remove_member(&mut self, identity: &str) -> bool {
        let Ok(hex) = keys::normalize_identity(identity) else {
            return false;
        };
        match self.member_index(&hex) {
            Some(index) => {
                self.members.pubkeys.remove(index);
                true
            }
            None => false,
        }
    }

    /// Members may have been stored remotely as npub; compare in hex.
    fn member_index(&self, hex: &str) -> Option<usize> {
        self.members
            .pubkeys
            .iter()
            .position(|pk| keys::normalize_identity(pk).is_ok_and(|pk| pk == hex))
    }

    pub fn add_media(&mut self, url: &str, media_type: MediaType) {
        self.media.push(MediaItem {
            url: url.to_string(),
            media_type,
        });
    }

    pub fn remove_media(&mut self, index: usize) -> Option<MediaItem> {
        (index < self.media.len()).then(|| self.media.remove(index))
    }

    /// Move the media item at `from` so it ends up at `to`.
    pub fn move_media(&mut self, from: usize, to: usize) -> bool {
        if from >= self.media.len() || to >= self.media.len() {
            return false;
        }
        let item = self.media.remove(from);
        self.media.insert(to, item);
        true
    }
}
