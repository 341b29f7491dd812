//! Loading the latest version of each record from relays.
//!
//! Every loader returns `Ok(None)` both when the record was never published
//! and when its payload does not decode. The two cases are logged differently
//! (`debug!` versus `warn!`) so malformed relay data stays visible without
//! breaking the editor.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::event::{Event, Filter, Tag, KIND_APP_DATA, KIND_BADGE_AWARD, KIND_BADGE_DEFINITION, KIND_METADATA};
use crate::keys;
use crate::manager::EventSource;
use crate::records::{
    coordinate_slug, FaqItem, IdentityLink, MediaItem, MemberProfile, Members, ProfileRecord,
    ProjectContent, RecordKind, RemoteFaqItem,
};

/// Profile metadata plus the raw material callers need from the event.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedProfile {
    /// Decoded fields. `identity_tags` holds links from the legacy
    /// `identityTags` content array, if any.
    pub profile: ProfileRecord,
    /// Tags of the selected event, for [`identity_links_from_tags`].
    pub tags: Vec<Tag>,
    pub created_at: u64,
}

/// Newest event by `created_at`; the first one seen wins a tie.
fn newest(events: Vec<Event>) -> Option<Event> {
    events.into_iter().fold(None, |best, ev| match best {
        Some(b) if b.created_at >= ev.created_at => Some(b),
        _ => Some(ev),
    })
}

/// First non-null string among `keys`, so `null` and missing both read as absent.
fn str_field(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| obj.get(key))
        .find_map(|v| v.as_str().map(str::to_string))
}

fn legacy_links(obj: &Value) -> Vec<IdentityLink> {
    obj.get("identityTags")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

/// Parse `["i", "platform:identity", proof]` tags. Malformed entries are skipped.
pub fn identity_links_from_tags(tags: &[Tag]) -> Vec<IdentityLink> {
    tags.iter()
        .filter(|tag| tag.kind() == Some("i"))
        .filter_map(|tag| {
            let (platform, identity) = tag.value()?.split_once(':')?;
            if platform.is_empty() || identity.is_empty() {
                return None;
            }
            Some(IdentityLink {
                platform: platform.to_string(),
                identity: identity.to_string(),
                proof: tag.0.get(2).cloned().unwrap_or_default(),
            })
        })
        .collect()
}

/// Decode kind 0 content into a profile. Returns `None` unless the content is
/// a JSON object.
pub fn profile_from_content(content: &str) -> Option<ProfileRecord> {
    let obj: Value = serde_json::from_str(content).ok()?;
    if !obj.is_object() {
        return None;
    }
    let field = |keys: &[&str]| str_field(&obj, keys).unwrap_or_default();
    Some(ProfileRecord {
        name: field(&["name"]),
        display_name: field(&["display_name", "displayName"]),
        about: field(&["about"]),
        picture: field(&["picture"]),
        banner: field(&["banner"]),
        nip05: field(&["nip05"]),
        lud16: field(&["lud16"]),
        website: field(&["website"]),
        identity_tags: legacy_links(&obj),
    })
}

/// Read side of the record store.
pub struct RecordReader<S> {
    source: S,
}

impl<S: EventSource> RecordReader<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Newest application data event of `record` authored by `identity`.
    pub async fn latest_record_event(
        &self,
        identity: &str,
        record: RecordKind,
    ) -> Result<Option<Event>> {
        let author = keys::normalize_identity(identity)?;
        let filter = Filter::new()
            .kind(KIND_APP_DATA)
            .author(author)
            .tag("d", [record.discriminator()])
            .limit(1);
        let events = self.source.fetch_events(&filter).await?;
        let latest = newest(events);
        if latest.is_none() {
            debug!(record = record.discriminator(), "record not found");
        }
        Ok(latest)
    }

    /// Load and JSON-decode `record`.
    pub async fn load_record<T: DeserializeOwned>(
        &self,
        identity: &str,
        record: RecordKind,
    ) -> Result<Option<T>> {
        let Some(event) = self.latest_record_event(identity, record).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&event.content) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => {
                warn!(
                    record = record.discriminator(),
                    event = %event.id,
                    "ignoring undecodable record: {e}"
                );
                Ok(None)
            }
        }
    }

    pub async fn load_project(&self, identity: &str) -> Result<Option<ProjectContent>> {
        let event = self.latest_record_event(identity, RecordKind::Project).await?;
        Ok(event.map(|ev| ProjectContent {
            content: ev.content,
            created_at: Some(ev.created_at),
        }))
    }

    /// FAQ entries, each given a fresh local id.
    pub async fn load_faq(&self, identity: &str) -> Result<Option<Vec<FaqItem>>> {
        let items: Option<Vec<RemoteFaqItem>> = self.load_record(identity, RecordKind::Faq).await?;
        Ok(items.map(|items| {
            items
                .into_iter()
                .map(|item| FaqItem {
                    id: Uuid::new_v4().to_string(),
                    question: item.question,
                    answer: item.answer,
                })
                .collect()
        }))
    }

    pub async fn load_members(&self, identity: &str) -> Result<Option<Members>> {
        self.load_record(identity, RecordKind::Members).await
    }

    pub async fn load_media(&self, identity: &str) -> Result<Option<Vec<MediaItem>>> {
        self.load_record(identity, RecordKind::Media).await
    }

    pub async fn load_relay_set(&self, identity: &str) -> Result<Option<Vec<String>>> {
        self.load_record(identity, RecordKind::Relays).await
    }

    /// Newest kind 0 event of `identity`, decoded.
    pub async fn load_profile_metadata(&self, identity: &str) -> Result<Option<LoadedProfile>> {
        let author = keys::normalize_identity(identity)?;
        let filter = Filter::new().kind(KIND_METADATA).author(author).limit(1);
        let Some(event) = newest(self.source.fetch_events(&filter).await?) else {
            debug!("profile metadata not found");
            return Ok(None);
        };
        let Some(profile) = profile_from_content(&event.content) else {
            warn!(event = %event.id, "ignoring undecodable profile metadata");
            return Ok(None);
        };
        Ok(Some(LoadedProfile {
            profile,
            tags: event.tags,
            created_at: event.created_at,
        }))
    }

    /// Profiles of team members, in the order requested.
    ///
    /// Identities may be npub or hex; ones that fail to decode, have no
    /// profile, or carry unparsable content are skipped.
    pub async fn fetch_member_profiles(&self, identities: &[String]) -> Result<Vec<MemberProfile>> {
        let mut seen = HashSet::new();
        let mut authors = Vec::new();
        for identity in identities.iter().filter(|id| !id.trim().is_empty()) {
            match keys::normalize_identity(identity) {
                Ok(hex) if seen.insert(hex.clone()) => authors.push(hex),
                Ok(_) => {}
                Err(e) => warn!(identity = %identity, "skipping member: {e}"),
            }
        }
        if authors.is_empty() {
            return Ok(Vec::new());
        }

        let filter = Filter::new().kind(KIND_METADATA).authors(authors.iter().cloned());
        let mut latest: HashMap<String, Event> = HashMap::new();
        for ev in self.source.fetch_events(&filter).await? {
            match latest.get(&ev.pubkey) {
                Some(current) if current.created_at >= ev.created_at => {}
                _ => {
                    latest.insert(ev.pubkey.clone(), ev);
                }
            }
        }

        let mut profiles = Vec::new();
        for author in &authors {
            let Some(ev) = latest.get(author) else { continue };
            let obj: Value = match serde_json::from_str(&ev.content) {
                Ok(obj @ Value::Object(_)) => obj,
                _ => {
                    warn!(event = %ev.id, "skipping unparsable member profile");
                    continue;
                }
            };
            let Ok(npub) = keys::encode_npub(&ev.pubkey) else { continue };
            profiles.push(MemberProfile {
                npub,
                pubkey: ev.pubkey.clone(),
                name: str_field(&obj, &["name"]),
                display_name: str_field(&obj, &["display_name", "displayName"]),
                picture: str_field(&obj, &["picture"]),
                nip05: str_field(&obj, &["nip05"]),
                about: str_field(&obj, &["about"]),
            });
        }
        Ok(profiles)
    }

    /// Which `recipients` hold the `slug` badge issued by `issuer`.
    ///
    /// Recipients may be given as `npub` or hex; the result is keyed by the
    /// strings as passed in. Every recipient starts out `false`, including
    /// ones that do not decode, and awards of other badges by the same
    /// issuer are ignored.
    pub async fn fetch_badge_awards(
        &self,
        issuer: &str,
        recipients: &[String],
        slug: &str,
    ) -> Result<BTreeMap<String, bool>> {
        let mut results: BTreeMap<String, bool> =
            recipients.iter().map(|r| (r.clone(), false)).collect();
        let mut by_hex: HashMap<String, Vec<&str>> = HashMap::new();
        for recipient in recipients {
            match keys::normalize_identity(recipient) {
                Ok(hex) => by_hex.entry(hex).or_default().push(recipient),
                Err(e) => warn!(recipient = %recipient, "skipping badge recipient: {e}"),
            }
        }
        if by_hex.is_empty() {
            return Ok(results);
        }
        let issuer = keys::normalize_identity(issuer)?;
        let filter = Filter::new()
            .kind(KIND_BADGE_AWARD)
            .author(issuer)
            .tag("p", by_hex.keys().cloned());
        for ev in self.source.fetch_events(&filter).await? {
            let awards_slug = ev
                .tags_named("a")
                .filter_map(Tag::value)
                .any(|coordinate| coordinate_slug(coordinate) == Some(slug));
            if !awards_slug {
                continue;
            }
            for tagged in ev.tags_named("p").filter_map(Tag::value) {
                let Some(callers) = by_hex.get(&tagged.to_ascii_lowercase()) else {
                    continue;
                };
                for key in callers {
                    if let Some(held) = results.get_mut(*key) {
                        *held = true;
                    }
                }
            }
        }
        Ok(results)
    }

    /// Whether `issuer` already awarded the badge at `coordinate` to `recipient`.
    pub async fn check_badge_awarded(
        &self,
        issuer: &str,
        coordinate: &str,
        recipient: &str,
    ) -> Result<bool> {
        let issuer = keys::normalize_identity(issuer)?;
        let recipient = keys::normalize_identity(recipient)?;
        let filter = Filter::new()
            .kind(KIND_BADGE_AWARD)
            .author(issuer)
            .tag("a", [coordinate])
            .tag("p", [recipient])
            .limit(1);
        Ok(!self.source.fetch_events(&filter).await?.is_empty())
    }

    /// Newest definition of badge `slug` by `issuer`.
    pub async fn find_badge_definition(&self, issuer: &str, slug: &str) -> Result<Option<Event>> {
        let issuer = keys::normalize_identity(issuer)?;
        let filter = Filter::new()
            .kind(KIND_BADGE_DEFINITION)
            .author(issuer)
            .tag("d", [slug]);
        Ok(newest(self.source.fetch_events(&filter).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{badge_coordinate, MediaType, MEMBER_BADGE_SLUG};
    use crate::signer::LocalKeySigner;
    use crate::test_utils::{signed, MemoryRelay};
    use serde_json::json;

    fn owner() -> LocalKeySigner {
        LocalKeySigner::from_bytes(&[1u8; 32]).unwrap()
    }

    fn app(signer: &LocalKeySigner, record: RecordKind, content: &str, at: u64) -> Event {
        signed(signer, KIND_APP_DATA, vec![Tag::new(["d", record.discriminator()])], content, at)
    }

    #[tokio::test]
    async fn missing_records_are_none() {
        let reader = RecordReader::new(MemoryRelay::new());
        let me = owner();
        let id = me.public_key();
        assert!(reader.load_project(id).await.unwrap().is_none());
        assert!(reader.load_faq(id).await.unwrap().is_none());
        assert!(reader.load_members(id).await.unwrap().is_none());
        assert!(reader.load_media(id).await.unwrap().is_none());
        assert!(reader.load_relay_set(id).await.unwrap().is_none());
        assert!(reader.load_profile_metadata(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_record_wins() {
        let me = owner();
        let relay = MemoryRelay::with_events(vec![
            app(&me, RecordKind::Project, "old", 10),
            app(&me, RecordKind::Project, "new", 20),
            app(&me, RecordKind::Faq, "[]", 30),
        ]);
        let reader = RecordReader::new(relay);
        let project = reader.load_project(me.public_key()).await.unwrap().unwrap();
        assert_eq!(project.content, "new");
        assert_eq!(project.created_at, Some(20));
    }

    #[tokio::test]
    async fn other_authors_are_ignored() {
        let me = owner();
        let other = LocalKeySigner::from_bytes(&[2u8; 32]).unwrap();
        let relay = MemoryRelay::with_events(vec![app(&other, RecordKind::Media, "[]", 1)]);
        let reader = RecordReader::new(relay);
        assert!(reader.load_media(me.public_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn undecodable_payloads_read_as_missing() {
        let me = owner();
        let relay = MemoryRelay::with_events(vec![
            app(&me, RecordKind::Faq, "{not json", 1),
            app(&me, RecordKind::Members, "42", 1),
            signed(&me, KIND_METADATA, vec![], "\"just a string\"", 1),
        ]);
        let reader = RecordReader::new(relay);
        assert!(reader.load_faq(me.public_key()).await.unwrap().is_none());
        assert!(reader.load_members(me.public_key()).await.unwrap().is_none());
        assert!(reader.load_profile_metadata(me.public_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn network_failures_propagate() {
        let relay = MemoryRelay::new();
        relay.fail_fetches();
        let reader = RecordReader::new(relay);
        let me = owner();
        assert!(reader.load_faq(me.public_key()).await.is_err());
        assert!(reader.load_profile_metadata(me.public_key()).await.is_err());
    }

    #[tokio::test]
    async fn faq_entries_get_local_ids() {
        let me = owner();
        let content = json!([{"question": "q1", "answer": "a1"}, {"question": "q2", "answer": "a2"}]);
        let relay = MemoryRelay::with_events(vec![app(&me, RecordKind::Faq, &content.to_string(), 1)]);
        let faq = RecordReader::new(relay).load_faq(me.public_key()).await.unwrap().unwrap();
        assert_eq!(faq.len(), 2);
        assert_eq!(faq[1].question, "q2");
        assert!(!faq[0].id.is_empty());
        assert_ne!(faq[0].id, faq[1].id);
    }

    #[tokio::test]
    async fn typed_payloads_decode() {
        let me = owner();
        let relay = MemoryRelay::with_events(vec![
            app(&me, RecordKind::Members, r#"{"pubkeys":["aa","bb"]}"#, 1),
            app(&me, RecordKind::Media, r#"[{"url":"u","type":"video"}]"#, 1),
            app(&me, RecordKind::Relays, r#"["wss://a","wss://b"]"#, 1),
        ]);
        let reader = RecordReader::new(relay);
        let id = me.public_key();
        assert_eq!(reader.load_members(id).await.unwrap().unwrap().pubkeys, vec!["aa", "bb"]);
        let media = reader.load_media(id).await.unwrap().unwrap();
        assert_eq!(media[0].media_type, MediaType::Video);
        assert_eq!(reader.load_relay_set(id).await.unwrap().unwrap(), vec!["wss://a", "wss://b"]);
    }

    #[tokio::test]
    async fn newest_profile_metadata_is_selected() {
        let me = owner();
        let relay = MemoryRelay::with_events(vec![
            signed(&me, KIND_METADATA, vec![], r#"{"name":"newer"}"#, 200),
            signed(&me, KIND_METADATA, vec![], r#"{"name":"older"}"#, 100),
        ]);
        let loaded = RecordReader::new(relay)
            .load_profile_metadata(me.public_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.profile.name, "newer");
        assert_eq!(loaded.created_at, 200);
    }

    #[tokio::test]
    async fn profile_fields_are_normalized() {
        let me = owner();
        let content = json!({
            "name": "alice",
            "displayName": "Alice A",
            "about": null,
            "identityTags": [{"platform": "github", "identity": "alice", "proof": "p"}]
        });
        let tags = vec![Tag::new(["i", "twitter:alice", "https://x.com/1"])];
        let relay = MemoryRelay::with_events(vec![signed(&me, KIND_METADATA, tags.clone(), &content.to_string(), 1)]);
        let loaded = RecordReader::new(relay)
            .load_profile_metadata(me.public_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.profile.display_name, "Alice A");
        assert_eq!(loaded.profile.about, "");
        assert_eq!(loaded.profile.website, "");
        assert_eq!(loaded.profile.identity_tags[0].platform, "github");
        assert_eq!(loaded.tags, tags);
    }

    #[test]
    fn display_name_prefers_snake_case() {
        let p = profile_from_content(r#"{"display_name":"a","displayName":"b"}"#).unwrap();
        assert_eq!(p.display_name, "a");
        let p = profile_from_content(r#"{"display_name":null,"displayName":"b"}"#).unwrap();
        assert_eq!(p.display_name, "b");
    }

    #[test]
    fn identity_links_parse_i_tags() {
        let tags = vec![
            Tag::new(["i", "github:alice", "https://gist/1"]),
            Tag::new(["i", "mastodon:alice@example.social"]),
            Tag::new(["i", "nocolon"]),
            Tag::new(["i", ":empty"]),
            Tag::new(["p", "github:bob"]),
        ];
        let links = identity_links_from_tags(&tags);
        assert_eq!(
            links,
            vec![
                IdentityLink {
                    platform: "github".into(),
                    identity: "alice".into(),
                    proof: "https://gist/1".into()
                },
                IdentityLink {
                    platform: "mastodon".into(),
                    identity: "alice@example.social".into(),
                    proof: String::new()
                },
            ]
        );
    }

    #[tokio::test]
    async fn member_profiles_skip_bad_input_and_keep_newest() {
        let a = LocalKeySigner::from_bytes(&[3u8; 32]).unwrap();
        let b = LocalKeySigner::from_bytes(&[4u8; 32]).unwrap();
        let c = LocalKeySigner::from_bytes(&[5u8; 32]).unwrap();
        let relay = MemoryRelay::with_events(vec![
            signed(&a, KIND_METADATA, vec![], r#"{"name":"a-old"}"#, 1),
            signed(&a, KIND_METADATA, vec![], r#"{"name":"a-new","display_name":"A"}"#, 2),
            signed(&b, KIND_METADATA, vec![], "garbage", 1),
            signed(&c, KIND_METADATA, vec![], r#"{"displayName":"C"}"#, 1),
        ]);
        let reader = RecordReader::new(relay);
        let a_npub = keys::encode_npub(a.public_key()).unwrap();
        let requested = vec![
            c.public_key().to_string(),
            "npub1invalid".to_string(),
            a_npub.clone(),
            b.public_key().to_string(),
            String::new(),
        ];
        let profiles = reader.fetch_member_profiles(&requested).await.unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].pubkey, c.public_key());
        assert_eq!(profiles[0].display_name.as_deref(), Some("C"));
        assert_eq!(profiles[0].name, None);
        assert_eq!(profiles[1].npub, a_npub);
        assert_eq!(profiles[1].name.as_deref(), Some("a-new"));
    }

    #[tokio::test]
    async fn member_profiles_without_valid_input_skip_the_network() {
        let reader = RecordReader::new(MemoryRelay::new());
        let profiles = reader.fetch_member_profiles(&["bogus".to_string()]).await.unwrap();
        assert!(profiles.is_empty());
        assert_eq!(reader.source().query_count(), 0);
    }

    fn member_key(seed: u8) -> String {
        LocalKeySigner::from_bytes(&[seed; 32]).unwrap().public_key().to_string()
    }

    #[tokio::test]
    async fn badge_awards_only_count_the_requested_slug() {
        let issuer = owner();
        let iss = issuer.public_key().to_string();
        let (r1, r2, r3, stranger) = (member_key(2), member_key(3), member_key(4), member_key(5));
        let member = badge_coordinate(&iss, MEMBER_BADGE_SLUG);
        let other = badge_coordinate(&iss, "early-backer");
        let award = |coord: &str, p: &str, at| {
            signed(&issuer, KIND_BADGE_AWARD, vec![Tag::new(["a", coord]), Tag::new(["p", p])], "", at)
        };
        let relay = MemoryRelay::with_events(vec![
            award(&member, &r1, 1),
            award(&other, &r2, 2),
            award(&member, &stranger, 3),
        ]);
        let reader = RecordReader::new(relay);
        let recipients = vec![r1.clone(), r2.clone(), r3.clone()];
        let result = reader
            .fetch_badge_awards(&iss, &recipients, MEMBER_BADGE_SLUG)
            .await
            .unwrap();
        assert_eq!(
            result,
            BTreeMap::from([(r1.clone(), true), (r2.clone(), false), (r3, false)])
        );
        assert!(reader.check_badge_awarded(&iss, &member, &r1).await.unwrap());
        assert!(!reader.check_badge_awarded(&iss, &member, &r2).await.unwrap());
        assert!(reader.check_badge_awarded(&iss, &other, &r2).await.unwrap());
    }

    #[tokio::test]
    async fn badge_awards_accept_npub_recipients() {
        let issuer = owner();
        let iss = issuer.public_key().to_string();
        let holder = member_key(2);
        let holder_npub = keys::encode_npub(&holder).unwrap();
        let coordinate = badge_coordinate(&iss, MEMBER_BADGE_SLUG);
        let relay = MemoryRelay::with_events(vec![signed(
            &issuer,
            KIND_BADGE_AWARD,
            vec![Tag::new(["a", coordinate.as_str()]), Tag::new(["p", holder.as_str()])],
            "",
            1,
        )]);
        let reader = RecordReader::new(relay);
        let recipients = vec![holder_npub.clone(), holder.clone(), "bogus".to_string()];
        let result = reader
            .fetch_badge_awards(&iss, &recipients, MEMBER_BADGE_SLUG)
            .await
            .unwrap();
        assert_eq!(
            result,
            BTreeMap::from([
                (holder_npub.clone(), true),
                (holder, true),
                ("bogus".to_string(), false),
            ])
        );
        assert!(reader
            .check_badge_awarded(&iss, &coordinate, &holder_npub)
            .await
            .unwrap());

        let reader = RecordReader::new(MemoryRelay::new());
        let result = reader
            .fetch_badge_awards(&iss, &["bogus".to_string()], MEMBER_BADGE_SLUG)
            .await
            .unwrap();
        assert_eq!(result, BTreeMap::from([("bogus".to_string(), false)]));
        assert_eq!(reader.source().query_count(), 0);
    }

    #[tokio::test]
    async fn badge_definitions_are_found_by_slug() {
        let issuer = owner();
        let def = signed(&issuer, KIND_BADGE_DEFINITION, vec![Tag::new(["d", MEMBER_BADGE_SLUG])], "", 1);
        let reader = RecordReader::new(MemoryRelay::with_events(vec![def.clone()]));
        let found = reader
            .find_badge_definition(issuer.public_key(), MEMBER_BADGE_SLUG)
            .await
            .unwrap();
        assert_eq!(found, Some(def));
        assert!(reader
            .find_badge_definition(issuer.public_key(), "other")
            .await
            .unwrap()
            .is_none());
    }
}
