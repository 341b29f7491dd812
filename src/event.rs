//! Nostr event model, kind constants, and subscription filters.

use std::collections::BTreeMap;

use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Profile metadata (NIP-01).
pub const KIND_METADATA: u32 = 0;
/// Badge award (NIP-58).
pub const KIND_BADGE_AWARD: u32 = 8;
/// Badge definition (NIP-58, addressable).
pub const KIND_BADGE_DEFINITION: u32 = 30009;
/// Application specific data (NIP-78, addressable).
pub const KIND_APP_DATA: u32 = 30078;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. The ones this crate reads and writes are:
///
/// - `d` – discriminator of an addressable record (`angor:faq`, a badge slug)
/// - `i` – external identity claim (`["i", "github:alice", "<proof url>"]`)
/// - `a` – coordinate of a badge definition referenced by an award
/// - `p` – public key of a badge recipient
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tag(fields.into_iter().map(Into::into).collect())
    }

    /// Tag name, e.g. `d`.
    pub fn kind(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// First value after the tag name.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// Signed Nostr event as exchanged with relays.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "<64 hex chars>",
///   "kind": 30078,
///   "created_at": 1700000000,
///   "tags": [["d", "angor:faq"]],
///   "content": "[{\"question\":\"q\",\"answer\":\"a\"}]",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `0` or `30078`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl Event {
    /// Value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.kind() == Some(name))
            .and_then(Tag::value)
    }

    /// All tags named `name`.
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Tag> + 'a {
        self.tags.iter().filter(move |tag| tag.kind() == Some(name))
    }

    /// Verify the event's ID and Schnorr signature.
    pub fn verify(&self) -> Result<()> {
        let hash = event_hash(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)?;
        if hex::encode(hash) != self.id {
            return Err(Error::Signing(format!("id mismatch for event {}", self.id)));
        }
        let bad_sig = |e: String| Error::Signing(format!("bad signature on {}: {e}", self.id));
        let sig_bytes = hex::decode(&self.sig).map_err(|e| bad_sig(e.to_string()))?;
        let sig = Signature::from_slice(&sig_bytes).map_err(|e| bad_sig(e.to_string()))?;
        let pk_bytes = hex::decode(&self.pubkey).map_err(|e| bad_sig(e.to_string()))?;
        let pk = XOnlyPublicKey::from_slice(&pk_bytes).map_err(|e| bad_sig(e.to_string()))?;
        let msg = Message::from_digest_slice(&hash).map_err(|e| bad_sig(e.to_string()))?;
        Secp256k1::verification_only()
            .verify_schnorr(&sig, &msg, &pk)
            .map_err(|e| bad_sig(e.to_string()))
    }
}

/// Event descriptor produced by the synthesizer: everything except the
/// author, timestamp, id, and signature, which are stamped at signing time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl UnsignedEvent {
    /// Value of the `d` tag, if the descriptor carries one.
    pub fn discriminator(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.kind() == Some("d"))
            .and_then(Tag::value)
    }

    /// Compute the id this descriptor gets once stamped with `pubkey` and `created_at`.
    pub fn id_for(&self, pubkey: &str, created_at: u64) -> Result<[u8; 32]> {
        event_hash(pubkey, created_at, self.kind, &self.tags, &self.content)
    }
}

/// Recompute the Nostr event hash from its fields.
pub fn event_hash(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    let data = serde_json::to_vec(&arr)?;
    Ok(Sha256::digest(&data).into())
}

/// NIP-01 subscription filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub ids: Vec<String>,
    pub authors: Vec<String>,
    pub kinds: Vec<u32>,
    /// Tag filters keyed by tag name without the `#` prefix.
    pub tags: BTreeMap<String, Vec<String>>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<u32>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: u32) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors.extend(authors.into_iter().map(Into::into));
        self
    }

    /// Add values for a single-letter tag filter such as `#d`.
    pub fn tag<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(name.trim_start_matches('#').to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Convert the filter into the JSON object used in REQ messages.
    pub fn to_json(&self) -> serde_json::Map<String, Value> {
        let strings = |values: &[String]| {
            Value::Array(values.iter().cloned().map(Value::String).collect())
        };
        let mut map = serde_json::Map::new();
        if !self.ids.is_empty() {
            map.insert("ids".into(), strings(&self.ids));
        }
        if !self.authors.is_empty() {
            map.insert("authors".into(), strings(&self.authors));
        }
        if !self.kinds.is_empty() {
            map.insert(
                "kinds".into(),
                Value::Array(self.kinds.iter().map(|k| Value::Number((*k).into())).collect()),
            );
        }
        for (tag, values) in &self.tags {
            if values.is_empty() {
                continue;
            }
            map.insert(format!("#{tag}"), strings(values));
        }
        if let Some(since) = self.since {
            map.insert("since".into(), Value::Number(since.into()));
        }
        if let Some(until) = self.until {
            map.insert("until".into(), Value::Number(until.into()));
        }
        if let Some(limit) = self.limit {
            map.insert("limit".into(), Value::Number(limit.into()));
        }
        map
    }

    /// Build a filter from a NIP-01 filter JSON object, ignoring unknown keys.
    pub fn from_value(val: &Value) -> Self {
        let strings = |key: &str| -> Vec<String> {
            val.get(key)
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default()
        };
        let kinds = val
            .get("kinds")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_u64().map(|u| u as u32)).collect())
            .unwrap_or_default();
        let mut tags = BTreeMap::new();
        if let Some(obj) = val.as_object() {
            for key in obj.keys() {
                if let Some(name) = key.strip_prefix('#') {
                    tags.insert(name.to_string(), strings(key));
                }
            }
        }
        Filter {
            ids: strings("ids"),
            authors: strings("authors"),
            kinds,
            tags,
            since: val.get("since").and_then(|v| v.as_u64()),
            until: val.get("until").and_then(|v| v.as_u64()),
            limit: val.get("limit").and_then(|v| v.as_u64()).map(|v| v as u32),
        }
    }

    /// Whether `ev` satisfies every constraint of this filter except `limit`.
    pub fn matches(&self, ev: &Event) -> bool {
        if !self.ids.is_empty() && !self.ids.contains(&ev.id) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.contains(&ev.pubkey) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&ev.kind) {
            return false;
        }
        for (name, values) in &self.tags {
            if values.is_empty() {
                continue;
            }
            let hit = ev
                .tags_named(name)
                .any(|tag| tag.value().is_some_and(|v| values.iter().any(|want| want == v)));
            if !hit {
                return false;
            }
        }
        self.since.map_or(true, |s| ev.created_at >= s)
            && self.until.map_or(true, |u| ev.created_at <= u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::LocalKeySigner;

    fn event(kind: u32, tags: Vec<Tag>, created_at: u64) -> Event {
        Event {
            id: "aa11".into(),
            pubkey: "p1".into(),
            kind,
            created_at,
            tags,
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn event_hash_matches_reference() {
        let pubkey = "00".repeat(32);
        let expected = {
            let obj = serde_json::json!([0, pubkey, 1, 1, Vec::<Tag>::new(), ""]);
            let mut hasher = Sha256::new();
            hasher.update(serde_json::to_vec(&obj).unwrap());
            let bytes = hasher.finalize();
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&bytes);
            arr
        };
        assert_eq!(event_hash(&pubkey, 1, 1, &[], "").unwrap(), expected);
    }

    #[test]
    fn tags_serialize_as_bare_arrays() {
        let ev = event(30078, vec![Tag::new(["d", "angor:faq"])], 1);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["tags"], serde_json::json!([["d", "angor:faq"]]));
    }

    #[test]
    fn verify_accepts_signed_and_rejects_tampered() {
        let signer = LocalKeySigner::from_bytes(&[1u8; 32]).unwrap();
        let unsigned = UnsignedEvent {
            kind: 1,
            tags: vec![],
            content: "hello".into(),
        };
        let ev = signer.sign_at(&unsigned, 10).unwrap();
        ev.verify().unwrap();

        let mut tampered = ev.clone();
        tampered.content = "bye".into();
        assert!(tampered.verify().is_err());

        let mut bad_sig = ev;
        bad_sig.sig.replace_range(0..2, "00");
        assert!(bad_sig.verify().is_err());
    }

    #[test]
    fn filter_json_omits_empty_fields() {
        let filter = Filter::new()
            .kind(KIND_APP_DATA)
            .author("p1")
            .tag("#d", ["angor:faq"])
            .tag("p", Vec::<String>::new())
            .limit(1);
        let json = Value::Object(filter.to_json());
        assert_eq!(
            json,
            serde_json::json!({
                "authors": ["p1"],
                "kinds": [30078],
                "#d": ["angor:faq"],
                "limit": 1
            })
        );
    }

    #[test]
    fn filter_from_value_reads_tag_filters() {
        let val = serde_json::json!({
            "authors": ["a1", "a2"],
            "kinds": [8],
            "#p": ["r1"],
            "#a": ["30009:a1:slug"],
            "since": 1,
            "until": 2,
            "limit": 3
        });
        let filter = Filter::from_value(&val);
        assert_eq!(filter.authors, vec!["a1".to_string(), "a2".to_string()]);
        assert_eq!(filter.kinds, vec![8]);
        assert_eq!(filter.tags["p"], vec!["r1".to_string()]);
        assert_eq!(filter.tags["a"], vec!["30009:a1:slug".to_string()]);
        assert_eq!(filter.since, Some(1));
        assert_eq!(filter.until, Some(2));
        assert_eq!(filter.limit, Some(3));
        assert_eq!(Filter::from_value(&Value::Object(filter.to_json())), filter);
    }

    #[test]
    fn filter_matches_tags_and_time() {
        let ev = event(30078, vec![Tag::new(["d", "angor:media"])], 20);
        let base = Filter::new().kind(KIND_APP_DATA).author("p1");
        assert!(base.clone().tag("d", ["angor:media"]).matches(&ev));
        assert!(!base.clone().tag("d", ["angor:faq"]).matches(&ev));
        assert!(!base.clone().author("p2").kind(0).tag("x", ["y"]).matches(&ev));
        let mut windowed = base.clone();
        windowed.since = Some(21);
        assert!(!windowed.matches(&ev));
        windowed.since = Some(5);
        windowed.until = Some(20);
        assert!(windowed.matches(&ev));
        assert!(!Filter::new().kind(KIND_METADATA).matches(&ev));
    }
}
