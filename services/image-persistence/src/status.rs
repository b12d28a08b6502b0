//! Status record decoding and payload classification.
//!
//! Producers publish either a JSON status object (Twitter v1.1 shape) or a
//! bare image on the same topic, with no type tag. A payload is classified by
//! attempting to decode it as a status; anything that does not decode is the
//! image itself.

use serde::Deserialize;
use tracing::trace;

/// Declared kind of a media attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    #[serde(rename = "animated_gif")]
    AnimatedImage,
    #[serde(other)]
    Other,
}

/// Remote media attached to a status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    /// Empty when the attachment carried no URL
    pub url: String,
    pub kind: MediaKind,
}

/// Decoded status: who posted it and what media it references, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    /// Posting account's handle
    pub attribution: String,
    pub media: Vec<MediaReference>,
}

/// Result of sniffing a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Status(StatusRecord),
    /// The payload did not decode as a status and is treated as image bytes
    RawImage,
}

#[derive(Deserialize)]
struct WireStatus {
    user: WireUser,
    #[serde(default)]
    entities: Option<WireEntities>,
    #[serde(default)]
    extended_entities: Option<WireEntities>,
}

#[derive(Deserialize)]
struct WireUser {
    screen_name: String,
}

#[derive(Deserialize)]
struct WireEntities {
    #[serde(default)]
    media: Vec<WireMedia>,
}

#[derive(Deserialize)]
struct WireMedia {
    #[serde(default)]
    media_url_https: Option<String>,
    #[serde(default)]
    media_url: Option<String>,
    #[serde(rename = "type")]
    kind: MediaKind,
}

impl WireStatus {
    fn into_record(self) -> Option<StatusRecord> {
        let attribution = self.user.screen_name.trim().to_string();
        if attribution.is_empty() {
            return None;
        }

        // extended_entities carries the real type of video and GIF attachments
        let entities = self.extended_entities.or(self.entities);
        let media = entities
            .map(|e| e.media)
            .unwrap_or_default()
            .into_iter()
            .map(|m| MediaReference {
                // Entries stay positional; a missing URL surfaces at fetch time
                url: m.media_url_https.or(m.media_url).unwrap_or_default(),
                kind: m.kind,
            })
            .collect();

        Some(StatusRecord { attribution, media })
    }
}

impl StatusRecord {
    /// Decode a status record, returning `None` for anything that is not a
    /// well-formed status
    pub fn decode(payload: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<WireStatus>(payload) {
            Ok(wire) => wire.into_record(),
            Err(e) => {
                trace!(error = %e, "Payload is not a status record");
                None
            }
        }
    }
}

/// Classify a payload as a status record or as raw image bytes
pub fn classify(payload: &[u8]) -> Classified {
    match StatusRecord::decode(payload) {
        Some(record) => Classified::Status(record),
        None => Classified::RawImage,
    }
}
