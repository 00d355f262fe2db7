//! Song metadata snapshots
//!
//! A `Tag` is an immutable snapshot of the metadata known for a stream at one
//! point in time. Decoder plugins attach snapshots to chunks when the
//! underlying stream delivers new metadata (e.g. a radio stream announcing the
//! next title); the player materializes them into the "tagged song" slot for
//! the client to drain.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Known tag item kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagType {
    Artist,
    Album,
    AlbumArtist,
    Title,
    Track,
    Genre,
    Date,
    Comment,
    MixRampStart,
    MixRampEnd,
}

/// Metadata snapshot: a list of typed items plus the stream duration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    items: Vec<(TagType, String)>,

    /// Duration of the stream, if known
    pub duration: Option<Duration>,
}

impl Tag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: TagType, value: impl Into<String>) {
        self.items.push((kind, value.into()));
    }

    /// First value of the given kind, if present.
    pub fn get(&self, kind: TagType) -> Option<&str> {
        self.items
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| v.as_str())
    }

    pub fn has(&self, kind: TagType) -> bool {
        self.get(kind).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.duration.is_none()
    }

    pub fn items(&self) -> impl Iterator<Item = (TagType, &str)> {
        self.items.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Merge `other` over `self`: items of a kind present in `other` replace
    /// all items of that kind in `self`; everything else is kept.
    pub fn merge(&self, other: &Tag) -> Tag {
        let mut merged = Tag {
            items: Vec::with_capacity(self.items.len() + other.items.len()),
            duration: other.duration.or(self.duration),
        };
        for (kind, value) in &self.items {
            if !other.has(*kind) {
                merged.items.push((*kind, value.clone()));
            }
        }
        merged.items.extend(other.items.iter().cloned());
        merged
    }
}

/// MixRamp loudness markers parsed from a song's tags.
///
/// Each marker string is a list of `"<dB> <seconds>"` pairs separated by
/// semicolons, describing how the loudness ramps at the head (`start`) and the
/// tail (`end`) of the song. The cross-fade planner aligns two songs by these
/// markers instead of a fixed overlap time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MixRampInfo {
    start: Option<String>,
    end: Option<String>,
}

impl MixRampInfo {
    pub fn is_defined(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    pub fn start(&self) -> Option<&str> {
        self.start.as_deref()
    }

    pub fn end(&self) -> Option<&str> {
        self.end.as_deref()
    }

    pub fn set_start(&mut self, value: impl Into<String>) {
        self.start = Some(value.into());
    }

    pub fn set_end(&mut self, value: impl Into<String>) {
        self.end = Some(value.into());
    }

    pub fn clear(&mut self) {
        self.start = None;
        self.end = None;
    }

    /// Extract MixRamp markers from a tag snapshot.
    pub fn from_tag(tag: &Tag) -> Self {
        let mut info = Self::default();
        if let Some(s) = tag.get(TagType::MixRampStart) {
            info.set_start(s);
        }
        if let Some(e) = tag.get(TagType::MixRampEnd) {
            info.set_end(e);
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_get() {
        let mut tag = Tag::new();
        tag.add(TagType::Artist, "The Example");
        tag.add(TagType::Title, "Song One");
        assert_eq!(tag.get(TagType::Artist), Some("The Example"));
        assert_eq!(tag.get(TagType::Album), None);
        assert!(!tag.is_empty());
    }

    #[test]
    fn merge_replaces_by_kind() {
        let mut base = Tag::new();
        base.add(TagType::Artist, "The Example");
        base.add(TagType::Title, "Old Title");
        base.duration = Some(Duration::from_secs(60));

        let mut update = Tag::new();
        update.add(TagType::Title, "New Title");

        let merged = base.merge(&update);
        assert_eq!(merged.get(TagType::Artist), Some("The Example"));
        assert_eq!(merged.get(TagType::Title), Some("New Title"));
        assert_eq!(merged.duration, Some(Duration::from_secs(60)));
    }

    #[test]
    fn mixramp_from_tag() {
        let mut tag = Tag::new();
        tag.add(TagType::MixRampEnd, "-6.0 118.2;-3.0 119.1");
        let info = MixRampInfo::from_tag(&tag);
        assert!(info.is_defined());
        assert_eq!(info.start(), None);
        assert_eq!(info.end(), Some("-6.0 118.2;-3.0 119.1"));
    }
}
