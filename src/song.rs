//! Song descriptor
//!
//! A detached copy of everything the player needs to know about one song.
//! The queue layer above the player owns the canonical entries; the player
//! only ever sees these detached descriptors.

use std::time::Duration;

use uuid::Uuid;

use crate::tag::Tag;

/// A song handed to the player for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    /// Stable identity of this song (queue entry)
    pub id: Uuid,

    /// Location of the stream, e.g. a file path
    pub uri: String,

    /// Metadata known before decoding starts
    pub tag: Tag,

    /// Playback starts at this offset into the stream (e.g. a cue entry)
    pub start_time: Duration,

    /// Playback ends at this offset; `None` plays to the end of the stream
    pub end_time: Option<Duration>,
}

impl Song {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            uri: uri.into(),
            tag: Tag::new(),
            start_time: Duration::ZERO,
            end_time: None,
        }
    }

    /// Duration of the playable range, if the tag knows the total duration.
    pub fn duration(&self) -> Option<Duration> {
        match self.end_time {
            Some(end) => Some(end.saturating_sub(self.start_time)),
            None => self
                .tag
                .duration
                .map(|total| total.saturating_sub(self.start_time)),
        }
    }

    /// The suffix used for decoder plugin selection ("mp3", "flac", ...).
    pub fn suffix(&self) -> Option<&str> {
        let name = self.uri.rsplit('/').next().unwrap_or(&self.uri);
        name.rsplit_once('.').map(|(_, suffix)| suffix)
    }

    /// Replace the metadata snapshot, returning an updated copy.
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = tag;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_extraction() {
        assert_eq!(Song::new("/music/a.flac").suffix(), Some("flac"));
        assert_eq!(Song::new("track.test.mp3").suffix(), Some("mp3"));
        assert_eq!(Song::new("noext").suffix(), None);
    }

    #[test]
    fn duration_from_range() {
        let mut song = Song::new("a.mp3");
        song.start_time = Duration::from_secs(10);
        song.end_time = Some(Duration::from_secs(40));
        assert_eq!(song.duration(), Some(Duration::from_secs(30)));

        let mut song = Song::new("b.mp3");
        song.tag.duration = Some(Duration::from_secs(120));
        assert_eq!(song.duration(), Some(Duration::from_secs(120)));
    }
}
