use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of capture hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Microphone input
    Audio,
    /// Camera input
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Snapshot of one enumerated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDevice {
    pub id: String,
    pub kind: MediaKind,
    pub label: String,
}

impl MediaDevice {
    pub fn new(id: impl Into<String>, kind: MediaKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
        }
    }
}

/// Device selection for a stream request
///
/// `None` ids fall back to the platform default device of that kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio_device_id: Option<String>,
    /// Whether to request a camera track at all
    pub video: bool,
    pub video_device_id: Option<String>,
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self::default()
    }

    pub fn with_video(mut self) -> Self {
        self.video = true;
        self
    }
}
