use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lighting::RecordingLink;

/// Playback properties shared by video, audio and image elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaProps {
    /// Media id, or a path relative to the project directory.
    pub src: String,
    #[serde(default)]
    pub autoplay: bool,
    #[serde(default, rename = "loop")]
    pub looping: bool,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub muted: bool,
}

fn default_volume() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextProps {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "properties", rename_all = "lowercase")]
pub enum ElementKind {
    Video(MediaProps),
    Audio(MediaProps),
    Image(MediaProps),
    Text(TextProps),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub z_index: i32,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(flatten)]
    pub kind: ElementKind,
}

fn default_visible() -> bool {
    true
}

impl Element {
    pub fn media(&self) -> Option<&MediaProps> {
        match &self.kind {
            ElementKind::Video(props) | ElementKind::Audio(props) | ElementKind::Image(props) => {
                Some(props)
            }
            ElementKind::Text(_) => None,
        }
    }

    /// Video and audio elements own a playback session while on screen.
    pub fn is_timed(&self) -> bool {
        matches!(self.kind, ElementKind::Video(_) | ElementKind::Audio(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ElementKind::Video(_) => "video",
            ElementKind::Audio(_) => "audio",
            ElementKind::Image(_) => "image",
            ElementKind::Text(_) => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub elements: Vec<Element>,
    /// `None` (or zero) plays forever.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default, rename = "loop")]
    pub looping: bool,
    #[serde(default)]
    pub linked_lighting_sequence_id: Option<String>,
    /// Seconds into the scene at which the linked sequence starts.
    #[serde(default)]
    pub linked_lighting_sequence_start_time: f64,
    #[serde(default)]
    pub recording: Option<RecordingLink>,
}

impl Scene {
    pub fn duration(&self) -> Option<Duration> {
        self.duration_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Elements in paint order.
    pub fn elements_by_z(&self) -> Vec<&Element> {
        let mut elements: Vec<&Element> = self.elements.iter().collect();
        elements.sort_by_key(|element| element.z_index);
        elements
    }
}
