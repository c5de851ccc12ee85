//! The show object graph handed over by the project loader.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::DmxConfig;
use crate::lighting::{DmxRecording, LightingSequence};
use crate::mapping::{Resolution, VideoMappingConfig};
use crate::scene::Scene;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub path: PathBuf,
    /// Seconds, when known.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub dimensions: Option<Resolution>,
}

/// Project-level DMX output hints. Unset fields keep the device
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArtnetConfig {
    pub ip: Option<String>,
    pub universe: Option<u16>,
    pub fps: Option<u32>,
}

impl ArtnetConfig {
    pub fn apply_to(&self, dmx: &mut DmxConfig) {
        if let Some(ip) = &self.ip {
            dmx.ip = ip.clone();
        }
        if let Some(universe) = self.universe {
            dmx.universe = universe;
        }
        if let Some(fps) = self.fps.filter(|fps| *fps > 0) {
            dmx.fps = fps;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Directory that relative media paths resolve against.
    pub base_path: Option<PathBuf>,
    pub scenes: Vec<Scene>,
    pub media: Vec<Media>,
    pub lighting_sequences: Vec<LightingSequence>,
    pub dmx_recordings: Vec<DmxRecording>,
    /// Display-wide mapping.
    pub video_mapping: Option<VideoMappingConfig>,
    /// Scene-specific mappings, matched by `scene_id`.
    pub video_mappings: Vec<VideoMappingConfig>,
    pub artnet_config: ArtnetConfig,
    pub start_scene_id: Option<String>,
}

impl Project {
    pub fn scene(&self, id: &str) -> Option<&Scene> {
        self.scenes.iter().find(|scene| scene.id == id)
    }

    /// The configured start scene, or the first scene.
    pub fn start_scene(&self) -> Option<&Scene> {
        self.start_scene_id
            .as_deref()
            .and_then(|id| self.scene(id))
            .or_else(|| self.scenes.first())
    }

    pub fn media(&self, id: &str) -> Option<&Media> {
        self.media.iter().find(|media| media.id == id)
    }

    pub fn lighting_sequence(&self, id: &str) -> Option<&LightingSequence> {
        self.lighting_sequences.iter().find(|seq| seq.id == id)
    }

    pub fn recording(&self, id: &str) -> Option<&DmxRecording> {
        self.dmx_recordings.iter().find(|rec| rec.id == id)
    }

    /// An enabled scene-specific mapping wins over the enabled global one.
    pub fn scene_mapping(&self, scene_id: &str) -> Option<&VideoMappingConfig> {
        self.video_mappings
            .iter()
            .find(|mapping| mapping.enabled && mapping.scene_id.as_deref() == Some(scene_id))
            .or_else(|| self.video_mapping.as_ref().filter(|mapping| mapping.enabled))
    }
}
