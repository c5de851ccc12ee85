//! Core library for the showsync media-installation player.

pub mod assets;
pub mod config;
pub mod dmx;
pub mod error;
pub mod geometry;
pub mod lighting;
pub mod mapping;
pub mod orchestrator;
pub mod output;
pub mod player;
pub mod project;
pub mod scene;
pub mod timeline;

pub use assets::{MediaLibrary, ResolvedMedia};
pub use config::{AppConfig, DmxConfig, DmxMode, PlaybackConfig, UsbDriver};
pub use dmx::{open_sink, CaptureSink, DmxFrame, DmxSequencer, DmxSink, DmxTransport};
pub use error::{FaultClass, Result, ShowSyncError};
pub use geometry::{CompiledMapping, GeometryEngine, Homography, WarpTransform};
pub use lighting::{DmxRecording, Easing, LightingSequence, RecordingMode};
pub use mapping::{Point2, Resolution, VideoMappingConfig};
pub use orchestrator::{Orchestrator, StatusSnapshot};
pub use output::{HeadlessProvider, OutputProvider, VideoOutput};
pub use player::ShowPlayer;
pub use project::Project;
pub use scene::{Element, Scene};
pub use timeline::{Clock, ManualClock, MonotonicClock, PlaybackState, TimelineMaster};
