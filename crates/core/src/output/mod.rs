//! Playback sessions for video and audio elements. Decoding lives outside
//! the core.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::assets::ResolvedMedia;
use crate::geometry::CompiledMapping;
use crate::scene::Element;
use crate::{Result, ShowSyncError};

/// Handle over one decoder session.
pub trait VideoOutput: Send {
    fn element_id(&self) -> &str;

    fn play(&mut self, looping: bool) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    fn resume(&mut self) -> Result<()>;

    /// Stops and releases the session.
    fn stop(&mut self) -> Result<()>;

    fn seek(&mut self, position_ms: u64) -> Result<()>;

    /// Current decoder position, `None` when unknown.
    fn position_ms(&self) -> Option<u64>;

    fn set_volume(&mut self, volume: f32) -> Result<()>;

    /// Warp used by the rendering path from now on.
    fn apply_mapping(&mut self, mapping: Arc<CompiledMapping>) -> Result<()>;
}

/// Source of playback sessions.
pub trait OutputProvider: Send {
    /// Opens a session for `element`. An error classed as fatal means no
    /// session can be provided at all.
    fn acquire(&mut self, element: &Element, media: &ResolvedMedia)
        -> Result<Box<dyn VideoOutput>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    Acquired { path: String },
    Play { looping: bool },
    Pause,
    Resume,
    Stop,
    Seek { position_ms: u64 },
    Volume { volume: f32 },
    Mapping { transform: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    pub element_id: String,
    pub event: OutputEvent,
}

type EventLog = Arc<Mutex<Vec<LoggedEvent>>>;

fn lock_log(log: &EventLog) -> Result<MutexGuard<'_, Vec<LoggedEvent>>> {
    log.lock()
        .map_err(|_| ShowSyncError::msg("output event log has been poisoned"))
}

/// Session that renders nothing and logs every command. Its position
/// advances on wall time while playing.
#[derive(Debug)]
pub struct HeadlessOutput {
    element_id: String,
    position_ms: u64,
    running_since: Option<Instant>,
    log: EventLog,
}

impl HeadlessOutput {
    fn current_position(&self) -> u64 {
        let running = self
            .running_since
            .map(|since| u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        self.position_ms.saturating_add(running)
    }

    fn record(&self, event: OutputEvent) -> Result<()> {
        lock_log(&self.log)?.push(LoggedEvent {
            element_id: self.element_id.clone(),
            event,
        });
        Ok(())
    }
}

impl VideoOutput for HeadlessOutput {
    fn element_id(&self) -> &str {
        &self.element_id
    }

    fn play(&mut self, looping: bool) -> Result<()> {
        self.running_since = Some(Instant::now());
        self.record(OutputEvent::Play { looping })
    }

    fn pause(&mut self) -> Result<()> {
        self.position_ms = self.current_position();
        self.running_since = None;
        self.record(OutputEvent::Pause)
    }

    fn resume(&mut self) -> Result<()> {
        self.running_since = Some(Instant::now());
        self.record(OutputEvent::Resume)
    }

    fn stop(&mut self) -> Result<()> {
        self.position_ms = 0;
        self.running_since = None;
        self.record(OutputEvent::Stop)
    }

    fn seek(&mut self, position_ms: u64) -> Result<()> {
        self.position_ms = position_ms;
        if self.running_since.is_some() {
            self.running_since = Some(Instant::now());
        }
        self.record(OutputEvent::Seek { position_ms })
    }

    fn position_ms(&self) -> Option<u64> {
        Some(self.current_position())
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.record(OutputEvent::Volume { volume })
    }

    fn apply_mapping(&mut self, mapping: Arc<CompiledMapping>) -> Result<()> {
        self.record(OutputEvent::Mapping {
            transform: mapping.transform().kind_name(),
        })
    }
}

/// Provider of [`HeadlessOutput`] sessions. Clones share one event log.
#[derive(Debug, Clone, Default)]
pub struct HeadlessProvider {
    log: EventLog,
    unavailable: bool,
}

impl HeadlessProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose every acquire fails as a fatal resource fault.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Result<Vec<LoggedEvent>> {
        Ok(lock_log(&self.log)?.clone())
    }

    pub fn events_for(&self, element_id: &str) -> Result<Vec<OutputEvent>> {
        Ok(lock_log(&self.log)?
            .iter()
            .filter(|logged| logged.element_id == element_id)
            .map(|logged| logged.event.clone())
            .collect())
    }
}

impl OutputProvider for HeadlessProvider {
    fn acquire(
        &mut self,
        element: &Element,
        media: &ResolvedMedia,
    ) -> Result<Box<dyn VideoOutput>> {
        if self.unavailable {
            return Err(ShowSyncError::fatal("no video output available"));
        }
        let output = HeadlessOutput {
            element_id: element.id.clone(),
            position_ms: 0,
            running_since: None,
            log: Arc::clone(&self.log),
        };
        output.record(OutputEvent::Acquired {
            path: media.path.display().to_string(),
        })?;
        tracing::debug!(element = %element.id, path = %media.path.display(), "headless session opened");
        Ok(Box::new(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{ElementKind, MediaProps};
    use std::path::PathBuf;

    fn element() -> Element {
        Element {
            id: "v".into(),
            name: String::new(),
            z_index: 0,
            visible: true,
            kind: ElementKind::Video(MediaProps {
                src: "m".into(),
                autoplay: true,
                looping: false,
                volume: 1.0,
                muted: false,
            }),
        }
    }

    fn media() -> ResolvedMedia {
        ResolvedMedia {
            element_id: "v".into(),
            media_id: Some("m".into()),
            path: PathBuf::from("/media/clip.mp4"),
            duration_ms: None,
        }
    }

    #[test]
    fn headless_sessions_log_commands() {
        let mut provider = HeadlessProvider::new();
        let mut session = provider.acquire(&element(), &media()).unwrap();
        session.play(true).unwrap();
        session.seek(1_200).unwrap();
        assert!((1_200..1_700).contains(&session.position_ms().unwrap()));
        session
            .apply_mapping(Arc::new(CompiledMapping::identity()))
            .unwrap();
        session.stop().unwrap();

        assert_eq!(
            provider.events_for("v").unwrap(),
            [
                OutputEvent::Acquired {
                    path: "/media/clip.mp4".into()
                },
                OutputEvent::Play { looping: true },
                OutputEvent::Seek { position_ms: 1_200 },
                OutputEvent::Mapping {
                    transform: "identity"
                },
                OutputEvent::Stop,
            ]
        );
    }

    #[test]
    fn headless_position_freezes_while_paused() {
        let mut provider = HeadlessProvider::new();
        let mut session = provider.acquire(&element(), &media()).unwrap();
        assert_eq!(session.position_ms(), Some(0));

        session.play(false).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        session.pause().unwrap();
        let paused = session.position_ms().unwrap();
        assert!(paused >= 20);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(session.position_ms(), Some(paused));

        session.stop().unwrap();
        assert_eq!(session.position_ms(), Some(0));
    }

    #[test]
    fn unavailable_provider_is_fatal() {
        let mut provider = HeadlessProvider::unavailable();
        let err = provider.acquire(&element(), &media()).err().unwrap();
        assert_eq!(err.class(), crate::FaultClass::Fatal);
    }
}
