//! Scene orchestration.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::assets::{MediaLibrary, ResolvedMedia};
use crate::dmx::{DmxFrame, DmxSequencer, DmxTransport, RecordingPlayback, TransportStatsSnapshot};
use crate::error::FaultClass;
use crate::geometry::{CompiledMapping, GeometryEngine};
use crate::lighting::RecordingMode;
use crate::mapping::VideoMappingConfig;
use crate::output::{OutputProvider, VideoOutput};
use crate::project::Project;
use crate::scene::{Element, Scene};
use crate::timeline::{Clock, PlayOutcome, PlaybackState, TickOutcome, TimelineMaster};
use crate::{Result, ShowSyncError};

pub const DEFAULT_BLACKOUT_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_DRIFT_TOLERANCE: Duration = Duration::from_millis(250);

/// One consistent view of the playback state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: PlaybackState,
    pub scene_id: Option<String>,
    pub elapsed_ms: u64,
    pub duration_ms: Option<u64>,
    pub loop_count: u32,
    pub last_error: Option<String>,
}

struct Session {
    element_id: String,
    looping: bool,
    volume: f32,
    media_duration_ms: Option<u64>,
    output: Box<dyn VideoOutput>,
}

impl Session {
    /// Decoder position matching scene time `elapsed_ms`.
    fn position_for(&self, elapsed_ms: u64) -> u64 {
        match self.media_duration_ms {
            Some(duration) if duration > 0 && self.looping => elapsed_ms % duration,
            Some(duration) => elapsed_ms.min(duration),
            None => elapsed_ms,
        }
    }

    /// Distance between the decoder and `expected`, wrapping around the
    /// media length for looping sessions. `None` when the decoder cannot say.
    fn drift_from(&self, expected: u64) -> Option<u64> {
        let actual = self.output.position_ms()?;
        match self.media_duration_ms {
            Some(duration) if duration > 0 && self.looping => {
                let gap = (actual % duration).abs_diff(expected);
                Some(gap.min(duration - gap))
            }
            _ => Some(actual.abs_diff(expected)),
        }
    }
}

struct ActiveScene {
    scene: Scene,
    media: Vec<(Element, ResolvedMedia)>,
    sequencer: Option<Arc<DmxSequencer>>,
    recording: Option<RecordingPlayback>,
    sessions: Vec<Session>,
}

pub struct Orchestrator {
    project: Arc<Project>,
    library: MediaLibrary,
    timeline: TimelineMaster,
    geometry: GeometryEngine,
    transport: DmxTransport,
    outputs: Box<dyn OutputProvider>,
    default_universe: u16,
    blackout_timeout: Duration,
    drift_tolerance: Duration,
    active: Option<ActiveScene>,
    last_error: Option<String>,
    /// A blackout failed and is retried while stopped.
    blackout_owed: bool,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("project", &self.project.id)
            .field("timeline", &self.timeline)
            .field("scene", &self.scene_id())
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        project: Arc<Project>,
        transport: DmxTransport,
        outputs: Box<dyn OutputProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            library: MediaLibrary::new(&project),
            project,
            timeline: TimelineMaster::new(clock),
            geometry: GeometryEngine::new(),
            transport,
            outputs,
            default_universe: 0,
            blackout_timeout: DEFAULT_BLACKOUT_TIMEOUT,
            drift_tolerance: DEFAULT_DRIFT_TOLERANCE,
            active: None,
            last_error: None,
            blackout_owed: false,
        }
    }

    pub fn with_library(mut self, library: MediaLibrary) -> Self {
        self.library = library;
        self
    }

    /// Universe for fixtures that do not name one.
    pub fn with_default_universe(mut self, universe: u16) -> Self {
        self.default_universe = universe;
        self
    }

    pub fn with_blackout_timeout(mut self, timeout: Duration) -> Self {
        self.blackout_timeout = timeout;
        self
    }

    pub fn with_drift_tolerance(mut self, tolerance: Duration) -> Self {
        self.drift_tolerance = tolerance;
        self
    }

    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    pub fn scene_id(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.scene.id.as_str())
    }

    pub fn state(&self) -> PlaybackState {
        self.timeline.state()
    }

    pub fn mapping(&self) -> Arc<CompiledMapping> {
        self.geometry.current()
    }

    pub fn transport_stats(&self) -> TransportStatsSnapshot {
        self.transport.stats()
    }

    pub fn status(&self) -> StatusSnapshot {
        let timeline = self.timeline.snapshot();
        StatusSnapshot {
            state: timeline.state,
            scene_id: self.scene_id().map(str::to_string),
            elapsed_ms: timeline.elapsed_ms,
            duration_ms: timeline.duration_ms,
            loop_count: timeline.loop_count,
            last_error: self.last_error.clone(),
        }
    }

    /// Prepares `scene_id` without starting it. A running scene is stopped
    /// first.
    pub fn load_scene(&mut self, scene_id: &str) -> Result<()> {
        let scene = self
            .project
            .scene(scene_id)
            .cloned()
            .ok_or_else(|| ShowSyncError::not_found(format!("scene `{scene_id}`")))?;
        if let Err(err) = self.stop() {
            tracing::warn!(error = %err, "previous scene did not stop cleanly");
        }

        let mut media = Vec::new();
        for element in scene.elements.iter().filter(|element| element.media().is_some()) {
            match self.library.resolve(element) {
                Ok(resolved) => media.push((element.clone(), resolved)),
                Err(err) => self.record_fault(&err),
            }
        }

        let mapping = self.project.scene_mapping(&scene.id).cloned();
        if let Err(err) = self.geometry.stage(mapping.as_ref()) {
            self.record_fault(&err);
            // Never show this scene through another scene's warp.
            self.geometry.reset();
        }
        if let Some(fault) = self.geometry.current().faults().last() {
            self.last_error = Some(fault.to_string());
        }

        let sequencer = self.resolve_sequencer(&scene);
        let recording = self.resolve_recording(&scene);

        self.timeline.load(scene.duration(), scene.looping);
        tracing::info!(
            scene = %scene.id,
            media = media.len(),
            sequence = sequencer.as_ref().map(|s| s.sequence_id()),
            recording = recording.as_ref().map(|r| r.recording_id()),
            "scene loaded"
        );

        self.active = Some(ActiveScene {
            scene,
            media,
            sequencer,
            recording,
            sessions: Vec::new(),
        });
        Ok(())
    }

    fn resolve_sequencer(&mut self, scene: &Scene) -> Option<Arc<DmxSequencer>> {
        let id = scene.linked_lighting_sequence_id.as_deref()?;
        let Some(sequence) = self.project.lighting_sequence(id) else {
            self.record_fault(&ShowSyncError::not_found(format!(
                "lighting sequence `{id}` linked from scene `{}`",
                scene.id
            )));
            return None;
        };
        let sequencer = DmxSequencer::new(sequence, scene.linked_lighting_sequence_start_time);
        if let Some(fault) = sequencer.faults().last() {
            self.last_error = Some(fault.to_string());
        }
        Some(Arc::new(sequencer))
    }

    fn resolve_recording(&mut self, scene: &Scene) -> Option<RecordingPlayback> {
        let link = scene
            .recording
            .as_ref()
            .filter(|link| link.enabled && link.mode != RecordingMode::ProjectOnly)?;
        match self.project.recording(&link.recording_id) {
            Some(recording) => {
                let mut recording = recording.clone();
                recording.sort_frames();
                Some(RecordingPlayback::new(Arc::new(recording), link))
            }
            None => {
                self.record_fault(&ShowSyncError::not_found(format!(
                    "DMX recording `{}` linked from scene `{}`",
                    link.recording_id, scene.id
                )));
                None
            }
        }
    }

    /// Starts or resumes playback. With a scene id that differs from the
    /// loaded scene, that scene is loaded first; without any, the project's
    /// start scene is used.
    pub fn play(&mut self, scene_id: Option<&str>) -> Result<PlayOutcome> {
        let current = self.scene_id().map(str::to_string);
        match (scene_id, current.as_deref()) {
            (Some(requested), Some(current)) if requested == current => {}
            (Some(requested), _) => self.load_scene(requested)?,
            (None, Some(_)) => {}
            (None, None) => {
                let start = self
                    .project
                    .start_scene()
                    .map(|scene| scene.id.clone())
                    .ok_or_else(|| ShowSyncError::not_found("project has no scenes"))?;
                self.load_scene(&start)?;
            }
        }

        match self.timeline.state() {
            PlaybackState::Playing => Ok(PlayOutcome::AlreadyPlaying),
            PlaybackState::Paused => {
                self.resume()?;
                Ok(PlayOutcome::Resumed)
            }
            PlaybackState::Stopped => {
                if let Err(err) = self.acquire_sessions() {
                    self.record_fault(&err);
                    self.release_sessions();
                    return Err(err);
                }
                let outcome = self.timeline.play();
                let elapsed = self.timeline.elapsed_ms();
                let mapping = self.geometry.current();
                self.for_each_session(|session| {
                    session.output.apply_mapping(Arc::clone(&mapping))?;
                    session.output.set_volume(session.volume)?;
                    if elapsed > 0 {
                        let position = session.position_for(elapsed);
                        session.output.seek(position)?;
                    }
                    session.output.play(session.looping)
                });
                tracing::info!(scene = ?self.scene_id(), elapsed_ms = elapsed, "playback started");
                Ok(outcome)
            }
        }
    }

    fn acquire_sessions(&mut self) -> Result<()> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        let mut sessions = Vec::new();
        for (element, resolved) in &active.media {
            let Some(props) = element.media() else {
                continue;
            };
            if !element.is_timed() || !props.autoplay {
                continue;
            }
            match self.outputs.acquire(element, resolved) {
                Ok(output) => sessions.push(Session {
                    element_id: element.id.clone(),
                    looping: props.looping,
                    volume: if props.muted { 0.0 } else { props.volume },
                    media_duration_ms: resolved.duration_ms,
                    output,
                }),
                Err(err) if err.class() == FaultClass::Fatal => {
                    active.sessions = sessions;
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(element = %element.id, error = %err, "element skipped");
                    self.last_error = Some(err.to_string());
                }
            }
        }
        active.sessions = sessions;
        Ok(())
    }

    fn release_sessions(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        for mut session in active.sessions.drain(..) {
            if let Err(err) = session.output.stop() {
                tracing::warn!(element = %session.element_id, error = %err, "session release failed");
            }
        }
    }

    /// Runs `command` on every session; failures are logged per session.
    fn for_each_session<F>(&mut self, mut command: F)
    where
        F: FnMut(&mut Session) -> Result<()>,
    {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let mut failed = None;
        for session in &mut active.sessions {
            if let Err(err) = command(session) {
                tracing::warn!(element = %session.element_id, error = %err, "session command failed");
                failed = Some(err);
            }
        }
        if let Some(err) = failed {
            self.last_error = Some(err.to_string());
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        self.timeline.pause()?;
        self.for_each_session(|session| session.output.pause());
        tracing::info!(elapsed_ms = self.timeline.elapsed_ms(), "playback paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.timeline.resume()?;
        let elapsed = self.timeline.elapsed_ms();
        self.for_each_session(|session| {
            let position = session.position_for(elapsed);
            session.output.seek(position)?;
            session.output.resume()
        });
        tracing::info!(elapsed_ms = elapsed, "playback resumed");
        Ok(())
    }

    /// Stops playback. The blackout is sent and acknowledged once per actual
    /// transition, before sessions are released. Returns whether playback
    /// was running.
    pub fn stop(&mut self) -> Result<bool> {
        if !self.timeline.stop() {
            return Ok(false);
        }
        let blackout = self.blackout();
        self.release_sessions();
        tracing::info!(scene = ?self.scene_id(), "playback stopped");
        blackout.map(|_| true)
    }

    pub fn seek(&mut self, position_ms: u64) -> Result<u64> {
        if self.active.is_none() {
            return Err(ShowSyncError::InvalidStateTransition {
                action: "seek",
                state: "idle",
            });
        }
        let position = self.timeline.seek_ms(position_ms);
        self.for_each_session(|session| {
            let target = session.position_for(position);
            session.output.seek(target)
        });
        tracing::debug!(position_ms = position, "seeked");
        Ok(position)
    }

    /// Compiles and applies a live mapping edit. On error the active mapping
    /// stays in place.
    pub fn stage_mapping(&mut self, config: Option<&VideoMappingConfig>) -> Result<()> {
        let mapping = match self.geometry.stage(config) {
            Ok(mapping) => mapping,
            Err(err) => {
                self.record_fault(&err);
                return Err(err);
            }
        };
        if let Some(fault) = mapping.faults().last() {
            self.last_error = Some(fault.to_string());
        }
        self.for_each_session(|session| session.output.apply_mapping(Arc::clone(&mapping)));
        Ok(())
    }

    /// DMX output of the active scene at `elapsed_ms`.
    pub fn render_frame(&self, elapsed_ms: u64) -> DmxFrame {
        let mut frame = DmxFrame::new();
        if let Some(active) = &self.active {
            if let Some(sequencer) = &active.sequencer {
                sequencer.render(elapsed_ms, self.default_universe, &mut frame);
            }
            if let Some(recording) = &active.recording {
                recording.merge_into(elapsed_ms, &mut frame);
            }
        }
        frame
    }

    /// One step of the real-time loop.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        match self.timeline.state() {
            PlaybackState::Stopped => {
                if self.blackout_owed {
                    self.blackout()?;
                }
                return Ok(TickOutcome::Idle);
            }
            PlaybackState::Paused => {
                // Receivers time out without a steady stream.
                let frozen = self.timeline.elapsed_ms();
                self.send_frame(frozen)?;
                return Ok(TickOutcome::Idle);
            }
            PlaybackState::Playing => {}
        }

        let outcome = self.timeline.tick();
        match outcome {
            TickOutcome::Running | TickOutcome::Idle => {
                let elapsed = self.timeline.elapsed_ms();
                self.reconcile_sessions(elapsed);
                self.send_frame(elapsed)?;
            }
            TickOutcome::Looped { loop_count } => {
                let elapsed = self.timeline.elapsed_ms();
                tracing::debug!(loop_count, elapsed_ms = elapsed, "scene looped");
                self.for_each_session(|session| {
                    let position = session.position_for(elapsed);
                    session.output.seek(position)
                });
                self.send_frame(elapsed)?;
            }
            TickOutcome::Ended => {
                tracing::info!(scene = ?self.scene_id(), "scene ended");
                let blackout = self.blackout();
                self.release_sessions();
                blackout?;
            }
        }
        Ok(outcome)
    }

    /// Seeks sessions whose decoder wandered off the master clock.
    fn reconcile_sessions(&mut self, elapsed_ms: u64) {
        let tolerance = u64::try_from(self.drift_tolerance.as_millis()).unwrap_or(u64::MAX);
        if tolerance == 0 {
            return;
        }
        self.for_each_session(|session| {
            let expected = session.position_for(elapsed_ms);
            match session.drift_from(expected) {
                Some(drift) if drift > tolerance => {
                    tracing::debug!(
                        element = %session.element_id,
                        drift_ms = drift,
                        position_ms = expected,
                        "correcting session drift"
                    );
                    session.output.seek(expected)
                }
                _ => Ok(()),
            }
        });
    }

    fn send_frame(&mut self, elapsed_ms: u64) -> Result<()> {
        let frame = self.render_frame(elapsed_ms);
        if frame.is_empty() {
            return Ok(());
        }
        match self.transport.submit(frame) {
            Ok(()) => Ok(()),
            Err(err) if err.class() == FaultClass::Transient => {
                tracing::debug!(error = %err, "DMX frame skipped");
                self.last_error = Some(err.to_string());
                Ok(())
            }
            Err(err) => {
                self.record_fault(&err);
                Err(err)
            }
        }
    }

    fn blackout(&mut self) -> Result<()> {
        let mut universes = vec![self.default_universe];
        if let Some(universe) = self
            .active
            .as_ref()
            .and_then(|active| active.scene.recording.as_ref())
            .and_then(|link| self.project.recording(&link.recording_id))
            .map(|recording| recording.universe)
        {
            universes.push(universe);
        }
        let result = self.transport.blackout(&universes, self.blackout_timeout);
        self.blackout_owed = result.is_err();
        if let Err(err) = &result {
            self.record_fault(err);
        }
        result
    }

    /// Stops playback (with blackout) and halts the transport thread.
    pub fn shutdown(&mut self) -> Result<()> {
        let stopped = self.stop();
        self.transport.shutdown();
        stopped.map(|_| ())
    }

    fn record_fault(&mut self, err: &ShowSyncError) {
        match err.class() {
            FaultClass::Configuration => tracing::warn!(error = %err, "configuration fault"),
            FaultClass::Transient => tracing::warn!(error = %err, "transient fault"),
            FaultClass::Rejected => tracing::debug!(error = %err, "command rejected"),
            FaultClass::Fatal => tracing::error!(error = %err, "fatal fault"),
        }
        self.last_error = Some(err.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmx::{CaptureSink, SentFrame};
    use crate::lighting::{
        DmxRecording, Easing, Fixture, Keyframe, LightingSequence, RecordedFrame, RecordingLink,
    };
    use crate::mapping::{PerspectivePoints, Point2};
    use crate::output::{HeadlessProvider, OutputEvent};
    use crate::project::{Media, MediaKind};
    use crate::scene::{ElementKind, MediaProps};
    use crate::timeline::ManualClock;
    use std::path::PathBuf;
    use std::time::Instant;

    const UNIVERSE: u16 = 1;

    struct Harness {
        orchestrator: Orchestrator,
        clock: ManualClock,
        capture: CaptureSink,
        outputs: HeadlessProvider,
    }

    impl Harness {
        fn new(project: Project) -> Self {
            Self::with_provider(project, HeadlessProvider::new())
        }

        fn with_provider(project: Project, outputs: HeadlessProvider) -> Self {
            let project = Arc::new(project);
            let clock = ManualClock::new();
            let capture = CaptureSink::new();
            let transport =
                DmxTransport::spawn(Box::new(capture.clone()), Duration::from_millis(5)).unwrap();
            let orchestrator = Orchestrator::new(
                Arc::clone(&project),
                transport,
                Box::new(outputs.clone()),
                Arc::new(clock.clone()),
            )
            .with_library(MediaLibrary::new(&project).without_file_checks())
            .with_default_universe(UNIVERSE)
            .with_blackout_timeout(Duration::from_secs(2));
            Self {
                orchestrator,
                clock,
                capture,
                outputs,
            }
        }

        fn wait_for_frames(&self, count: usize) -> Vec<SentFrame> {
            let deadline = Instant::now() + Duration::from_secs(2);
            loop {
                let frames = self.capture.frames().unwrap();
                if frames.len() >= count {
                    return frames;
                }
                assert!(Instant::now() < deadline, "only {} frames sent", frames.len());
                std::thread::sleep(Duration::from_millis(2));
            }
        }
    }

    fn video(id: &str, src: &str, looping: bool) -> Element {
        Element {
            id: id.into(),
            name: String::new(),
            z_index: 0,
            visible: true,
            kind: ElementKind::Video(MediaProps {
                src: src.into(),
                autoplay: true,
                looping,
                volume: 0.8,
                muted: false,
            }),
        }
    }

    fn sequence() -> LightingSequence {
        LightingSequence {
            id: "seq".into(),
            name: String::new(),
            duration: 5.0,
            looping: true,
            speed: 1.0,
            interpolation: Easing::Linear,
            fixtures: vec![Fixture {
                id: "par".into(),
                name: String::new(),
                universe: None,
                start_channel: 1,
                channel_count: 6,
            }],
            keyframes: vec![
                Keyframe {
                    time: 0.0,
                    fixture_id: "par".into(),
                    values: vec![255, 0, 0, 0, 0, 0],
                },
                Keyframe {
                    time: 5.0,
                    fixture_id: "par".into(),
                    values: vec![0, 0, 255, 0, 0, 0],
                },
            ],
        }
    }

    fn project(duration_ms: Option<u64>, looping: bool) -> Project {
        Project {
            id: "show".into(),
            scenes: vec![Scene {
                id: "main".into(),
                name: String::new(),
                elements: vec![video("clip", "m-1", true)],
                duration_ms,
                looping,
                linked_lighting_sequence_id: Some("seq".into()),
                linked_lighting_sequence_start_time: 0.0,
                recording: None,
            }],
            media: vec![Media {
                id: "m-1".into(),
                name: String::new(),
                kind: MediaKind::Video,
                path: PathBuf::from("clip.mp4"),
                duration: Some(4.0),
                dimensions: None,
            }],
            lighting_sequences: vec![sequence()],
            ..Project::default()
        }
    }

    #[test]
    fn ticks_push_interpolated_lighting() {
        let mut h = Harness::new(project(None, false));
        assert_eq!(h.orchestrator.play(None).unwrap(), PlayOutcome::Started);

        h.clock.advance_ms(2_500);
        assert_eq!(h.orchestrator.tick().unwrap(), TickOutcome::Running);

        let frames = h.wait_for_frames(1);
        assert_eq!(frames[0].universe, UNIVERSE);
        assert_eq!(&frames[0].data[..6], &[128, 0, 128, 0, 0, 0]);

        let status = h.orchestrator.status();
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.scene_id.as_deref(), Some("main"));
        assert_eq!(status.elapsed_ms, 2_500);
    }

    #[test]
    fn undelivered_blackout_is_reported() {
        let mut h = Harness::new(project(None, false));
        h.orchestrator.play(Some("main")).unwrap();
        h.clock.advance_ms(2_500);
        h.orchestrator.tick().unwrap();
        h.wait_for_frames(1);
        h.capture.fail_next(3).unwrap();

        let err = h.orchestrator.stop().unwrap_err();
        assert_eq!(err.class(), FaultClass::Transient);
        let status = h.orchestrator.status();
        assert_eq!(status.state, PlaybackState::Stopped);
        assert!(status.last_error.unwrap().contains("blackout"));
        assert_eq!(h.orchestrator.transport_stats().blackouts, 0);

        // The next idle tick delivers it.
        assert_eq!(h.orchestrator.tick().unwrap(), TickOutcome::Idle);
        let last = h.capture.last_frame(UNIVERSE).unwrap().unwrap();
        assert!(last.data.iter().all(|value| *value == 0));
        assert_eq!(h.orchestrator.transport_stats().blackouts, 1);
    }

    #[test]
    fn stopping_twice_sends_one_blackout() {
        let mut h = Harness::new(project(None, false));
        h.orchestrator.play(Some("main")).unwrap();
        h.clock.advance_ms(100);
        h.orchestrator.tick().unwrap();

        assert!(h.orchestrator.stop().unwrap());
        let first = h.orchestrator.status();
        assert!(!h.orchestrator.stop().unwrap());
        assert_eq!(h.orchestrator.status(), first);
        assert_eq!(first.elapsed_ms, 0);
        assert_eq!(h.orchestrator.transport_stats().blackouts, 1);

        let last = h.capture.last_frame(UNIVERSE).unwrap().unwrap();
        assert!(last.data.iter().all(|value| *value == 0));
        assert_eq!(
            h.outputs.events_for("clip").unwrap().last(),
            Some(&OutputEvent::Stop)
        );

        // Stopped ticks send nothing.
        let sent = h.capture.frames().unwrap().len();
        assert_eq!(h.orchestrator.tick().unwrap(), TickOutcome::Idle);
        assert_eq!(h.capture.frames().unwrap().len(), sent);
    }

    #[test]
    fn scene_end_blacks_out_and_releases_sessions() {
        let mut h = Harness::new(project(Some(1_000), false));
        h.orchestrator.play(None).unwrap();
        h.clock.advance_ms(1_000);

        assert_eq!(h.orchestrator.tick().unwrap(), TickOutcome::Ended);
        assert_eq!(h.orchestrator.state(), PlaybackState::Stopped);
        assert_eq!(h.orchestrator.transport_stats().blackouts, 1);
        assert!(h
            .outputs
            .events_for("clip")
            .unwrap()
            .contains(&OutputEvent::Stop));
    }

    #[test]
    fn loop_realigns_sessions_to_wrapped_position() {
        let mut h = Harness::new(project(Some(10_000), true));
        h.orchestrator.play(None).unwrap();
        h.clock.advance_ms(10_500);

        assert_eq!(
            h.orchestrator.tick().unwrap(),
            TickOutcome::Looped { loop_count: 1 }
        );
        assert!(h
            .outputs
            .events_for("clip")
            .unwrap()
            .contains(&OutputEvent::Seek { position_ms: 500 }));
    }

    #[test]
    fn drifting_sessions_are_pulled_back_to_the_clock() {
        let mut h = Harness::new(project(None, false));
        h.orchestrator.play(None).unwrap();
        let seeks = |h: &Harness| {
            h.outputs
                .events_for("clip")
                .unwrap()
                .into_iter()
                .filter(|event| matches!(event, OutputEvent::Seek { .. }))
                .count()
        };

        // The headless decoder runs on wall time, the master clock stays put.
        h.clock.advance_ms(100);
        h.orchestrator.tick().unwrap();
        assert_eq!(seeks(&h), 0);

        h.clock.advance_ms(2_900);
        h.orchestrator.tick().unwrap();
        assert!(h
            .outputs
            .events_for("clip")
            .unwrap()
            .contains(&OutputEvent::Seek { position_ms: 3_000 }));
        h.orchestrator.tick().unwrap();
        assert_eq!(seeks(&h), 1);

        // The clip loops every 4 s, so scene time 4_100 is clip time 100.
        h.clock.advance_ms(1_100);
        h.orchestrator.tick().unwrap();
        assert!(h
            .outputs
            .events_for("clip")
            .unwrap()
            .contains(&OutputEvent::Seek { position_ms: 100 }));
    }

    #[test]
    fn zero_drift_tolerance_leaves_sessions_alone() {
        let mut h = Harness::new(project(None, false));
        h.orchestrator = h.orchestrator.with_drift_tolerance(Duration::ZERO);
        h.orchestrator.play(None).unwrap();
        h.clock.advance_ms(3_000);
        h.orchestrator.tick().unwrap();
        assert!(!h
            .outputs
            .events_for("clip")
            .unwrap()
            .iter()
            .any(|event| matches!(event, OutputEvent::Seek { .. })));
    }

    #[test]
    fn session_positions_follow_media_length() {
        let mut h = Harness::new(project(None, false));
        h.orchestrator.play(None).unwrap();
        // The clip is 4 s long and loops on its own.
        assert_eq!(h.orchestrator.seek(9_000).unwrap(), 9_000);
        assert!(h
            .outputs
            .events_for("clip")
            .unwrap()
            .contains(&OutputEvent::Seek { position_ms: 1_000 }));
    }

    #[test]
    fn paused_ticks_resend_the_frozen_frame() {
        let mut h = Harness::new(project(None, false));
        h.orchestrator.play(None).unwrap();
        h.clock.advance_ms(2_500);
        h.orchestrator.tick().unwrap();
        h.orchestrator.pause().unwrap();

        h.clock.advance_ms(1_000);
        assert_eq!(h.orchestrator.tick().unwrap(), TickOutcome::Idle);
        let frames = h.wait_for_frames(2);
        assert_eq!(frames[0], frames[1]);
        assert_eq!(h.orchestrator.status().elapsed_ms, 2_500);

        assert_eq!(h.orchestrator.play(None).unwrap(), PlayOutcome::Resumed);
        assert_eq!(h.orchestrator.play(None).unwrap(), PlayOutcome::AlreadyPlaying);
    }

    #[test]
    fn invalid_commands_are_rejected() {
        let mut h = Harness::new(project(None, false));
        let err = h.orchestrator.pause().unwrap_err();
        assert_eq!(err.class(), FaultClass::Rejected);
        assert!(h.orchestrator.seek(100).is_err());
        assert!(matches!(
            h.orchestrator.play(Some("nope")),
            Err(ShowSyncError::NotFound(_))
        ));
    }

    #[test]
    fn missing_media_is_skipped_per_element() {
        let mut project = project(None, false);
        project.scenes[0].elements.push(video("ghost", "unknown-id", false));
        let mut h = Harness::new(project);

        h.orchestrator.play(None).unwrap();
        let status = h.orchestrator.status();
        assert_eq!(status.state, PlaybackState::Playing);
        assert!(status.last_error.unwrap().contains("unknown-id"));
        assert!(h.outputs.events_for("ghost").unwrap().is_empty());
        assert!(!h.outputs.events_for("clip").unwrap().is_empty());
    }

    #[test]
    fn unavailable_outputs_keep_the_scene_stopped() {
        let mut h = Harness::with_provider(project(None, false), HeadlessProvider::unavailable());
        let err = h.orchestrator.play(None).unwrap_err();
        assert!(matches!(err, ShowSyncError::FatalResource(_)));
        assert_eq!(h.orchestrator.state(), PlaybackState::Stopped);
        assert!(h.orchestrator.status().last_error.is_some());
    }

    #[test]
    fn staged_mapping_reaches_sessions_and_bad_edits_keep_the_old_one() {
        let mut h = Harness::new(project(None, false));
        h.orchestrator.play(None).unwrap();

        let skewed = VideoMappingConfig::perspective(PerspectivePoints {
            top_left: Point2::new(0.1, 0.0),
            ..PerspectivePoints::default()
        });
        h.orchestrator.stage_mapping(Some(&skewed)).unwrap();
        assert!(h
            .outputs
            .events_for("clip")
            .unwrap()
            .contains(&OutputEvent::Mapping {
                transform: "perspective"
            }));

        let collapsed = VideoMappingConfig::perspective(PerspectivePoints {
            top_left: Point2::new(0.5, 0.5),
            top_right: Point2::new(0.5, 0.5),
            bottom_left: Point2::new(0.5, 0.5),
            bottom_right: Point2::new(0.5, 0.5),
        });
        assert!(h.orchestrator.stage_mapping(Some(&collapsed)).is_err());
        assert_eq!(h.orchestrator.mapping().transform().kind_name(), "perspective");
    }

    #[test]
    fn recording_priority_overrides_sequence_channels() {
        let mut project = project(None, false);
        project.dmx_recordings.push(DmxRecording {
            id: "take".into(),
            name: String::new(),
            universe: UNIVERSE,
            trim_start_ms: 0,
            trim_end_ms: 0,
            frames: vec![RecordedFrame {
                timestamp_ms: 0,
                channels: vec![0, 77],
            }],
        });
        project.scenes[0].recording = Some(RecordingLink {
            recording_id: "take".into(),
            mode: RecordingMode::RecordingPriority,
            enabled: true,
            offset_ms: 0,
            looping: false,
        });
        let mut h = Harness::new(project);
        h.orchestrator.load_scene("main").unwrap();

        let frame = h.orchestrator.render_frame(2_500);
        let universe = frame.universe(UNIVERSE).unwrap();
        assert_eq!(&universe.channels()[..3], &[128, 77, 128]);
    }
}
