//! Threaded front end over an [`Orchestrator`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};

use crate::error::FaultClass;
use crate::mapping::VideoMappingConfig;
use crate::orchestrator::{Orchestrator, StatusSnapshot};
use crate::timeline::PlayOutcome;
use crate::{Result, ShowSyncError};

#[derive(Debug)]
pub struct ShowPlayer {
    orchestrator: Arc<Mutex<Orchestrator>>,
    halt: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ShowPlayer {
    /// Starts the tick thread. Playback itself starts with [`Self::play`].
    pub fn start(orchestrator: Orchestrator, tick_interval: Duration) -> Result<Self> {
        let orchestrator = Arc::new(Mutex::new(orchestrator));
        let (halt, halted) = bounded::<()>(1);

        let shared = Arc::clone(&orchestrator);
        let thread_handle = thread::Builder::new()
            .name("show-tick".to_string())
            .spawn(move || {
                let ticker = tick(tick_interval);
                loop {
                    select! {
                        recv(halted) -> _ => break,
                        recv(ticker) -> _ => {
                            let result = match shared.lock() {
                                Ok(mut orchestrator) => orchestrator.tick(),
                                Err(_) => {
                                    tracing::error!("orchestrator poisoned, tick loop exiting");
                                    break;
                                }
                            };
                            if let Err(err) = result {
                                if err.class() == FaultClass::Fatal {
                                    tracing::error!(error = %err, "tick loop exiting");
                                    break;
                                }
                            }
                        }
                    }
                }
            })
            .map_err(|err| ShowSyncError::fatal(format!("cannot spawn tick thread: {err}")))?;

        tracing::info!(
            tick_ms = u64::try_from(tick_interval.as_millis()).unwrap_or(u64::MAX),
            "tick loop started"
        );
        Ok(Self {
            orchestrator,
            halt,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn play(&self, scene_id: Option<&str>) -> Result<PlayOutcome> {
        self.lock()?.play(scene_id)
    }

    pub fn pause(&self) -> Result<()> {
        self.lock()?.pause()
    }

    pub fn resume(&self) -> Result<()> {
        self.lock()?.resume()
    }

    pub fn stop(&self) -> Result<bool> {
        self.lock()?.stop()
    }

    pub fn seek(&self, position_ms: u64) -> Result<u64> {
        self.lock()?.seek(position_ms)
    }

    pub fn status(&self) -> Result<StatusSnapshot> {
        Ok(self.lock()?.status())
    }

    pub fn stage_mapping(&self, config: Option<&VideoMappingConfig>) -> Result<()> {
        self.lock()?.stage_mapping(config)
    }

    /// Runs `f` with exclusive access to the orchestrator.
    pub fn with_orchestrator<R>(&self, f: impl FnOnce(&mut Orchestrator) -> R) -> Result<R> {
        let mut guard = self.lock()?;
        Ok(f(&mut *guard))
    }

    /// Blacks out, halts the transport, then stops the tick loop.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.thread_handle.take() else {
            return Ok(());
        };
        let stopped = self.lock().and_then(|mut orchestrator| orchestrator.shutdown());
        let _ = self.halt.send(());
        if handle.join().is_err() {
            tracing::error!("tick thread panicked");
        }
        tracing::info!("show player stopped");
        stopped
    }

    fn lock(&self) -> Result<MutexGuard<'_, Orchestrator>> {
        self.orchestrator
            .lock()
            .map_err(|_| ShowSyncError::msg("orchestrator has been poisoned"))
    }
}

impl Drop for ShowPlayer {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(error = %err, "show player shutdown failed");
        }
    }
}
