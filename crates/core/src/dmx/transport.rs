use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use serde::Serialize;

use crate::dmx::sink::DmxSink;
use crate::dmx::universe::{DmxFrame, DMX_CHANNELS};
use crate::error::FaultClass;
use crate::{Result, ShowSyncError};

/// Frames queued ahead of the transport thread.
pub const QUEUE_DEPTH: usize = 4;
const BLACKOUT_ATTEMPTS: usize = 3;

enum Command {
    Frame(DmxFrame),
    Blackout {
        universes: Vec<u16>,
        ack: Sender<Result<()>>,
    },
    Shutdown,
}

/// Counters updated by the transport thread.
#[derive(Debug, Default)]
pub struct TransportStats {
    pub packets_sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub blackouts: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStatsSnapshot {
    pub packets_sent: u64,
    pub send_failures: u64,
    pub frames_dropped: u64,
    pub blackouts: u64,
}

impl TransportStats {
    pub fn snapshot(&self) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            blackouts: self.blackouts.load(Ordering::Relaxed),
        }
    }
}

/// Handle to the DMX transport thread. Frames are handed over without
/// blocking; the thread owns the sink.
#[derive(Debug)]
pub struct DmxTransport {
    commands: Sender<Command>,
    thread_handle: Option<JoinHandle<()>>,
    stats: Arc<TransportStats>,
    sink_name: String,
}

impl DmxTransport {
    /// Starts the transport thread. A frame that failed to send is retried
    /// every `retry_interval` until a newer frame replaces it.
    pub fn spawn(sink: Box<dyn DmxSink>, retry_interval: Duration) -> Result<Self> {
        let (commands, rx) = bounded(QUEUE_DEPTH);
        let stats = Arc::new(TransportStats::default());
        let sink_name = sink.name().to_string();

        let stats_for_thread = Arc::clone(&stats);
        let thread_handle = thread::Builder::new()
            .name("dmx-transport".to_string())
            .spawn(move || {
                let mut worker = Worker {
                    sink,
                    stats: stats_for_thread,
                    known: BTreeSet::new(),
                    pending: None,
                };
                worker.run(rx, retry_interval);
            })
            .map_err(|err| ShowSyncError::fatal(format!("cannot spawn DMX transport: {err}")))?;

        tracing::info!(sink = %sink_name, "DMX transport started");
        Ok(Self {
            commands,
            thread_handle: Some(thread_handle),
            stats,
            sink_name,
        })
    }

    pub fn sink_name(&self) -> &str {
        &self.sink_name
    }

    pub fn stats(&self) -> TransportStatsSnapshot {
        self.stats.snapshot()
    }

    /// Queues a frame. When the queue is full the frame is dropped; the next
    /// tick supersedes it.
    pub fn submit(&self, frame: DmxFrame) -> Result<()> {
        match self.commands.try_send(Command::Frame(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                Err(ShowSyncError::transient("DMX queue full, frame dropped"))
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(ShowSyncError::fatal("DMX transport has stopped"))
            }
        }
    }

    /// Zeroes `universes` plus every universe sent so far and waits until the
    /// transport thread confirms, at most `timeout`. Fails when any universe
    /// could not be zeroed.
    pub fn blackout(&self, universes: &[u16], timeout: Duration) -> Result<()> {
        let (ack, acked) = bounded(1);
        let command = Command::Blackout {
            universes: universes.to_vec(),
            ack,
        };
        match self.commands.send_timeout(command, timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                return Err(ShowSyncError::transient("DMX blackout could not be queued"))
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                return Err(ShowSyncError::fatal("DMX transport has stopped"))
            }
        }
        acked.recv_timeout(timeout).map_err(|_| {
            ShowSyncError::transient(format!(
                "DMX blackout not acknowledged within {} ms",
                timeout.as_millis()
            ))
        })?
    }

    /// Stops the thread after it drains queued commands.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.commands.send(Command::Shutdown);
            if handle.join().is_err() {
                tracing::error!("DMX transport thread panicked");
            } else {
                tracing::info!(sink = %self.sink_name, "DMX transport stopped");
            }
        }
    }
}

impl Drop for DmxTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    sink: Box<dyn DmxSink>,
    stats: Arc<TransportStats>,
    known: BTreeSet<u16>,
    pending: Option<DmxFrame>,
}

impl Worker {
    fn run(&mut self, rx: crossbeam_channel::Receiver<Command>, retry_interval: Duration) {
        loop {
            let command = if self.pending.is_some() {
                match rx.recv_timeout(retry_interval) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => {
                        if let Some(frame) = self.pending.take() {
                            self.send_frame(frame);
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                match rx.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                }
            };

            match command {
                Command::Frame(frame) => {
                    self.pending = None;
                    self.send_frame(frame);
                }
                Command::Blackout { universes, ack } => {
                    self.pending = None;
                    let _ = ack.send(self.blackout(universes));
                }
                Command::Shutdown => break,
            }
        }
    }

    /// Sends every universe of `frame`; on a transient failure the frame is
    /// kept for a retry. Universes the sink rejects outright are not retried.
    fn send_frame(&mut self, frame: DmxFrame) {
        let mut failed = false;
        for (id, universe) in frame.iter() {
            self.known.insert(id);
            match self.sink.send(id, universe.channels()) {
                Ok(()) => {
                    self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) if err.class() == FaultClass::Configuration => {
                    self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                    self.known.remove(&id);
                    tracing::warn!(universe = id, error = %err, "DMX universe rejected by sink");
                }
                Err(err) => {
                    self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(universe = id, error = %err, "DMX send failed, will retry");
                    failed = true;
                }
            }
        }
        if failed {
            self.pending = Some(frame);
        }
    }

    fn blackout(&mut self, universes: Vec<u16>) -> Result<()> {
        self.known.extend(universes);
        let zeros = [0u8; DMX_CHANNELS];
        let mut undelivered = Vec::new();
        let mut rejected = Vec::new();
        for id in &self.known {
            let mut delivered = false;
            for attempt in 0..BLACKOUT_ATTEMPTS {
                match self.sink.send(*id, &zeros) {
                    Ok(()) => {
                        delivered = true;
                        break;
                    }
                    // Never accepted by the sink, so never lit.
                    Err(err) if err.class() == FaultClass::Configuration => {
                        rejected.push(*id);
                        delivered = true;
                        break;
                    }
                    Err(err) => {
                        self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(universe = id, attempt, error = %err, "blackout send failed");
                    }
                }
            }
            if !delivered {
                undelivered.push(*id);
            } else if !rejected.contains(id) {
                self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
            }
        }
        for id in rejected {
            self.known.remove(&id);
        }
        if !undelivered.is_empty() {
            tracing::error!(?undelivered, "blackout could not be delivered");
            return Err(ShowSyncError::transient(format!(
                "blackout not delivered to universes {undelivered:?}"
            )));
        }
        self.stats.blackouts.fetch_add(1, Ordering::Relaxed);
        tracing::info!(universes = self.known.len(), "DMX blackout sent");
        Ok(())
    }
}
