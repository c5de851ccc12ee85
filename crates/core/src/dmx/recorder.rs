//! Capture of `ArtDmx` traffic into a [`DmxRecording`].

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::time::{Duration, Instant};

use crate::dmx::artnet;
use crate::dmx::universe::DMX_CHANNELS;
use crate::lighting::{DmxRecording, RecordedFrame};
use crate::{Result, ShowSyncError};

const READ_TIMEOUT: Duration = Duration::from_millis(200);
const DATAGRAM_CAPACITY: usize = artnet::HEADER_LEN + DMX_CHANNELS;

#[derive(Debug)]
pub struct ArtNetRecorder {
    universe: u16,
    frames: Vec<RecordedFrame>,
    received: u64,
    ignored: u64,
}

impl ArtNetRecorder {
    pub fn new(universe: u16) -> Self {
        Self {
            universe,
            frames: Vec::new(),
            received: 0,
            ignored: 0,
        }
    }

    /// Feeds one datagram that arrived `at_ms` into the take. Returns whether
    /// it was kept; packets for other universes are counted and dropped.
    pub fn ingest(&mut self, packet: &[u8], at_ms: u64) -> Result<bool> {
        let dmx = artnet::decode_dmx(packet)?;
        self.received += 1;
        if dmx.universe != self.universe {
            self.ignored += 1;
            return Ok(false);
        }
        let mut channels = dmx.data;
        channels.resize(DMX_CHANNELS, 0);
        self.frames.push(RecordedFrame {
            timestamp_ms: at_ms,
            channels,
        });
        Ok(true)
    }

    /// Reads from `socket` until `duration` has passed. Datagrams that are
    /// not `ArtDmx` are skipped.
    pub fn listen(&mut self, socket: &UdpSocket, duration: Duration) -> Result<()> {
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let started = Instant::now();
        let mut buf = [0u8; DATAGRAM_CAPACITY];
        tracing::info!(universe = self.universe, "recording Art-Net");

        while started.elapsed() < duration {
            let (len, from) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(err) => {
                    return Err(ShowSyncError::transient(format!(
                        "Art-Net receive failed: {err}"
                    )))
                }
            };
            let at_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            if let Err(err) = self.ingest(&buf[..len], at_ms) {
                tracing::trace!(%from, error = %err, "datagram skipped");
            }
        }

        tracing::info!(
            frames = self.frames.len(),
            received = self.received,
            other_universes = self.ignored,
            "recording finished"
        );
        Ok(())
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn finish(self, id: impl Into<String>, name: impl Into<String>) -> DmxRecording {
        let mut recording = DmxRecording {
            id: id.into(),
            name: name.into(),
            universe: self.universe,
            trim_start_ms: 0,
            trim_end_ms: 0,
            frames: self.frames,
        };
        recording.sort_frames();
        recording
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmx::artnet::encode_dmx;
    use crate::FaultClass;

    #[test]
    fn keeps_only_the_recorded_universe() {
        let mut recorder = ArtNetRecorder::new(3);
        assert!(recorder.ingest(&encode_dmx(3, 1, &[10, 20]), 40).unwrap());
        assert!(!recorder.ingest(&encode_dmx(4, 2, &[99, 99]), 50).unwrap());
        assert!(recorder.ingest(&encode_dmx(3, 3, &[30]), 0).unwrap());

        let err = recorder.ingest(b"not art-net at all", 60).unwrap_err();
        assert_eq!(err.class(), FaultClass::Transient);
        assert_eq!(recorder.frame_count(), 2);

        let recording = recorder.finish("take", "Console take");
        assert_eq!(recording.universe, 3);
        let stamps: Vec<u64> = recording.frames.iter().map(|f| f.timestamp_ms).collect();
        assert_eq!(stamps, [0, 40]);
        assert_eq!(recording.frames[1].channels.len(), DMX_CHANNELS);
        assert_eq!(&recording.frames[1].channels[..3], &[10, 20, 0]);
        assert_eq!(recording.frame_at(45), Some(&recording.frames[1].channels[..]));
    }

    #[test]
    fn listens_on_a_udp_socket() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = socket.local_addr().unwrap();
        let console = UdpSocket::bind("127.0.0.1:0").unwrap();
        console.send_to(&encode_dmx(0, 1, &[255, 128]), target).unwrap();
        console.send_to(b"junk", target).unwrap();
        console.send_to(&encode_dmx(0, 2, &[0, 64]), target).unwrap();

        let mut recorder = ArtNetRecorder::new(0);
        recorder
            .listen(&socket, Duration::from_millis(300))
            .unwrap();
        assert_eq!(recorder.frame_count(), 2);
        let recording = recorder.finish("udp", "");
        assert_eq!(&recording.frames[0].channels[..2], &[255, 128]);
    }
}
