use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex, MutexGuard};

use sacn::source::SacnSource;

use crate::config::{DmxConfig, DmxMode, UsbDriver};
use crate::dmx::universe::DMX_CHANNELS;
use crate::dmx::{artnet, usb};
use crate::{Result, ShowSyncError};

/// Destination for encoded DMX universes. Called from the transport thread
/// only.
pub trait DmxSink: Send {
    fn name(&self) -> &str;

    fn send(&mut self, universe: u16, data: &[u8]) -> Result<()>;
}

fn send_error(sink: &str, err: std::io::Error) -> ShowSyncError {
    ShowSyncError::transient(format!("{sink} send failed: {err}"))
}

fn bind_udp(config: &DmxConfig) -> Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .map_err(|err| ShowSyncError::fatal(format!("cannot bind DMX socket: {err}")))?;
    socket
        .set_write_timeout(Some(config.send_timeout()))
        .map_err(|err| ShowSyncError::fatal(format!("cannot configure DMX socket: {err}")))?;
    Ok(socket)
}

fn parse_ip(config: &DmxConfig) -> Result<IpAddr> {
    config
        .ip
        .parse()
        .map_err(|_| ShowSyncError::config(format!("invalid DMX target address `{}`", config.ip)))
}

/// Art-Net sender, broadcast or unicast.
#[derive(Debug)]
pub struct ArtNetSink {
    socket: UdpSocket,
    target: SocketAddr,
    sequence: u8,
}

impl ArtNetSink {
    pub fn open(config: &DmxConfig) -> Result<Self> {
        let target = SocketAddr::new(parse_ip(config)?, config.port);
        let socket = bind_udp(config)?;
        if config.is_broadcast() {
            socket.set_broadcast(true).map_err(|err| {
                ShowSyncError::fatal(format!("cannot enable broadcast on DMX socket: {err}"))
            })?;
        }
        tracing::info!(%target, "Art-Net output ready");
        Ok(Self {
            socket,
            target,
            sequence: 0,
        })
    }
}

impl DmxSink for ArtNetSink {
    fn name(&self) -> &str {
        "artnet"
    }

    fn send(&mut self, universe: u16, data: &[u8]) -> Result<()> {
        // Zero disables sequencing on the receiver, so wrap to 1.
        self.sequence = self.sequence.checked_add(1).unwrap_or(1);
        let packet = artnet::encode_dmx(universe, self.sequence, data);
        self.socket
            .send_to(&packet, self.target)
            .map_err(|err| send_error("Art-Net", err))?;
        Ok(())
    }
}

const SACN_PORT: u16 = 5568;
const SACN_MAX_UNIVERSE: u16 = 63_999;
const START_CODE: u8 = 0x00;

/// sACN (E1.31) sender to the universe multicast group or a unicast receiver.
pub struct SacnSink {
    source: SacnSource,
    destination: Option<SocketAddr>,
    priority: u8,
    registered: BTreeSet<u16>,
    payload: Vec<u8>,
}

impl std::fmt::Debug for SacnSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SacnSink")
            .field("destination", &self.destination)
            .field("priority", &self.priority)
            .field("registered", &self.registered)
            .finish()
    }
}

impl SacnSink {
    pub fn open(config: &DmxConfig) -> Result<Self> {
        let destination = if config.sacn_multicast {
            None
        } else {
            Some(SocketAddr::new(parse_ip(config)?, SACN_PORT))
        };
        let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        let source = SacnSource::with_ip(&config.source_name, local)
            .map_err(|err| ShowSyncError::fatal(format!("cannot open sACN source: {err}")))?;
        tracing::info!(
            multicast = config.sacn_multicast,
            priority = config.sacn_priority,
            "sACN output ready"
        );
        Ok(Self {
            source,
            destination,
            priority: config.sacn_priority,
            registered: BTreeSet::new(),
            payload: Vec::with_capacity(DMX_CHANNELS + 1),
        })
    }

    fn register(&mut self, universe: u16) -> Result<()> {
        if !(1..=SACN_MAX_UNIVERSE).contains(&universe) {
            return Err(ShowSyncError::config(format!(
                "sACN universe {universe} outside 1..={SACN_MAX_UNIVERSE}"
            )));
        }
        if self.registered.contains(&universe) {
            return Ok(());
        }
        self.source.register_universe(universe).map_err(|err| {
            ShowSyncError::config(format!("cannot register sACN universe {universe}: {err}"))
        })?;
        self.registered.insert(universe);
        tracing::debug!(universe, "sACN universe registered");
        Ok(())
    }
}

impl DmxSink for SacnSink {
    fn name(&self) -> &str {
        "sacn"
    }

    fn send(&mut self, universe: u16, data: &[u8]) -> Result<()> {
        self.register(universe)?;
        self.payload.clear();
        self.payload.push(START_CODE);
        self.payload
            .extend_from_slice(&data[..data.len().min(DMX_CHANNELS)]);
        self.source
            .send(
                &[universe],
                &self.payload,
                Some(self.priority),
                self.destination,
                None,
            )
            .map_err(|err| ShowSyncError::transient(format!("sACN send failed: {err}")))
    }
}

impl Drop for SacnSink {
    fn drop(&mut self) {
        for universe in std::mem::take(&mut self.registered) {
            if let Err(err) = self.source.terminate_stream(universe, START_CODE) {
                tracing::warn!(universe, error = %err, "sACN stream not terminated");
            }
        }
    }
}

/// USB-DMX interface driving one universe.
pub struct UsbSink {
    port: Box<dyn Write + Send>,
    driver: UsbDriver,
    universe: u16,
}

impl UsbSink {
    /// Opens the serial device for writing. Line settings (250 kbaud, 8N2)
    /// are expected to be applied by the device driver.
    pub fn open(config: &DmxConfig) -> Result<Self> {
        let port = OpenOptions::new()
            .write(true)
            .open(&config.usb_port)
            .map_err(|err| {
                ShowSyncError::fatal(format!("cannot open USB-DMX port {}: {err}", config.usb_port))
            })?;
        tracing::info!(
            port = %config.usb_port,
            driver = ?config.usb_driver,
            baud = config.usb_baudrate,
            "USB-DMX output ready"
        );
        Ok(Self::with_writer(
            Box::new(port),
            config.usb_driver,
            config.universe,
        ))
    }

    pub fn with_writer(port: Box<dyn Write + Send>, driver: UsbDriver, universe: u16) -> Self {
        Self {
            port,
            driver,
            universe,
        }
    }
}

impl std::fmt::Debug for UsbSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbSink")
            .field("driver", &self.driver)
            .field("universe", &self.universe)
            .finish()
    }
}

impl DmxSink for UsbSink {
    fn name(&self) -> &str {
        "usb"
    }

    fn send(&mut self, universe: u16, data: &[u8]) -> Result<()> {
        if universe != self.universe {
            tracing::trace!(universe, "USB-DMX carries a single universe, skipping");
            return Ok(());
        }
        let frame = usb::encode(self.driver, data);
        self.port
            .write_all(&frame)
            .and_then(|_| self.port.flush())
            .map_err(|err| send_error("USB-DMX", err))
    }
}

/// One packet handed to a [`CaptureSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub universe: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct CaptureLog {
    frames: Vec<SentFrame>,
    failures_left: usize,
}

/// In-memory sink for dry runs and tests. Clones share one log.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    log: Arc<Mutex<CaptureLog>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` sends fail with a transient fault.
    pub fn fail_next(&self, count: usize) -> Result<()> {
        self.lock()?.failures_left = count;
        Ok(())
    }

    pub fn frames(&self) -> Result<Vec<SentFrame>> {
        Ok(self.lock()?.frames.clone())
    }

    pub fn last_frame(&self, universe: u16) -> Result<Option<SentFrame>> {
        Ok(self
            .lock()?
            .frames
            .iter()
            .rev()
            .find(|frame| frame.universe == universe)
            .cloned())
    }

    fn lock(&self) -> Result<MutexGuard<'_, CaptureLog>> {
        self.log
            .lock()
            .map_err(|_| ShowSyncError::msg("capture log has been poisoned"))
    }
}

impl DmxSink for CaptureSink {
    fn name(&self) -> &str {
        "capture"
    }

    fn send(&mut self, universe: u16, data: &[u8]) -> Result<()> {
        let mut log = self.lock()?;
        if log.failures_left > 0 {
            log.failures_left -= 1;
            return Err(ShowSyncError::transient("capture sink refused the frame"));
        }
        log.frames.push(SentFrame {
            universe,
            data: data.to_vec(),
        });
        Ok(())
    }
}

/// Opens the sink selected by `config.mode`. Any failure to acquire the
/// device is fatal.
pub fn open_sink(config: &DmxConfig) -> Result<Box<dyn DmxSink>> {
    let sink: Box<dyn DmxSink> = match config.mode {
        DmxMode::Artnet => Box::new(ArtNetSink::open(config)?),
        DmxMode::Sacn => Box::new(SacnSink::open(config)?),
        DmxMode::Usb => Box::new(UsbSink::open(config)?),
    };
    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn capture_sink_records_and_fails_on_demand() {
        let capture = CaptureSink::new();
        let mut sink = capture.clone();
        capture.fail_next(1).unwrap();

        assert!(matches!(
            sink.send(1, &[1]),
            Err(ShowSyncError::TransientIo(_))
        ));
        sink.send(1, &[2]).unwrap();
        sink.send(2, &[3]).unwrap();

        assert_eq!(capture.frames().unwrap().len(), 2);
        assert_eq!(capture.last_frame(1).unwrap().unwrap().data, [2]);
    }

    #[test]
    fn usb_sink_frames_only_its_universe() {
        let buffer = SharedBuffer::default();
        let mut sink = UsbSink::with_writer(Box::new(buffer.clone()), UsbDriver::EnttecPro, 1);

        sink.send(1, &[7, 8]).unwrap();
        sink.send(2, &[9]).unwrap();

        assert_eq!(*buffer.0.lock().unwrap(), [0x7e, 6, 3, 0, 0, 7, 8, 0xe7]);
    }

    #[test]
    fn artnet_sink_unicasts_to_a_local_receiver() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(std::time::Duration::from_secs(1)))
            .unwrap();
        let config = DmxConfig {
            ip: "127.0.0.1".into(),
            port: receiver.local_addr().unwrap().port(),
            ..DmxConfig::default()
        };

        let mut sink = ArtNetSink::open(&config).unwrap();
        sink.send(3, &[10, 20]).unwrap();

        let mut buf = [0u8; 600];
        let len = receiver.recv(&mut buf).unwrap();
        let packet = artnet::decode_dmx(&buf[..len]).unwrap();
        assert_eq!(packet.universe, 3);
        assert_eq!(packet.sequence, 1);
        assert_eq!(packet.data, [10, 20]);
    }

    #[test]
    fn sacn_sink_rejects_universes_outside_the_e131_range() {
        let config = DmxConfig {
            mode: DmxMode::Sacn,
            ip: "127.0.0.1".into(),
            sacn_multicast: false,
            universe: 1,
            ..DmxConfig::default()
        };
        let mut sink = SacnSink::open(&config).unwrap();
        for universe in [0, 64_000] {
            let err = sink.send(universe, &[255]).unwrap_err();
            assert_eq!(err.class(), crate::FaultClass::Configuration, "universe {universe}");
        }
        assert!(sink.registered.is_empty());
    }

    #[test]
    fn sacn_sink_needs_a_valid_unicast_target() {
        let config = DmxConfig {
            mode: DmxMode::Sacn,
            ip: "not-an-address".into(),
            sacn_multicast: false,
            universe: 1,
            ..DmxConfig::default()
        };
        let err = SacnSink::open(&config).unwrap_err();
        assert!(matches!(err, ShowSyncError::Configuration(_)));
    }

    #[test]
    fn missing_usb_device_is_fatal() {
        let config = DmxConfig {
            mode: DmxMode::Usb,
            usb_port: "/nonexistent/showsync-dmx".into(),
            ..DmxConfig::default()
        };
        let err = open_sink(&config).err().unwrap();
        assert!(matches!(err, ShowSyncError::FatalResource(_)));
    }
}
