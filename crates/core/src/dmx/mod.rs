//! DMX lighting output.

pub mod artnet;
mod merge;
mod recorder;
mod sequencer;
mod sink;
mod transport;
mod universe;
pub mod usb;

pub use merge::{merge_universe, RecordingPlayback};
pub use recorder::ArtNetRecorder;
pub use sequencer::{DmxSequencer, FixtureValues};
pub use sink::{open_sink, ArtNetSink, CaptureSink, DmxSink, SacnSink, SentFrame, UsbSink};
pub use transport::{DmxTransport, TransportStats, TransportStatsSnapshot, QUEUE_DEPTH};
pub use universe::{DmxFrame, DmxUniverse, DMX_CHANNELS};
