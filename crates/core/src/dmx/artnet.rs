//! Art-Net 4 `ArtDmx` packets.

use crate::dmx::universe::DMX_CHANNELS;
use crate::{Result, ShowSyncError};

pub const ARTNET_PORT: u16 = 6454;
pub const ARTNET_ID: &[u8; 8] = b"Art-Net\0";
pub const OP_DMX: u16 = 0x5000;
pub const PROTOCOL_VERSION: u16 = 14;
pub const HEADER_LEN: usize = 18;

/// A decoded `ArtDmx` packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtDmx {
    pub sequence: u8,
    pub physical: u8,
    /// 15-bit port address: `Net << 8 | SubUni`.
    pub universe: u16,
    pub data: Vec<u8>,
}

/// Encodes channel data as an `ArtDmx` packet. The payload is padded to an
/// even length of at least 2 and truncated at 512.
pub fn encode_dmx(universe: u16, sequence: u8, data: &[u8]) -> Vec<u8> {
    let data = &data[..data.len().min(DMX_CHANNELS)];
    let length = (data.len() + data.len() % 2).max(2);

    let mut packet = Vec::with_capacity(HEADER_LEN + length);
    packet.extend_from_slice(ARTNET_ID);
    packet.extend_from_slice(&OP_DMX.to_le_bytes());
    packet.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    packet.push(sequence);
    packet.push(0); // physical
    packet.push((universe & 0xff) as u8);
    packet.push(((universe >> 8) & 0x7f) as u8);
    packet.extend_from_slice(&(length as u16).to_be_bytes());
    packet.extend_from_slice(data);
    packet.resize(HEADER_LEN + length, 0);
    packet
}

pub fn decode_dmx(packet: &[u8]) -> Result<ArtDmx> {
    if packet.len() < HEADER_LEN {
        return Err(ShowSyncError::protocol(format!(
            "ArtDmx packet too short ({} bytes)",
            packet.len()
        )));
    }
    if &packet[..8] != ARTNET_ID {
        return Err(ShowSyncError::protocol("missing Art-Net id"));
    }
    let opcode = u16::from_le_bytes([packet[8], packet[9]]);
    if opcode != OP_DMX {
        return Err(ShowSyncError::protocol(format!(
            "unexpected Art-Net opcode {opcode:#06x}"
        )));
    }
    let version = u16::from_be_bytes([packet[10], packet[11]]);
    if version < PROTOCOL_VERSION {
        return Err(ShowSyncError::protocol(format!(
            "unsupported Art-Net protocol version {version}"
        )));
    }

    let length = usize::from(u16::from_be_bytes([packet[16], packet[17]]));
    if !(2..=DMX_CHANNELS).contains(&length) {
        return Err(ShowSyncError::protocol(format!(
            "ArtDmx length {length} out of range"
        )));
    }
    let data = packet
        .get(HEADER_LEN..HEADER_LEN + length)
        .ok_or_else(|| ShowSyncError::protocol("ArtDmx payload truncated"))?;

    Ok(ArtDmx {
        sequence: packet[12],
        physical: packet[13],
        universe: (u16::from(packet[15] & 0x7f) << 8) | u16::from(packet[14]),
        data: data.to_vec(),
    })
}
