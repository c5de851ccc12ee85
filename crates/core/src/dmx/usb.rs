//! Framing for USB-DMX interfaces.

use crate::config::UsbDriver;
use crate::dmx::universe::DMX_CHANNELS;

pub const ENTTEC_START: u8 = 0x7e;
pub const ENTTEC_END: u8 = 0xe7;
/// "Output Only Send DMX Packet" label.
pub const ENTTEC_LABEL_SEND_DMX: u8 = 6;

/// ENTTEC DMX USB Pro message, also spoken by DMXKing interfaces.
pub fn enttec_pro(data: &[u8]) -> Vec<u8> {
    let data = &data[..data.len().min(DMX_CHANNELS)];
    let [lsb, msb] = (data.len() as u16 + 1).to_le_bytes();

    let mut frame = Vec::with_capacity(data.len() + 6);
    frame.extend_from_slice(&[ENTTEC_START, ENTTEC_LABEL_SEND_DMX, lsb, msb, 0x00]);
    frame.extend_from_slice(data);
    frame.push(ENTTEC_END);
    frame
}

/// Open DMX USB: start code and raw slots. The break is generated by the
/// line driver.
pub fn enttec_open(data: &[u8]) -> Vec<u8> {
    let data = &data[..data.len().min(DMX_CHANNELS)];
    let mut frame = Vec::with_capacity(data.len() + 1);
    frame.push(0x00);
    frame.extend_from_slice(data);
    frame
}

pub fn encode(driver: UsbDriver, data: &[u8]) -> Vec<u8> {
    match driver {
        UsbDriver::EnttecPro | UsbDriver::Dmxking => enttec_pro(data),
        UsbDriver::EnttecOpen => enttec_open(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pro_frame_wraps_start_code_and_data() {
        assert_eq!(
            enttec_pro(&[10, 20]),
            [0x7e, 6, 3, 0, 0x00, 10, 20, 0xe7]
        );
        let full = enttec_pro(&[1; 512]);
        assert_eq!(&full[2..4], &[0x01, 0x02]);
        assert_eq!(full.len(), 518);
        assert_eq!(full.last(), Some(&0xe7));
    }

    #[test]
    fn open_frame_is_start_code_then_slots() {
        assert_eq!(enttec_open(&[5, 6]), [0, 5, 6]);
        assert_eq!(encode(UsbDriver::Dmxking, &[]), [0x7e, 6, 1, 0, 0, 0xe7]);
    }
}
