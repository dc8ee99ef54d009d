//! ArtDMX framing on top of `artnet_protocol`.
//!
//! Layout of the 530-byte frame:
//!
//! | offset | size | field                     |
//! |--------|------|---------------------------|
//! | 0      | 8    | `"Art-Net\0"`             |
//! | 8      | 2    | opcode 0x5000, LE         |
//! | 10     | 2    | protocol version 14, BE   |
//! | 12     | 1    | sequence (always 0)       |
//! | 13     | 1    | physical port (always 0)  |
//! | 14     | 2    | universe, LE              |
//! | 16     | 2    | data length 512, BE       |
//! | 18     | 512  | channel levels            |

use artnet_protocol::{ArtCommand, Output, PortAddress};

use crate::error::PacketError;
use crate::universe::{DmxBuffer, DMX_CHANNELS};

pub const ARTNET_PORT: u16 = 6454;
pub const ARTNET_HEADER: &[u8; 8] = b"Art-Net\0";
pub const OP_DMX: u16 = 0x5000;
pub const HEADER_LEN: usize = 18;
pub const PACKET_LEN: usize = HEADER_LEN + DMX_CHANNELS;

const OPCODE_END: usize = 10;

/// Encode one universe of levels. Missing channels are sent as 0 and
/// anything past channel 512 is ignored.
pub fn encode(universe: u16, data: &[u8]) -> Result<Vec<u8>, PacketError> {
    let port_address =
        PortAddress::try_from(universe).map_err(|_| PacketError::InvalidUniverse(universe))?;

    let mut levels = vec![0u8; DMX_CHANNELS];
    let len = data.len().min(DMX_CHANNELS);
    levels[..len].copy_from_slice(&data[..len]);

    let command = ArtCommand::Output(Output {
        port_address,
        data: levels.into(),
        ..Output::default()
    });
    command
        .write_to_buffer()
        .map_err(|e| PacketError::Protocol(e.to_string()))
}

/// A received ArtDMX frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DmxPacket {
    pub sequence: u8,
    pub physical: u8,
    pub universe: u16,
    pub data: Vec<u8>,
}

impl DmxPacket {
    /// Levels padded out to a full universe.
    pub fn levels(&self) -> DmxBuffer {
        let mut levels = [0u8; DMX_CHANNELS];
        let len = self.data.len().min(DMX_CHANNELS);
        levels[..len].copy_from_slice(&self.data[..len]);
        levels
    }
}

/// Decode any ArtDMX frame, including ones shorter than 512 channels as
/// sent by other controllers. Other Art-Net commands are reported by
/// opcode.
pub fn decode(bytes: &[u8]) -> Result<DmxPacket, PacketError> {
    if bytes.len() < OPCODE_END {
        return Err(PacketError::TooShort(bytes.len()));
    }
    if &bytes[0..8] != ARTNET_HEADER {
        return Err(PacketError::BadHeader);
    }
    let opcode = u16::from_le_bytes([bytes[8], bytes[9]]);

    let declared = if opcode == OP_DMX {
        dmx_length(bytes)?
    } else {
        0
    };

    match ArtCommand::from_buffer(bytes).map_err(|e| PacketError::Protocol(e.to_string()))? {
        ArtCommand::Output(output) => Ok(DmxPacket {
            sequence: output.sequence,
            physical: output.physical,
            universe: u16::from_le_bytes([bytes[14], bytes[15]]),
            data: bytes[HEADER_LEN..HEADER_LEN + declared].to_vec(),
        }),
        _ => Err(PacketError::UnsupportedOpCode(opcode)),
    }
}

/// The channel count an ArtDMX frame declares, checked against what arrived.
fn dmx_length(bytes: &[u8]) -> Result<usize, PacketError> {
    if bytes.len() < HEADER_LEN {
        return Err(PacketError::TooShort(bytes.len()));
    }
    let declared = u16::from_be_bytes([bytes[16], bytes[17]]) as usize;
    let available = bytes.len() - HEADER_LEN;
    if declared > available || declared > DMX_CHANNELS {
        return Err(PacketError::BadLength {
            declared,
            available,
        });
    }
    Ok(declared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let mut channels = [0u8; DMX_CHANNELS];
        channels[0] = 255;
        channels[511] = 7;

        let packet = encode(3, &channels).unwrap();
        assert_eq!(packet.len(), 530);
        assert_eq!(&packet[0..8], b"Art-Net\0");
        assert_eq!(u16::from_le_bytes([packet[8], packet[9]]), 0x5000);
        assert_eq!(&packet[10..12], &[0, 14]);
        assert_eq!(packet[12], 0);
        assert_eq!(packet[13], 0);
        assert_eq!(u16::from_le_bytes([packet[14], packet[15]]), 3);
        assert_eq!(u16::from_be_bytes([packet[16], packet[17]]), 512);
        assert_eq!(packet[18], 255);
        assert_eq!(packet[529], 7);
    }

    #[test]
    fn test_universe_byte_order() {
        let packet = encode(0x1234, &[]).unwrap();
        assert_eq!(packet[14], 0x34);
        assert_eq!(packet[15], 0x12);
        assert!(packet[HEADER_LEN..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_universe_beyond_port_address_range() {
        assert!(encode(32767, &[]).is_ok());
        assert_eq!(encode(32768, &[]), Err(PacketError::InvalidUniverse(32768)));
    }

    #[test]
    fn test_short_and_long_input() {
        let packet = encode(0, &[1, 2, 3]).unwrap();
        assert_eq!(&packet[18..22], &[1, 2, 3, 0]);

        let long = vec![9u8; 700];
        let packet = encode(0, &long).unwrap();
        assert_eq!(packet.len(), PACKET_LEN);
        assert_eq!(packet[529], 9);
    }

    #[test]
    fn test_decode_own_frames() {
        let mut channels = [0u8; DMX_CHANNELS];
        channels[4] = 100;
        let packet = decode(&encode(3, &channels).unwrap()).unwrap();
        assert_eq!(packet.universe, 3);
        assert_eq!(packet.sequence, 0);
        assert_eq!(packet.physical, 0);
        assert_eq!(packet.data.len(), 512);
        assert_eq!(packet.levels()[4], 100);
    }

    #[test]
    fn test_decode_rejects_foreign_data() {
        assert_eq!(decode(&[0u8; 4]), Err(PacketError::TooShort(4)));

        let mut packet = encode(0, &[]).unwrap();
        packet[0] = b'X';
        assert_eq!(decode(&packet), Err(PacketError::BadHeader));

        let poll = ArtCommand::Poll(artnet_protocol::Poll::default())
            .write_to_buffer()
            .unwrap();
        assert_eq!(decode(&poll), Err(PacketError::UnsupportedOpCode(0x2000)));

        let packet = encode(0, &[]).unwrap();
        assert_eq!(decode(&packet[..12]), Err(PacketError::TooShort(12)));
        assert!(matches!(
            decode(&packet[..100]),
            Err(PacketError::BadLength { declared: 512, available: 82 })
        ));
    }

    #[test]
    fn test_decode_short_universe() {
        let mut packet = encode(1, &[10, 20]).unwrap();
        packet[16..18].copy_from_slice(&2u16.to_be_bytes());
        packet.truncate(HEADER_LEN + 2);
        let decoded = decode(&packet).unwrap();
        assert_eq!(decoded.data, vec![10, 20]);
        assert_eq!(decoded.levels()[2], 0);
    }
}
