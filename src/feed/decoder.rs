//! Binary tick frame decoder
//!
//! Frame layout (big-endian):
//! - `u16` packet count
//! - per packet: `u16` length, then `length` bytes
//!
//! Packet layout is selected by its exact length:
//! - 8 bytes (LTP): `u32` instrument token @0, `i32` last price in paise @4
//! - 44 bytes (QUOTE): LTP fields plus `u32` volume @8
//! - 184 bytes (FULL): QUOTE fields plus `u32` open interest @12

use rust_decimal::Decimal;
use tracing::{debug, trace};

use crate::domain::{Tick, TickMode};
use crate::error::{BridgeError, Result};

/// Prices on the wire are integers scaled by 100.
const PRICE_SCALE: u32 = 2;

/// Decode one binary frame into ticks.
///
/// Never fails: malformed packets are dropped and a frame that declares more
/// bytes than it carries stops at the last complete packet. Single-byte
/// heartbeat frames decode to nothing.
pub fn decode(frame: &[u8]) -> Vec<Tick> {
    if frame.len() < 2 {
        trace!("Heartbeat frame ({} bytes)", frame.len());
        return Vec::new();
    }

    let packet_count = read_u16(frame, 0) as usize;
    let mut ticks = Vec::with_capacity(packet_count);
    let mut offset = 2;

    for index in 0..packet_count {
        if offset + 2 > frame.len() {
            debug!(
                "Tick frame truncated before packet {} of {} header",
                index + 1,
                packet_count
            );
            break;
        }
        let packet_len = read_u16(frame, offset) as usize;
        offset += 2;

        let end = offset + packet_len;
        if end > frame.len() {
            debug!(
                "Tick frame truncated: packet {} declares {} bytes, {} available",
                index + 1,
                packet_len,
                frame.len() - offset
            );
            break;
        }

        match parse_packet(&frame[offset..end]) {
            Ok(tick) => ticks.push(tick),
            Err(e) => debug!("Skipping tick packet {}: {}", index + 1, e),
        }
        offset = end;
    }

    ticks
}

/// Parse a single sub-packet.
pub fn parse_packet(packet: &[u8]) -> Result<Tick> {
    let mode = TickMode::from_packet_len(packet.len()).ok_or_else(|| {
        BridgeError::Decode(format!("unsupported packet length {}", packet.len()))
    })?;

    let instrument_token = read_u32(packet, 0);
    let raw_price = i32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
    let last_price = Decimal::new(i64::from(raw_price), PRICE_SCALE);

    let (volume, open_interest) = match mode {
        TickMode::Ltp => (None, None),
        TickMode::Quote => (Some(read_u32(packet, 8)), None),
        TickMode::Full => (Some(read_u32(packet, 8)), Some(read_u32(packet, 12))),
    };

    Ok(Tick {
        instrument_token,
        mode,
        last_price,
        volume,
        open_interest,
    })
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
