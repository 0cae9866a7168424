//! Feed frame decoding through the public API.

use kite_bridge::{decode, TickMode};
use rust_decimal_macros::dec;

fn packet(token: u32, price_paise: i32, len: usize, volume: u32, oi: u32) -> Vec<u8> {
    let mut p = vec![0u8; len];
    p[0..4].copy_from_slice(&token.to_be_bytes());
    p[4..8].copy_from_slice(&price_paise.to_be_bytes());
    if len >= 44 {
        p[8..12].copy_from_slice(&volume.to_be_bytes());
    }
    if len >= 184 {
        p[12..16].copy_from_slice(&oi.to_be_bytes());
    }
    p
}

fn frame(packets: &[Vec<u8>]) -> Vec<u8> {
    let mut f = (packets.len() as u16).to_be_bytes().to_vec();
    for p in packets {
        f.extend_from_slice(&(p.len() as u16).to_be_bytes());
        f.extend_from_slice(p);
    }
    f
}

#[test]
fn mixed_mode_frame_decodes_in_order() {
    let bytes = frame(&[
        packet(408065, 145025, 8, 0, 0),
        packet(884737, 52010, 44, 1_250_000, 0),
        packet(12_345_678, 2_250_075, 184, 9_000, 415_200),
    ]);

    let ticks = decode(&bytes);
    assert_eq!(ticks.len(), 3);

    assert_eq!(ticks[0].mode, TickMode::Ltp);
    assert_eq!(ticks[0].last_price, dec!(1450.25));
    assert_eq!(ticks[0].volume, None);

    assert_eq!(ticks[1].mode, TickMode::Quote);
    assert_eq!(ticks[1].last_price, dec!(520.10));
    assert_eq!(ticks[1].volume, Some(1_250_000));

    assert_eq!(ticks[2].mode, TickMode::Full);
    assert_eq!(ticks[2].instrument_token, 12_345_678);
    assert_eq!(ticks[2].last_price, dec!(22500.75));
    assert_eq!(ticks[2].open_interest, Some(415_200));
}

#[test]
fn unknown_packet_length_only_drops_that_packet() {
    let bytes = frame(&[
        packet(1, 100, 8, 0, 0),
        vec![0u8; 32],
        packet(2, 200, 8, 0, 0),
    ]);
    let tokens: Vec<u32> = decode(&bytes).iter().map(|t| t.instrument_token).collect();
    assert_eq!(tokens, vec![1, 2]);
}

#[test]
fn heartbeat_and_truncated_frames_never_fail() {
    assert!(decode(&[]).is_empty());
    assert!(decode(&[0x00]).is_empty());

    let mut bytes = frame(&[packet(1, 100, 8, 0, 0), packet(2, 200, 44, 7, 0)]);
    bytes.truncate(bytes.len() - 10);
    let ticks = decode(&bytes);
    assert_eq!(ticks.len(), 1);
    assert_eq!(ticks[0].instrument_token, 1);
}

#[test]
fn tick_json_shape() {
    let ticks = decode(&frame(&[packet(408065, 145025, 44, 321, 0)]));
    let value = serde_json::to_value(&ticks[0]).unwrap();
    assert_eq!(
        value,
        serde_json::json!({
            "instrument_token": 408065,
            "mode": "QUOTE",
            "last_price": "1450.25",
            "volume": 321
        })
    );
}
