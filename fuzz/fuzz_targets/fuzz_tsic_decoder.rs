//! Fuzz target: TSIC `FrameDecoder::on_edge`
//!
//! Each input byte pair is one edge: the low bit of the first byte is the
//! level, the pair as a little-endian u16 is the delay since the previous
//! edge.  Any packet the decoder yields must fit in 20 bits, and decoding
//! it must either fail or land inside the sensor range.
//!
//! cargo fuzz run fuzz_tsic_decoder

#![no_main]

use gaggia::app::ports::Level;
use gaggia::sensors::tsic::{FrameDecoder, decode_packet};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();
    let mut tick = 0u32;

    for pair in data.chunks_exact(2) {
        let level = if pair[0] & 1 == 1 { Level::High } else { Level::Low };
        tick = tick.wrapping_add(u32::from(u16::from_le_bytes([pair[0], pair[1]])));

        if let Some(word) = decoder.on_edge(level, tick) {
            assert!(word <= 0xF_FFFF, "packet wider than 20 bits");
            if let Ok(c) = decode_packet(word, -50.0, 150.0) {
                assert!((-50.0..=150.0).contains(&c));
            }
        }
        assert!(decoder.pending_bits() < 20);
    }
});
