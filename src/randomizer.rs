//! Data Randomizer — A/53 payload whitening
//!
//! Reversible whitening of transport packets with a 16-bit linear-feedback
//! shift register, as specified in ATSC A/53 (figure D4). XORing payload
//! bytes with the LFSR output sequence flattens the transmitted spectrum
//! and removes long constant runs; applying the identical sequence again
//! restores the original bytes.
//!
//! The LFSR is preloaded with a fixed constant and must be reset by the
//! caller exactly once per field boundary, during the segment sync interval
//! before the first data segment. That synchronization point is known only
//! to the framing layer and cannot be discovered here.
//!
//! Only 14 of the 16 state bits influence the output byte, so the output
//! function is served from a process-wide 16 KiB lookup table built lazily
//! on first use.
//!
//! ## Example
//!
//! ```rust
//! use vsb_phy::randomizer::Randomizer;
//!
//! let mut tx = Randomizer::new();
//! let mut rx = Randomizer::new();
//!
//! let mut packet = vec![0x47u8]; // MPEG transport sync byte
//! packet.extend((0u8..187).map(|i| i.wrapping_mul(7)));
//!
//! tx.reset();
//! rx.reset();
//! let whitened = tx.whiten(&packet);
//! assert_eq!(whitened.len(), 187); // sync byte stripped
//! assert_eq!(rx.dewhiten(&whitened), packet);
//! ```

use std::sync::OnceLock;

/// MPEG-2 transport stream sync byte, stripped by [`Randomizer::whiten`].
pub const MPEG_SYNC_BYTE: u8 = 0x47;

/// Transport packet length including the sync byte.
pub const MPEG_PACKET_LENGTH: usize = 188;

/// LFSR preload constant (0xF180 bit-reversed).
const PRELOAD_VALUE: u16 = 0x018F;

/// Feedback tap mask applied on a 1-input clock step.
const TAP_MASK: u16 = 0xA638;

/// State bits that feed the output byte (bits 15, 13, 12, 9, 5, 4, 3, 2).
const OUTPUT_TAP_MASK: u16 = 0xB23C;

/// Process-wide output map, one entry per 14-bit compressed state.
static OUTPUT_MAP: OnceLock<Box<[u8; 1 << 14]>> = OnceLock::new();

/// A/53 data randomizer: whitens and de-whitens transport packets.
#[derive(Debug, Clone)]
pub struct Randomizer {
    state: u16,
}

impl Default for Randomizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Randomizer {
    /// Create a randomizer in the preloaded state.
    pub fn new() -> Self {
        Self {
            state: PRELOAD_VALUE,
        }
    }

    /// Restore the fixed preload value.
    ///
    /// Must be called once per field boundary, before the first data
    /// segment of the field, on both the whitening and de-whitening sides.
    pub fn reset(&mut self) {
        self.state = PRELOAD_VALUE;
    }

    /// Current shift register contents.
    pub fn state(&self) -> u16 {
        self.state
    }

    /// Current output byte, from the shared lookup table.
    pub fn output(&self) -> u8 {
        let map = OUTPUT_MAP.get_or_init(build_output_map);
        map[((self.state & OUTPUT_TAP_MASK) >> 2) as usize]
    }

    /// Advance the register one step: conditional XOR with the tap mask,
    /// then a right shift with the feedback bit injected at the top.
    pub fn clock(&mut self) {
        if self.state & 1 != 0 {
            self.state = ((self.state ^ TAP_MASK) >> 1) | 0x8000;
        } else {
            self.state >>= 1;
        }
    }

    /// Current output byte, advancing the register.
    pub fn output_and_clock(&mut self) -> u8 {
        let out = self.output();
        self.clock();
        out
    }

    /// Whiten a transport packet: strip the leading sync byte and XOR each
    /// remaining byte with the LFSR sequence, clocking once per byte.
    ///
    /// # Panics
    ///
    /// Panics if the packet is not 188 bytes or does not start with the
    /// MPEG sync byte.
    pub fn whiten(&mut self, packet: &[u8]) -> Vec<u8> {
        assert_eq!(packet.len(), MPEG_PACKET_LENGTH, "packet must be 188 bytes");
        assert_eq!(packet[0], MPEG_SYNC_BYTE, "packet must start with 0x47");
        packet[1..]
            .iter()
            .map(|&b| b ^ self.output_and_clock())
            .collect()
    }

    /// De-whiten 187 payload bytes, re-inserting the leading sync byte.
    ///
    /// The exact inverse of [`whiten`](Self::whiten) when both registers
    /// were reset at the same field boundary.
    ///
    /// # Panics
    ///
    /// Panics if the payload is not 187 bytes.
    pub fn dewhiten(&mut self, payload: &[u8]) -> Vec<u8> {
        assert_eq!(
            payload.len(),
            MPEG_PACKET_LENGTH - 1,
            "whitened payload must be 187 bytes"
        );
        let mut out = Vec::with_capacity(MPEG_PACKET_LENGTH);
        out.push(MPEG_SYNC_BYTE);
        out.extend(payload.iter().map(|&b| b ^ self.output_and_clock()));
        out
    }
}

/// Assemble the output byte directly from the register taps. Used to build
/// the lookup table and as a test oracle for the fast path.
fn slow_output_map(state: u16) -> u8 {
    let mut output = 0u8;
    if state & 0x8000 != 0 {
        output |= 0x01;
    }
    if state & 0x2000 != 0 {
        output |= 0x02;
    }
    if state & 0x1000 != 0 {
        output |= 0x04;
    }
    if state & 0x0200 != 0 {
        output |= 0x08;
    }
    if state & 0x0020 != 0 {
        output |= 0x10;
    }
    if state & 0x0010 != 0 {
        output |= 0x20;
    }
    if state & 0x0008 != 0 {
        output |= 0x40;
    }
    if state & 0x0004 != 0 {
        output |= 0x80;
    }
    output
}

fn build_output_map() -> Box<[u8; 1 << 14]> {
    let mut map = Box::new([0u8; 1 << 14]);
    for (i, entry) in map.iter_mut().enumerate() {
        *entry = slow_output_map(((i as u16) << 2) & OUTPUT_TAP_MASK);
    }
    map
}
