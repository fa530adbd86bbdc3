//! Field Sync Detection — PN sequences, sliding correlator, tag classifier
//!
//! The 8-VSB field sync segment opens with the 511-bit PN sequence defined
//! by x⁹+x⁷+x⁶+x⁴+x³+x+1 (followed by three 63-bit PN sequences from
//! x⁶+x⁴+x²+x+1). This module generates the reference sequences, provides
//! a bit-at-a-time sliding correlator against PN511, and a checker stage
//! that upgrades segment-sync tags to field-sync tags: a matching PN511
//! marks field 1, an inverted PN511 marks field 2.
//!
//! ## Example
//!
//! ```rust
//! use vsb_phy::field_sync::{pn511, SlidingCorrelator};
//!
//! let mut corr = SlidingCorrelator::new();
//! let mut mismatches = 0;
//! for &bit in pn511() {
//!     mismatches = corr.input_bit(bit);
//! }
//! assert_eq!(mismatches, 0);
//! ```

use std::sync::OnceLock;

use crate::types::{Sample, SymbolTag, SyncMark, WorkResult};

/// Length of the long field-sync PN sequence.
pub const PN511_LEN: usize = 511;
/// Length of the short field-sync PN sequence.
pub const PN63_LEN: usize = 63;

/// Mismatch count at or below which the correlator window is declared a
/// PN511 match (and at or above `511 - threshold`, an inverted match).
pub const CORRELATION_THRESHOLD: u16 = 64;

// Fibonacci LFSR taps for the PN generators, one bit per x^k term
// (bit k-1 holds the tap at delay k; the constant term is implicit).
const PN511_TAPS: u16 = 0b1_0110_1101; // x^9+x^7+x^6+x^4+x^3+x+1
const PN511_PRELOAD: u16 = 0b0_1000_0000;
const PN63_TAPS: u16 = 0b10_1011; // x^6+x^4+x^2+x+1
const PN63_PRELOAD: u16 = 0b10_0111;

fn fill_lfsr(out: &mut [u8], width: u32, taps: u16, preload: u16) {
    let mask = (1u16 << width) - 1;
    let mut state = preload & mask;
    for slot in out.iter_mut() {
        *slot = ((state >> (width - 1)) & 1) as u8;
        let feedback = (state & taps).count_ones() as u16 & 1;
        state = ((state << 1) | feedback) & mask;
    }
}

/// The 511-bit field-sync PN sequence, as bits 0/1. Built once.
pub fn pn511() -> &'static [u8; PN511_LEN] {
    static SEQ: OnceLock<Box<[u8; PN511_LEN]>> = OnceLock::new();
    SEQ.get_or_init(|| {
        let mut seq = Box::new([0u8; PN511_LEN]);
        fill_lfsr(&mut seq[..], 9, PN511_TAPS, PN511_PRELOAD);
        seq
    })
}

/// The 63-bit field-sync PN sequence, as bits 0/1. Built once.
pub fn pn63() -> &'static [u8; PN63_LEN] {
    static SEQ: OnceLock<Box<[u8; PN63_LEN]>> = OnceLock::new();
    SEQ.get_or_init(|| {
        let mut seq = Box::new([0u8; PN63_LEN]);
        fill_lfsr(&mut seq[..], 6, PN63_TAPS, PN63_PRELOAD);
        seq
    })
}

/// Number of 64-bit words holding the 511-bit correlator window.
const CORR_WORDS: usize = 8;

/// Bit-at-a-time sliding correlation against PN511.
///
/// Each call shifts the new bit into a 511-bit window and returns the
/// Hamming distance between the window and the reference sequence:
/// 0 is a perfect match, 511 a perfectly inverted one.
#[derive(Debug, Clone)]
pub struct SlidingCorrelator {
    history: [u64; CORR_WORDS],
    reference: [u64; CORR_WORDS],
}

impl Default for SlidingCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl SlidingCorrelator {
    pub fn new() -> Self {
        // The oldest window bit lives at position 510; the reference is
        // laid out so a freshly completed PN511 run scores zero.
        let mut reference = [0u64; CORR_WORDS];
        for (i, &bit) in pn511().iter().enumerate() {
            if bit == 1 {
                let pos = PN511_LEN - 1 - i;
                reference[pos / 64] |= 1 << (pos % 64);
            }
        }
        Self {
            history: [0; CORR_WORDS],
            reference,
        }
    }

    /// Shift in one sliced bit and return the window's mismatch count.
    pub fn input_bit(&mut self, bit: u8) -> u16 {
        let mut carry = u64::from(bit & 1);
        for word in self.history.iter_mut() {
            let out = *word >> 63;
            *word = (*word << 1) | carry;
            carry = out;
        }
        // Keep exactly 511 bits.
        self.history[CORR_WORDS - 1] &= (1 << 63) - 1;

        self.history
            .iter()
            .zip(&self.reference)
            .map(|(h, r)| (h ^ r).count_ones() as u16)
            .sum()
    }

    pub fn reset(&mut self) {
        self.history = [0; CORR_WORDS];
    }
}

/// Stream delay imposed by the checker: the PN511 verdict for a segment
/// is only known this many symbols after its sync start.
pub const CHECKER_DELAY: usize = crate::types::SEG_SYNC_LENGTH + PN511_LEN - 1;

/// Upgrades segment-sync tags to field-sync tags.
///
/// Sits between timing recovery and the demux. The output is a delayed
/// copy of the input ([`CHECKER_DELAY`] items): by the time a sync-start
/// item leaves the delay line, the correlator has seen the 511 symbols
/// that would hold PN511 if that segment is a field sync, and the
/// `SyncMark::Segment` on it can be rewritten to [`SyncMark::FieldSync1`]
/// or [`SyncMark::FieldSync2`] before the demux ever sees it.
#[derive(Debug, Clone)]
pub struct FieldSyncChecker {
    correlator: SlidingCorrelator,
    delay_line: std::collections::VecDeque<(Sample, SymbolTag)>,
}

impl Default for FieldSyncChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldSyncChecker {
    pub fn new() -> Self {
        Self {
            correlator: SlidingCorrelator::new(),
            delay_line: std::collections::VecDeque::with_capacity(CHECKER_DELAY + 1),
        }
    }

    /// Input items required to produce `noutput` classified items.
    pub fn forecast(&self, noutput: usize) -> usize {
        noutput + CHECKER_DELAY
    }

    /// Feed one item through the delay line; returns the item falling out
    /// of the far end, if the line is primed.
    fn step(&mut self, sample: Sample, tag: SymbolTag) -> Option<(Sample, SymbolTag)> {
        let bit = u8::from(sample > 0.0);
        let mismatches = self.correlator.input_bit(bit);

        self.delay_line.push_back((sample, tag));
        if self.delay_line.len() <= CHECKER_DELAY {
            return None;
        }
        let (out_sample, mut out_tag) = self.delay_line.pop_front().unwrap_or_default();

        // This incoming item is exactly PN511's last symbol relative to
        // the sync start now leaving the line; the correlator window
        // covers the candidate sequence.
        if out_tag.is_sync_start() && out_tag.sync == SyncMark::Segment {
            if mismatches <= CORRELATION_THRESHOLD {
                out_tag.sync = SyncMark::FieldSync1;
            } else if mismatches >= PN511_LEN as u16 - CORRELATION_THRESHOLD {
                out_tag.sync = SyncMark::FieldSync2;
            }
        }
        Some((out_sample, out_tag))
    }

    /// Pass `input` through the delay line, writing classified items to
    /// the output buffers. Produces one item per consumed item once the
    /// delay line is primed (the first [`CHECKER_DELAY`] items of a fresh
    /// stream are withheld). Consumption stops once the output buffers are
    /// full; the remainder is left unconsumed for the host to re-present.
    ///
    /// # Panics
    ///
    /// Panics if `input` and `in_tags` differ in length, or if the two
    /// output buffers differ in length.
    pub fn work(
        &mut self,
        input: &[Sample],
        in_tags: &[SymbolTag],
        out_samples: &mut [Sample],
        out_tags: &mut [SymbolTag],
    ) -> WorkResult {
        assert_eq!(input.len(), in_tags.len());
        assert_eq!(out_samples.len(), out_tags.len());
        let mut produced = 0;
        let mut consumed = 0;
        for (&sample, &tag) in input.iter().zip(in_tags) {
            // A primed delay line emits on every step; stop short of an
            // emission the output cannot hold.
            if produced == out_samples.len() && self.delay_line.len() >= CHECKER_DELAY {
                break;
            }
            if let Some((s, t)) = self.step(sample, tag) {
                out_samples[produced] = s;
                out_tags[produced] = t;
                produced += 1;
            }
            consumed += 1;
        }
        WorkResult { produced, consumed }
    }

    pub fn reset(&mut self) {
        self.correlator.reset();
        self.delay_line.clear();
    }
}
