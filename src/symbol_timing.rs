//! Symbol Timing Recovery — oversampled samples to tagged symbols
//!
//! Converts an oversampled baseband stream (ratio `R = input_rate /
//! symbol_rate`) into exactly one interpolated symbol per output item,
//! driven by a closed feedback loop: an interpolator picks a sample at the
//! running fractional position, the segment-sync tracker scores it, and
//! the tracker's timing adjustment retunes the next sampling instant.
//!
//! Every output symbol carries a [`SymbolTag`] in a parallel metadata
//! stream, even while unlocked: `valid` mirrors the segment lock flag and
//! `symbol_index` counts 0..831 relative to the detected segment sync.
//!
//! ## Pull contract
//!
//! `forecast(n)` asks for `ceil(n * R) + LOOKAHEAD_MARGIN` input samples.
//! `work` produces at most the requested capacity and returns the actual
//! count; running short on input is normal flow control, never an error.
//! Across any sequence of calls over a fixed total input, the cumulative
//! output count never exceeds `ceil(total_input / R)`.
//!
//! ## Example
//!
//! ```rust
//! use vsb_phy::symbol_timing::SymbolTimingRecovery;
//! use vsb_phy::types::SymbolTag;
//!
//! let mut str_loop = SymbolTimingRecovery::new(2.0);
//! let input = vec![1.0; 4000];
//! let mut samples = vec![0.0; 1000];
//! let mut tags = vec![SymbolTag::invalid(); 1000];
//! let r = str_loop.work(&input, &mut samples, &mut tags);
//! assert!(r.produced <= 2000);
//! ```

use crate::types::{
    Sample, SymbolTag, SyncMark, WorkResult, LOOKAHEAD_MARGIN, SEGMENT_LENGTH, SEG_SYNC_LENGTH,
};

/// Segment sync as sliced bits: symbols +5, -5, -5, +5.
const SEG_SYNC_PATTERN: [u8; SEG_SYNC_LENGTH] = [1, 0, 0, 1];

/// Integrator credit for a full 4-bit sync match at a phase bin.
const SYNC_HIT: f64 = 2.0;
/// Integrator debit for a miss; keeps random payload matches from
/// accumulating (a wrong bin matches with probability 1/16 per segment).
const SYNC_MISS: f64 = -0.2;
/// Integrator clamp.
const SYNC_CAP: f64 = 40.0;
/// Lock threshold on the winning bin's confidence.
const LOCK_THRESHOLD: f64 = 15.0;

/// Proportional gain from the timing error detector to the sampling
/// instant, and the clamp on the per-symbol adjustment.
const TIMING_GAIN: f64 = 0.01;
const MAX_ADJUSTMENT: f64 = 0.1;

/// Segment-sync tracking loop (the "sssr"): slices symbols, correlates
/// against the segment sync pattern over an 832-bin phase accumulator,
/// and produces the lock flag, symbol index, and timing adjustment.
#[derive(Debug, Clone)]
struct SegSyncTracker {
    /// Per-phase sync confidence.
    integrator: Vec<f64>,
    /// Free-running phase counter, 0..831.
    counter: usize,
    /// Phase bin where the segment starts, valid while locked.
    lock_start: usize,
    locked: bool,
    /// Sliced-bit history for the 4-bit correlator.
    bit_history: u8,
    /// Previous symbol and its hard decision, for the timing error
    /// detector.
    prev: Sample,
    prev_decision: Sample,
}

impl SegSyncTracker {
    fn new() -> Self {
        Self {
            integrator: vec![0.0; SEGMENT_LENGTH],
            counter: 0,
            lock_start: 0,
            locked: false,
            bit_history: 0,
            prev: 0.0,
            prev_decision: 0.0,
        }
    }

    /// Score one interpolated symbol. Returns `(seg_locked, symbol_index,
    /// timing_adjustment)`.
    fn update(&mut self, sample: Sample) -> (bool, u16, f64) {
        let bit = u8::from(sample > 0.0);
        self.bit_history = ((self.bit_history << 1) | bit) & 0x0F;

        let pattern = SEG_SYNC_PATTERN
            .iter()
            .fold(0u8, |acc, &b| (acc << 1) | b);
        let hit = self.bit_history == pattern;
        let bin = &mut self.integrator[self.counter];
        *bin = (*bin + if hit { SYNC_HIT } else { SYNC_MISS }).clamp(0.0, SYNC_CAP);

        // Once per wrap, re-elect the winning phase and settle the lock.
        if self.counter == SEGMENT_LENGTH - 1 {
            let (best_bin, best) = self
                .integrator
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, &v)| (i, v))
                .unwrap_or((0, 0.0));
            self.locked = best >= LOCK_THRESHOLD;
            if self.locked {
                // The correlator fires on the last sync symbol; the segment
                // started three symbols earlier.
                self.lock_start =
                    (best_bin + SEGMENT_LENGTH - (SEG_SYNC_LENGTH - 1)) % SEGMENT_LENGTH;
            }
        }

        let symbol_index =
            ((self.counter + SEGMENT_LENGTH - self.lock_start) % SEGMENT_LENGTH) as u16;
        self.counter = (self.counter + 1) % SEGMENT_LENGTH;

        // Decision-directed Mueller & Müller timing error, applied through
        // a small proportional gain. Zero when samples sit exactly on the
        // slicer levels.
        let decision: Sample = if sample > 0.0 { 5.0 } else { -5.0 };
        let error = self.prev_decision * sample - decision * self.prev;
        self.prev = sample;
        self.prev_decision = decision;
        let adjustment = (TIMING_GAIN * error).clamp(-MAX_ADJUSTMENT, MAX_ADJUSTMENT);

        (self.locked, symbol_index, adjustment)
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Symbol timing recovery loop.
#[derive(Debug, Clone)]
pub struct SymbolTimingRecovery {
    /// Input samples per symbol (R > 1).
    ratio: f64,
    /// Fractional read position into the next call's input.
    offset: f64,
    tracker: SegSyncTracker,
    /// Cumulative committed input samples, for the output-rate bound.
    samples_committed: u64,
    /// Cumulative output symbols.
    symbols_produced: u64,
}

impl SymbolTimingRecovery {
    /// Create a recovery loop for the given oversampling ratio.
    ///
    /// # Panics
    ///
    /// Panics if `ratio <= 1.0`.
    pub fn new(ratio: f64) -> Self {
        assert!(ratio > 1.0, "oversampling ratio must be > 1");
        Self {
            ratio,
            offset: 0.0,
            tracker: SegSyncTracker::new(),
            samples_committed: 0,
            symbols_produced: 0,
        }
    }

    /// Recovery loop for a raw input rate in Hz against the 8-VSB symbol
    /// rate.
    pub fn for_input_rate(input_rate: f64) -> Self {
        Self::new(input_rate / crate::types::ATSC_SYMBOL_RATE)
    }

    /// Input samples required to produce `noutput` symbols.
    pub fn forecast(&self, noutput: usize) -> usize {
        (noutput as f64 * self.ratio).ceil() as usize + LOOKAHEAD_MARGIN
    }

    /// Oversampling ratio.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Current segment lock state.
    pub fn seg_locked(&self) -> bool {
        self.tracker.locked
    }

    /// Produce up to `out_samples.len()` symbols (and tags, 1:1) from
    /// `input`. Returns the produced and consumed counts; fewer outputs
    /// than requested means the input ran short, and the host should
    /// append more input and call again.
    ///
    /// # Panics
    ///
    /// Panics if the output buffers differ in length.
    pub fn work(
        &mut self,
        input: &[Sample],
        out_samples: &mut [Sample],
        out_tags: &mut [SymbolTag],
    ) -> WorkResult {
        assert_eq!(
            out_samples.len(),
            out_tags.len(),
            "sample and tag buffers must pair 1:1"
        );

        // Rate bound: never emit more symbols than the nominal grid over
        // everything the host has presented so far.
        let total_available = self.samples_committed + input.len() as u64;
        let max_total = (total_available as f64 / self.ratio).ceil() as u64;
        let budget = (max_total.saturating_sub(self.symbols_produced)) as usize;
        let capacity = out_samples.len().min(budget);

        let mut pos = self.offset;
        let mut produced = 0;
        while produced < capacity {
            let idx = pos as usize;
            if pos < 0.0 || idx + 1 >= input.len() {
                // Ran short on data; resume here next call.
                break;
            }
            let frac = pos - idx as f64;
            let interp = input[idx] * (1.0 - frac) + input[idx + 1] * frac;

            let (seg_locked, symbol_index, adjustment) = self.tracker.update(interp);
            out_samples[produced] = interp;
            out_tags[produced] = SymbolTag {
                valid: seg_locked,
                symbol_index,
                sync: if seg_locked && symbol_index == 0 {
                    SyncMark::Segment
                } else {
                    SyncMark::None
                },
            };
            produced += 1;

            pos += self.ratio + adjustment;
        }

        let consumed = (pos as usize).min(input.len());
        self.offset = pos - consumed as f64;
        self.samples_committed += consumed as u64;
        self.symbols_produced += produced as u64;
        WorkResult { produced, consumed }
    }

    /// Drop all loop state, including the lock.
    pub fn reset(&mut self) {
        self.offset = 0.0;
        self.tracker.reset();
        self.samples_committed = 0;
        self.symbols_produced = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random payload bits.
    struct Lcg(u32);
    impl Lcg {
        fn next_bit(&mut self) -> u8 {
            self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (self.0 >> 16) as u8 & 1
        }
    }

    /// Symbols for `n_segments` segments: 4 sync symbols then random
    /// payload, at levels +/-5.
    fn segment_symbols(n_segments: usize, seed: u32) -> Vec<Sample> {
        let mut rng = Lcg(seed);
        let mut symbols = Vec::with_capacity(n_segments * SEGMENT_LENGTH);
        for _ in 0..n_segments {
            for &b in &SEG_SYNC_PATTERN {
                symbols.push(if b == 1 { 5.0 } else { -5.0 });
            }
            for _ in 0..SEGMENT_LENGTH - SEG_SYNC_LENGTH {
                symbols.push(if rng.next_bit() == 1 { 5.0 } else { -5.0 });
            }
        }
        symbols
    }

    /// Sample-and-hold oversampling at an integer ratio.
    fn oversample(symbols: &[Sample], ratio: usize) -> Vec<Sample> {
        let mut out = Vec::with_capacity(symbols.len() * ratio);
        for &s in symbols {
            out.extend(std::iter::repeat(s).take(ratio));
        }
        out
    }

    fn drain(
        str_loop: &mut SymbolTimingRecovery,
        input: &[Sample],
    ) -> (Vec<Sample>, Vec<SymbolTag>) {
        let mut samples = vec![0.0; input.len()];
        let mut tags = vec![SymbolTag::invalid(); input.len()];
        let r = str_loop.work(input, &mut samples, &mut tags);
        samples.truncate(r.produced);
        tags.truncate(r.produced);
        (samples, tags)
    }

    #[test]
    fn test_forecast_formula() {
        let str_loop = SymbolTimingRecovery::new(2.0);
        assert_eq!(str_loop.forecast(100), 200 + LOOKAHEAD_MARGIN);
        let str_loop = SymbolTimingRecovery::new(1.75);
        assert_eq!(str_loop.forecast(100), 175 + LOOKAHEAD_MARGIN);
    }

    #[test]
    fn test_produces_one_symbol_per_ratio_samples() {
        let mut str_loop = SymbolTimingRecovery::new(2.0);
        let input = oversample(&segment_symbols(4, 7), 2);
        let (samples, tags) = drain(&mut str_loop, &input);
        assert_eq!(samples.len(), tags.len());
        // Roughly one symbol per 2 samples, bounded above by the grid.
        assert!(samples.len() as f64 >= input.len() as f64 / 2.0 * 0.9);
        assert!(samples.len() <= (input.len() as f64 / 2.0).ceil() as usize);
    }

    #[test]
    fn test_output_rate_bound_across_calls() {
        // Cumulative pairs must never exceed ceil(total / R).
        let mut str_loop = SymbolTimingRecovery::new(1.8);
        // Arbitrary waveform; only the rate bound matters here.
        let input = oversample(&segment_symbols(8, 3), 9);
        let mut total_in = 0usize;
        let mut total_out = 0usize;
        let mut cursor = 0usize;
        while cursor < input.len() {
            let chunk = (input.len() - cursor).min(1234);
            let mut samples = vec![0.0; 4096];
            let mut tags = vec![SymbolTag::invalid(); 4096];
            let r = str_loop.work(&input[cursor..cursor + chunk], &mut samples, &mut tags);
            total_out += r.produced;
            total_in += chunk;
            // The host commits only what was consumed; re-present the rest.
            cursor += r.consumed;
            if r.consumed == 0 && r.produced == 0 {
                break;
            }
            assert!(total_out as f64 <= (total_in as f64 / 1.8).ceil());
        }
        assert!(total_out as f64 <= (input.len() as f64 / 1.8).ceil());
    }

    #[test]
    fn test_partial_output_on_starvation_is_not_an_error() {
        let mut str_loop = SymbolTimingRecovery::new(2.0);
        let input = vec![1.0; 10];
        let mut samples = vec![0.0; 100];
        let mut tags = vec![SymbolTag::invalid(); 100];
        let r = str_loop.work(&input, &mut samples, &mut tags);
        assert!(r.produced < 100);
        assert!(r.consumed <= input.len());
    }

    #[test]
    fn test_locks_onto_segment_sync() {
        let mut str_loop = SymbolTimingRecovery::new(2.0);
        let input = oversample(&segment_symbols(16, 42), 2);
        let (_, tags) = drain(&mut str_loop, &input);
        assert!(str_loop.seg_locked(), "never locked on a clean stream");
        // After lock, sync-start tags appear exactly 832 symbols apart.
        let starts: Vec<usize> = tags
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_sync_start())
            .map(|(i, _)| i)
            .collect();
        assert!(starts.len() >= 2, "no sync starts tagged");
        for w in starts.windows(2) {
            assert_eq!(w[1] - w[0], SEGMENT_LENGTH);
        }
    }

    #[test]
    fn test_tags_emitted_while_unlocked() {
        let mut str_loop = SymbolTimingRecovery::new(2.0);
        // Constant input carries no sync; everything stays invalid.
        let input = vec![1.0; 5000];
        let (samples, tags) = drain(&mut str_loop, &input);
        assert_eq!(samples.len(), tags.len());
        assert!(!tags.is_empty());
        assert!(tags.iter().all(|t| !t.valid));
    }

    #[test]
    fn test_symbol_index_counts_mod_832_when_locked() {
        let mut str_loop = SymbolTimingRecovery::new(2.0);
        let input = oversample(&segment_symbols(16, 11), 2);
        let (_, tags) = drain(&mut str_loop, &input);
        let locked_run: Vec<&SymbolTag> = tags.iter().filter(|t| t.valid).collect();
        assert!(!locked_run.is_empty());
        // Find a sync start and verify the index ramp after it.
        if let Some(first) = tags.iter().position(|t| t.is_sync_start()) {
            for (k, tag) in tags[first..].iter().take(SEGMENT_LENGTH).enumerate() {
                if tag.valid {
                    assert_eq!(tag.symbol_index as usize, k % SEGMENT_LENGTH);
                }
            }
        } else {
            panic!("no sync start found");
        }
    }

    #[test]
    fn test_reset_drops_lock() {
        let mut str_loop = SymbolTimingRecovery::new(2.0);
        let input = oversample(&segment_symbols(16, 42), 2);
        let _ = drain(&mut str_loop, &input);
        assert!(str_loop.seg_locked());
        str_loop.reset();
        assert!(!str_loop.seg_locked());
    }
}
