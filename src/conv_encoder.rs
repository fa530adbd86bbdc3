//! Convolutional Encoder Stage — streaming driver over a trellis code
//!
//! Wraps a shared [`TrellisCode`] as a three-phase state machine:
//! **Init** (before a block's first input) → **Payload** (one trellis
//! lookup per input combination) → **Terminating** (feed the precomputed
//! termination inputs until `total_delays` further outputs have been
//! emitted, then back to Init). Streaming codes (block length 0) never
//! enter Terminating and carry their state across calls indefinitely.
//!
//! The trellis table is read-only, so any number of encoder stages can
//! share one engine through `Arc` without synchronization.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vsb_phy::trellis::{CodeGeneratorSpec, TrellisCode};
//! use vsb_phy::conv_encoder::ConvolutionalEncoder;
//!
//! let code = Arc::new(
//!     TrellisCode::new(&CodeGeneratorSpec::streaming(1, 2, vec![0b111, 0b101])).unwrap(),
//! );
//! let mut enc = ConvolutionalEncoder::new(code);
//! let out = enc.encode_bits(&[1, 0, 1, 1]);
//! assert_eq!(out, vec![0b11, 0b01, 0b00, 0b10]);
//! ```

use std::sync::Arc;

use crate::trellis::TrellisCode;

/// Encoder phase. Output happens in every phase that consumes a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderPhase {
    /// Before the first input of a block.
    Init,
    /// Consuming external input combinations.
    Payload,
    /// Driving the precomputed termination inputs.
    Terminating,
}

/// Streaming convolutional encoder over a shared trellis.
#[derive(Debug, Clone)]
pub struct ConvolutionalEncoder {
    code: Arc<TrellisCode>,
    phase: EncoderPhase,
    state: u32,
    /// Payload input steps consumed in the current block.
    bits_into_block: usize,
}

impl ConvolutionalEncoder {
    /// Create an encoder at the block start state (0).
    pub fn new(code: Arc<TrellisCode>) -> Self {
        Self {
            code,
            phase: EncoderPhase::Init,
            state: 0,
            bits_into_block: 0,
        }
    }

    /// Encode a run of input combinations (one per symbol step, I bits
    /// packed LSB-first). Returns one packed output word per step taken,
    /// including the termination steps appended automatically at each
    /// block boundary when the code is configured to terminate.
    ///
    /// State carries across calls; a block may span any number of calls.
    pub fn encode(&mut self, inputs: &[u32]) -> Vec<u32> {
        let mut out = Vec::with_capacity(inputs.len());
        for &combo in inputs {
            out.push(self.payload_step(combo));
            if !self.code.do_streaming() && self.bits_into_block == self.code.block_length_bits() {
                self.finish_block(&mut out);
            }
        }
        out
    }

    /// Convenience for single-input codes: one bit per step.
    ///
    /// # Panics
    ///
    /// Panics if the code has more than one input stream.
    pub fn encode_bits(&mut self, bits: &[u8]) -> Vec<u32> {
        assert_eq!(self.code.n_inputs(), 1, "encode_bits requires a 1-input code");
        let combos: Vec<u32> = bits.iter().map(|&b| (b & 1) as u32).collect();
        self.encode(&combos)
    }

    fn payload_step(&mut self, combo: u32) -> u32 {
        if self.phase == EncoderPhase::Init {
            self.phase = EncoderPhase::Payload;
        }
        debug_assert_eq!(self.phase, EncoderPhase::Payload);
        let (next, out) = self.code.encode_lookup(self.state, combo);
        self.state = next;
        self.bits_into_block += 1;
        out
    }

    /// Close out a finished block: run the termination trellis when
    /// configured, then return to Init at the block start state.
    fn finish_block(&mut self, out: &mut Vec<u32>) {
        if self.code.do_termination() {
            self.phase = EncoderPhase::Terminating;
            let from = self.state;
            for step in 0..self.code.total_delays() {
                let combo = self.code.termination_inputs(from, step);
                let (next, bits) = self.code.encode_lookup(self.state, combo);
                self.state = next;
                out.push(bits);
            }
            debug_assert_eq!(self.state, self.code.end_state());
        }
        self.phase = EncoderPhase::Init;
        self.state = 0;
        self.bits_into_block = 0;
    }

    /// Current phase.
    pub fn phase(&self) -> EncoderPhase {
        self.phase
    }

    /// Current trellis state.
    pub fn state(&self) -> u32 {
        self.state
    }

    /// The shared trellis.
    pub fn code(&self) -> &Arc<TrellisCode> {
        &self.code
    }

    /// Abandon the current block and return to Init at state 0.
    pub fn reset(&mut self) {
        self.phase = EncoderPhase::Init;
        self.state = 0;
        self.bits_into_block = 0;
    }
}
