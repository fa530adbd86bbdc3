//! Trellis Code Engine — generic convolutional-code construction
//!
//! Builds the full transition table (trellis) of a convolutional code from
//! its generator description: any number of input and output streams, an
//! I×O feed-forward generator matrix, optional feedback, block or streaming
//! operation, and precomputed trellis termination.
//!
//! ## Generator convention
//!
//! Each generator entry is an integer bitmask: bit k means a tap at delay
//! k, so `0b111` is `1 + D + D²`. The matrix is listed input-major within
//! each output: for 2 inputs and 2 outputs the order is
//! `[I1→O1, I2→O1, I1→O2, I2→O2]`. Feedback entries use the same layout;
//! bit 0 is fixed (it represents the current bit) and is ignored.
//!
//! ## Realization selection
//!
//! Construction evaluates two dual encodings — single-output/all-inputs
//! (SOAI, one shared memory per output) and single-input/all-outputs
//! (SIAO, one shared memory per input) — coalescing structurally identical
//! feedback polynomials onto one physical memory, and keeps whichever needs
//! fewer total delay bits. Ties go to SOAI, which is cheaper to evaluate
//! per step. The chosen strategy is a closed [`Realization`] variant fixed
//! at construction; the per-step simulator never branches on scattered
//! flags.
//!
//! Once built, the table is immutable: [`TrellisCode::encode_lookup`] is an
//! O(1) read, and one engine can be shared across encoder stages through
//! `Arc` without synchronization.
//!
//! ## Example
//!
//! ```rust
//! use vsb_phy::trellis::{CodeGeneratorSpec, TrellisCode};
//!
//! // Rate 1/2, memory-2 code, streaming mode
//! let spec = CodeGeneratorSpec::streaming(1, 2, vec![0b111, 0b101]);
//! let code = TrellisCode::new(&spec).unwrap();
//! assert_eq!(code.total_delays(), 2);
//! assert_eq!(code.n_states(), 4);
//!
//! let (next, out) = code.encode_lookup(0, 1);
//! assert_eq!(out, 0b11); // both outputs fire on the first 1 bit
//! assert_eq!(next, 1);
//! ```

use serde::{Deserialize, Serialize};

use crate::types::VsbError;

/// Upper bound on input and output stream counts.
pub const MAX_STREAMS: usize = 10;

/// Upper bound on the block length in bits.
pub const MAX_BLOCK_BITS: usize = 10_000_000;

/// Widest state the dense table representation supports.
const MAX_TOTAL_DELAYS: usize = 24;

/// Complete description of a convolutional code. Immutable; owned by the
/// constructing caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeGeneratorSpec {
    /// Number of input bit streams I.
    pub n_inputs: usize,
    /// Number of output bit streams O.
    pub n_outputs: usize,
    /// I×O feed-forward generator matrix, input-major within each output.
    pub generators: Vec<u32>,
    /// Optional I×O feedback matrix; bit 0 of each entry is ignored.
    pub feedback: Option<Vec<u32>>,
    /// Block length in bits per input stream; 0 selects streaming mode.
    pub block_length_bits: usize,
    /// Terminate the trellis at the end of each block.
    pub do_termination: bool,
    /// Target state for termination (masked to the state range).
    pub end_state: u32,
}

impl CodeGeneratorSpec {
    /// Streaming (unbounded) feed-forward code.
    pub fn streaming(n_inputs: usize, n_outputs: usize, generators: Vec<u32>) -> Self {
        Self {
            n_inputs,
            n_outputs,
            generators,
            feedback: None,
            block_length_bits: 0,
            do_termination: false,
            end_state: 0,
        }
    }

    /// Terminated block code ending at state 0.
    pub fn block(
        n_inputs: usize,
        n_outputs: usize,
        generators: Vec<u32>,
        block_length_bits: usize,
    ) -> Self {
        Self {
            n_inputs,
            n_outputs,
            generators,
            feedback: None,
            block_length_bits,
            do_termination: true,
            end_state: 0,
        }
    }
}

/// Which of the four encode strategies was selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Realization {
    /// Single output, all inputs; feed-forward only.
    Soai,
    /// Single output, all inputs; with feedback.
    SoaiFeedback,
    /// Single input, all outputs; feed-forward only.
    Siao,
    /// Single input, all outputs; with feedback.
    SiaoFeedback,
}

/// Degenerate-but-valid configuration findings. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrellisWarning {
    /// Every generator feeding this output is zero; the output is constant 0.
    ZeroOutputColumn(usize),
    /// Every generator driven by this input is zero; the input is unused.
    UnusedInput(usize),
    /// The feedback matrix only had bit 0 set everywhere; feedback disabled.
    NoopFeedback,
    /// The configured end state had bits outside the state range.
    EndStateMasked { given: u32, masked: u32 },
}

/// Memory layout of one realization candidate.
#[derive(Debug, Clone)]
struct RealizationPlan {
    soai: bool,
    /// Number of physical delay lines.
    n_memories: usize,
    /// Delay bits per memory.
    n_delays: Vec<usize>,
    /// Which input (SIAO) or output (SOAI) each memory belongs to.
    io_num: Vec<usize>,
    /// Memory index for each (input, output) matrix cell.
    states_ndx: Vec<usize>,
    /// Coalesced feedback polynomial per memory (bit 0 cleared); empty
    /// without feedback.
    feedback: Vec<u32>,
    /// Sum of delay bits over all memories.
    total_delays: usize,
    /// Largest per-memory delay length.
    max_delay: usize,
}

/// A fully constructed convolutional-code trellis.
///
/// Read-only after construction; shareable across encoder stages.
#[derive(Debug, Clone)]
pub struct TrellisCode {
    n_inputs: usize,
    n_outputs: usize,
    generators: Vec<u32>,
    block_length_bits: usize,
    do_streaming: bool,
    do_termination: bool,
    do_feedback: bool,
    realization: Realization,

    n_memories: usize,
    n_delays: Vec<usize>,
    io_num: Vec<usize>,
    states_ndx: Vec<usize>,
    mem_masks: Vec<u32>,
    feedback: Vec<u32>,

    max_delay: usize,
    total_delays: usize,
    n_states: usize,
    n_input_combinations: usize,
    end_state: u32,

    /// Dense transition table, indexed `state * n_input_combinations + input`.
    next_state: Vec<u32>,
    /// Output bits per transition, packed LSB-first by output index.
    outputs: Vec<u32>,
    /// Termination input combination per `state * total_delays + step`.
    term_inputs: Vec<u32>,

    warnings: Vec<TrellisWarning>,
}

/// Bit position of the highest set bit; 0 for values 0 and 1. This is the
/// number of delay stages a generator polynomial needs.
fn max_bit_position(x: u32) -> usize {
    if x <= 1 {
        0
    } else {
        31 - x.leading_zeros() as usize
    }
}

#[inline]
fn parity(x: u32) -> u32 {
    x.count_ones() & 1
}

impl TrellisCode {
    /// Validate the spec, pick the minimal-memory realization, and build
    /// the transition table (and termination table when requested).
    ///
    /// Dimension errors, an out-of-range block length, and a block shorter
    /// than the code memory are fatal here, before any table is allocated.
    /// Degenerate-but-valid configurations only produce [`warnings`].
    ///
    /// [`warnings`]: Self::warnings
    pub fn new(spec: &CodeGeneratorSpec) -> Result<Self, VsbError> {
        if spec.n_inputs == 0 || spec.n_inputs > MAX_STREAMS {
            return Err(VsbError::InvalidStreamCount(spec.n_inputs, MAX_STREAMS));
        }
        if spec.n_outputs == 0 || spec.n_outputs > MAX_STREAMS {
            return Err(VsbError::InvalidStreamCount(spec.n_outputs, MAX_STREAMS));
        }
        if spec.block_length_bits > MAX_BLOCK_BITS {
            return Err(VsbError::BlockTooLong(spec.block_length_bits, MAX_BLOCK_BITS));
        }
        let n_cells = spec.n_inputs * spec.n_outputs;
        if spec.generators.len() != n_cells {
            return Err(VsbError::GeneratorSizeMismatch {
                got: spec.generators.len(),
                expected: n_cells,
            });
        }
        if let Some(fb) = &spec.feedback {
            if fb.len() != n_cells {
                return Err(VsbError::GeneratorSizeMismatch {
                    got: fb.len(),
                    expected: n_cells,
                });
            }
        }

        let n_inputs = spec.n_inputs;
        let n_outputs = spec.n_outputs;
        let maio = |i: usize, o: usize| o * n_inputs + i;
        let mut warnings = Vec::new();

        // A feedback matrix whose entries all reduce to "current bit only"
        // is no feedback at all.
        let mut feedback = spec.feedback.as_deref();
        if let Some(fb) = feedback {
            if fb.iter().fold(0u32, |acc, &f| acc | f) | 1 == 1 {
                log::warn!("trellis: feedback matrix is a no-op, ignoring feedback");
                warnings.push(TrellisWarning::NoopFeedback);
                feedback = None;
            }
        }

        // Degenerate shapes: constant-zero outputs and unused inputs are
        // legal, but almost certainly a configuration mistake.
        for o in 0..n_outputs {
            if (0..n_inputs).all(|i| spec.generators[maio(i, o)] == 0) {
                log::warn!("trellis: output {} of {} will always be 0", o + 1, n_outputs);
                warnings.push(TrellisWarning::ZeroOutputColumn(o));
            }
        }
        for i in 0..n_inputs {
            if (0..n_outputs).all(|o| spec.generators[maio(i, o)] == 0) {
                log::warn!("trellis: input {} of {} is never used", i + 1, n_inputs);
                warnings.push(TrellisWarning::UnusedInput(i));
            }
        }

        // Evaluate both realizations and keep the cheaper one. A tie goes
        // to SOAI, which needs one table access per output per step.
        let soai = Self::plan(true, n_inputs, n_outputs, &spec.generators, feedback);
        let siao = Self::plan(false, n_inputs, n_outputs, &spec.generators, feedback);
        let plan = if siao.total_delays < soai.total_delays {
            siao
        } else {
            soai
        };

        let do_feedback = feedback.is_some();
        let realization = match (plan.soai, do_feedback) {
            (true, false) => Realization::Soai,
            (true, true) => Realization::SoaiFeedback,
            (false, false) => Realization::Siao,
            (false, true) => Realization::SiaoFeedback,
        };

        let do_streaming = spec.block_length_bits == 0;
        let do_termination = !do_streaming && spec.do_termination;

        // Block coding needs at least one full memory depth per block,
        // otherwise no block could ever be terminated.
        if !do_streaming && spec.block_length_bits < plan.max_delay {
            return Err(VsbError::BlockTooShort {
                block: spec.block_length_bits,
                max_delay: plan.max_delay,
            });
        }
        if plan.total_delays > MAX_TOTAL_DELAYS {
            return Err(VsbError::StateSpaceTooLarge(plan.total_delays));
        }

        let total_delays = plan.total_delays;
        let n_states = 1usize << total_delays;
        let n_input_combinations = 1usize << n_inputs;
        let state_mask = (n_states - 1) as u32;

        let mut end_state = spec.end_state;
        if end_state & !state_mask != 0 {
            let masked = end_state & state_mask;
            log::warn!(
                "trellis: end state {:#x} outside state range, masked to {:#x}",
                end_state,
                masked
            );
            warnings.push(TrellisWarning::EndStateMasked {
                given: end_state,
                masked,
            });
            end_state = masked;
        }

        let mem_masks: Vec<u32> = plan
            .n_delays
            .iter()
            .map(|&d| (2u32 << d).wrapping_sub(1))
            .collect();

        let mut code = Self {
            n_inputs,
            n_outputs,
            generators: spec.generators.clone(),
            block_length_bits: spec.block_length_bits,
            do_streaming,
            do_termination,
            do_feedback,
            realization,
            n_memories: plan.n_memories,
            n_delays: plan.n_delays,
            io_num: plan.io_num,
            states_ndx: plan.states_ndx,
            mem_masks,
            feedback: plan.feedback,
            max_delay: plan.max_delay,
            total_delays,
            n_states,
            n_input_combinations,
            end_state,
            next_state: Vec::new(),
            outputs: Vec::new(),
            term_inputs: Vec::new(),
            warnings,
        };

        code.build_table();
        if code.do_termination {
            code.build_termination_table()?;
        }
        Ok(code)
    }

    /// Memory layout for one realization candidate. With feedback,
    /// structurally identical feedback polynomials inside one group (one
    /// output for SOAI, one input for SIAO) share a physical memory.
    fn plan(
        soai: bool,
        n_inputs: usize,
        n_outputs: usize,
        generators: &[u32],
        feedback: Option<&[u32]>,
    ) -> RealizationPlan {
        let maio = |i: usize, o: usize| o * n_inputs + i;
        let n_groups = if soai { n_outputs } else { n_inputs };
        let group_len = if soai { n_inputs } else { n_outputs };
        let mut states_ndx = vec![0usize; n_inputs * n_outputs];

        match feedback {
            None => {
                // One memory per group, sized by the longest generator in
                // the group.
                let mut n_delays = vec![0usize; n_groups];
                let mut total = 0;
                let mut max_delay = 0;
                for g in 0..n_groups {
                    let mut group_max = 0;
                    for other in 0..group_len {
                        let (i, o) = if soai { (other, g) } else { (g, other) };
                        group_max = group_max.max(max_bit_position(generators[maio(i, o)]));
                        states_ndx[maio(i, o)] = g;
                    }
                    n_delays[g] = group_max;
                    total += group_max;
                    max_delay = max_delay.max(group_max);
                }
                RealizationPlan {
                    soai,
                    n_memories: n_groups,
                    n_delays,
                    io_num: (0..n_groups).collect(),
                    states_ndx,
                    feedback: Vec::new(),
                    total_delays: total,
                    max_delay,
                }
            }
            Some(fb) => {
                let mut n_memories = 0;
                let mut n_delays = Vec::new();
                let mut io_num = Vec::new();
                let mut fb_polys = Vec::new();
                let mut total = 0;
                for g in 0..n_groups {
                    let group_start = n_memories;
                    for other in 0..group_len {
                        let (i, o) = if soai { (other, g) } else { (g, other) };
                        let cell = maio(i, o);
                        let ff_mem = max_bit_position(generators[cell]);
                        // Bit 0 always represents the current bit; it never
                        // contributes to the feedback polynomial proper.
                        let fb_poly = fb[cell] & !1;
                        let fb_mem = max_bit_position(fb_poly);

                        let found = (group_start..n_memories)
                            .find(|&l| fb_polys[l] == fb_poly);
                        let l = match found {
                            None => {
                                fb_polys.push(fb_poly);
                                n_delays.push(ff_mem.max(fb_mem));
                                io_num.push(g);
                                total += n_delays[n_memories];
                                n_memories += 1;
                                n_memories - 1
                            }
                            Some(l) => {
                                // Shared memory; a longer feed-forward
                                // generator may still grow it.
                                if n_delays[l] < ff_mem {
                                    total += ff_mem - n_delays[l];
                                    n_delays[l] = ff_mem;
                                }
                                l
                            }
                        };
                        states_ndx[cell] = l;
                    }
                }
                let max_delay = n_delays.iter().copied().max().unwrap_or(0);
                RealizationPlan {
                    soai,
                    n_memories,
                    n_delays,
                    io_num,
                    states_ndx,
                    feedback: fb_polys,
                    total_delays: total,
                    max_delay,
                }
            }
        }
    }

    /// Unpack a state into per-memory registers. Each memory keeps its
    /// delay bits in positions `1..=n_delays`; bit 0 is the injection slot.
    fn demux_state(&self, mut state: u32, memories: &mut [u32]) {
        for m in 0..self.n_memories {
            memories[m] = (state << 1) & self.mem_masks[m];
            state >>= self.n_delays[m];
        }
    }

    /// Pack per-memory registers back into a state value.
    fn mux_state(&self, memories: &[u32]) -> u32 {
        let mut state = 0u32;
        let mut shift = 0;
        for m in 0..self.n_memories {
            state |= (memories[m] >> 1) << shift;
            shift += self.n_delays[m];
        }
        state
    }

    /// Simulate one symbol step under the chosen realization.
    fn encode_single(&self, state: u32, input_combo: u32) -> (u32, u32) {
        let mut memories = [0u32; MAX_STREAMS * MAX_STREAMS];
        let memories = &mut memories[..self.n_memories];
        self.demux_state(state, memories);
        let maio = |i: usize, o: usize| o * self.n_inputs + i;
        let mut out_bits = 0u32;

        match self.realization {
            Realization::Soai | Realization::SoaiFeedback => {
                // Shift down one step, then XOR each active input's
                // generator into its output's shared memory.
                for mem in memories.iter_mut() {
                    *mem >>= 1;
                }
                for i in 0..self.n_inputs {
                    if (input_combo >> i) & 1 == 1 {
                        for o in 0..self.n_outputs {
                            memories[self.states_ndx[maio(i, o)]] ^= self.generators[maio(i, o)];
                        }
                    }
                }
                for m in 0..self.n_memories {
                    out_bits ^= (memories[m] & 1) << self.io_num[m];
                }
                if self.realization == Realization::SoaiFeedback {
                    // Feed the finished output bits back into the memories.
                    for m in 0..self.n_memories {
                        if (out_bits >> self.io_num[m]) & 1 == 1 {
                            memories[m] ^= self.feedback[m];
                        }
                    }
                }
            }
            Realization::Siao | Realization::SiaoFeedback => {
                if self.realization == Realization::SiaoFeedback {
                    for m in 0..self.n_memories {
                        let fb_bit = parity(memories[m] & self.feedback[m]);
                        memories[m] |= fb_bit;
                        memories[m] ^= (input_combo >> self.io_num[m]) & 1;
                    }
                } else {
                    for m in 0..self.n_memories {
                        memories[m] |= (input_combo >> self.io_num[m]) & 1;
                    }
                }
                for o in 0..self.n_outputs {
                    let mut acc = 0u32;
                    for i in 0..self.n_inputs {
                        acc ^= memories[self.states_ndx[maio(i, o)]] & self.generators[maio(i, o)];
                    }
                    out_bits |= parity(acc) << o;
                }
                for m in 0..self.n_memories {
                    memories[m] = (memories[m] << 1) & self.mem_masks[m];
                }
            }
        }

        (self.mux_state(memories), out_bits)
    }

    /// Fill the dense transition table by simulating every
    /// `(state, input-combination)` pair once. This is the dominant
    /// construction cost, `O(n_states * n_input_combinations)`.
    fn build_table(&mut self) {
        let entries = self.n_states * self.n_input_combinations;
        self.next_state = vec![0; entries];
        self.outputs = vec![0; entries];
        for state in 0..self.n_states {
            for combo in 0..self.n_input_combinations {
                let (next, out) = self.encode_single(state as u32, combo as u32);
                let idx = state * self.n_input_combinations + combo;
                self.next_state[idx] = next;
                self.outputs[idx] = out;
            }
        }
    }

    /// Per state, the input sequence (length `total_delays`) that drives
    /// the encoder to the configured end state. Built backwards from the
    /// end state so encode time never searches.
    fn build_termination_table(&mut self) -> Result<(), VsbError> {
        let depth = self.total_delays;
        // can_reach[j][s]: state s reaches the end state in exactly j steps.
        let mut can_reach = vec![vec![false; self.n_states]; depth + 1];
        can_reach[0][self.end_state as usize] = true;
        for j in 1..=depth {
            for s in 0..self.n_states {
                for combo in 0..self.n_input_combinations {
                    let next = self.next_state[s * self.n_input_combinations + combo] as usize;
                    if can_reach[j - 1][next] {
                        can_reach[j][s] = true;
                        break;
                    }
                }
            }
        }

        self.term_inputs = vec![0; self.n_states * depth.max(1)];
        for s0 in 0..self.n_states {
            if depth > 0 && !can_reach[depth][s0] {
                return Err(VsbError::Termination(s0 as u32));
            }
            let mut s = s0;
            for step in 0..depth {
                let remaining = depth - step - 1;
                let combo = (0..self.n_input_combinations)
                    .find(|&c| {
                        can_reach[remaining]
                            [self.next_state[s * self.n_input_combinations + c] as usize]
                    })
                    .ok_or(VsbError::Termination(s0 as u32))?;
                self.term_inputs[s0 * depth + step] = combo as u32;
                s = self.next_state[s * self.n_input_combinations + combo] as usize;
            }
        }
        Ok(())
    }

    /// One trellis step: `(state, input-combination) → (next state,
    /// packed output bits)`. Pure table read.
    #[inline]
    pub fn encode_lookup(&self, state: u32, input_combo: u32) -> (u32, u32) {
        debug_assert!((state as usize) < self.n_states);
        debug_assert!((input_combo as usize) < self.n_input_combinations);
        let idx = state as usize * self.n_input_combinations + input_combo as usize;
        (self.next_state[idx], self.outputs[idx])
    }

    /// Input combination to feed at termination `step` (0-based) when the
    /// block ended in `state`.
    ///
    /// # Panics
    ///
    /// Panics if the code was built without termination.
    pub fn termination_inputs(&self, state: u32, step: usize) -> u32 {
        assert!(self.do_termination, "code was built without termination");
        self.term_inputs[state as usize * self.total_delays + step]
    }

    /// Full termination input sequence for `state`.
    pub fn termination_sequence(&self, state: u32) -> &[u32] {
        assert!(self.do_termination, "code was built without termination");
        let base = state as usize * self.total_delays;
        &self.term_inputs[base..base + self.total_delays]
    }

    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    pub fn block_length_bits(&self) -> usize {
        self.block_length_bits
    }

    pub fn do_streaming(&self) -> bool {
        self.do_streaming
    }

    pub fn do_termination(&self) -> bool {
        self.do_termination
    }

    pub fn do_feedback(&self) -> bool {
        self.do_feedback
    }

    pub fn realization(&self) -> Realization {
        self.realization
    }

    /// Largest single-encoder delay length.
    pub fn max_delay(&self) -> usize {
        self.max_delay
    }

    /// Total delay bits across all memories; the state is this wide.
    pub fn total_delays(&self) -> usize {
        self.total_delays
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    pub fn n_input_combinations(&self) -> usize {
        self.n_input_combinations
    }

    pub fn end_state(&self) -> u32 {
        self.end_state
    }

    /// Non-fatal findings recorded during construction.
    pub fn warnings(&self) -> &[TrellisWarning] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k3_streaming() -> TrellisCode {
        TrellisCode::new(&CodeGeneratorSpec::streaming(1, 2, vec![0b111, 0b101])).unwrap()
    }

    #[test]
    fn test_max_bit_position() {
        assert_eq!(max_bit_position(0), 0);
        assert_eq!(max_bit_position(1), 0);
        assert_eq!(max_bit_position(0b100), 2);
        assert_eq!(max_bit_position(0b111), 2);
        assert_eq!(max_bit_position(0x80), 7);
    }

    #[test]
    fn test_rate_half_picks_siao() {
        // One input: sharing a single memory across both outputs (2 delays)
        // beats one memory per output (4 delays).
        let code = k3_streaming();
        assert_eq!(code.realization(), Realization::Siao);
        assert_eq!(code.total_delays(), 2);
        assert_eq!(code.max_delay(), 2);
        assert_eq!(code.n_states(), 4);
        assert_eq!(code.n_input_combinations(), 2);
    }

    #[test]
    fn test_realization_tie_favors_soai() {
        // 1 input, 1 output: both realizations cost the same.
        let code = TrellisCode::new(&CodeGeneratorSpec::streaming(1, 1, vec![0b111])).unwrap();
        assert_eq!(code.realization(), Realization::Soai);
        assert_eq!(code.total_delays(), 2);
    }

    #[test]
    fn test_two_inputs_one_output_picks_soai() {
        let code =
            TrellisCode::new(&CodeGeneratorSpec::streaming(2, 1, vec![0b111, 0b101])).unwrap();
        assert_eq!(code.realization(), Realization::Soai);
        assert_eq!(code.total_delays(), 2);
    }

    #[test]
    fn test_total_delays_not_above_either_candidate() {
        for spec in [
            CodeGeneratorSpec::streaming(1, 2, vec![0b111, 0b101]),
            CodeGeneratorSpec::streaming(2, 2, vec![0b11, 0b101, 0b1, 0b111]),
            CodeGeneratorSpec::streaming(3, 1, vec![0b1011, 0b11, 0b111]),
        ] {
            let code = TrellisCode::new(&spec).unwrap();
            let soai = TrellisCode::plan(true, spec.n_inputs, spec.n_outputs, &spec.generators, None);
            let siao =
                TrellisCode::plan(false, spec.n_inputs, spec.n_outputs, &spec.generators, None);
            assert!(code.total_delays() <= soai.total_delays);
            assert!(code.total_delays() <= siao.total_delays);
        }
    }

    #[test]
    fn test_known_sequence_k3() {
        // Generators 1+D+D² and 1+D²: output o1 = x[t]^x[t-1]^x[t-2],
        // o2 = x[t]^x[t-2]. Input 1,0,1,1 from state 0 gives the pairs
        // (1,1) (1,0) (0,0) (0,1), derived by direct convolution.
        let code = k3_streaming();
        let mut state = 0u32;
        let mut produced = Vec::new();
        for bit in [1u32, 0, 1, 1] {
            let (next, out) = code.encode_lookup(state, bit);
            produced.push(out);
            state = next;
        }
        assert_eq!(produced, vec![0b11, 0b01, 0b00, 0b10]);
    }

    #[test]
    fn test_lookup_is_pure_and_table_dense() {
        let code = k3_streaming();
        assert_eq!(code.next_state.len(), code.n_states() * code.n_input_combinations());
        for state in 0..code.n_states() as u32 {
            for combo in 0..code.n_input_combinations() as u32 {
                let a = code.encode_lookup(state, combo);
                let b = code.encode_lookup(state, combo);
                assert_eq!(a, b);
                assert!((a.0 as usize) < code.n_states());
            }
        }
    }

    #[test]
    fn test_all_states_reachable() {
        let code = k3_streaming();
        let mut seen = vec![false; code.n_states()];
        let mut stack = vec![0u32];
        seen[0] = true;
        while let Some(s) = stack.pop() {
            for combo in 0..code.n_input_combinations() as u32 {
                let (next, _) = code.encode_lookup(s, combo);
                if !seen[next as usize] {
                    seen[next as usize] = true;
                    stack.push(next);
                }
            }
        }
        assert!(seen.iter().all(|&r| r));
    }

    #[test]
    fn test_termination_reaches_end_state_from_everywhere() {
        let spec = CodeGeneratorSpec::block(1, 2, vec![0b111, 0b101], 16);
        let code = TrellisCode::new(&spec).unwrap();
        assert!(code.do_termination());
        for s0 in 0..code.n_states() as u32 {
            let mut s = s0;
            for step in 0..code.total_delays() {
                let combo = code.termination_inputs(s0, step);
                let (next, _) = code.encode_lookup(s, combo);
                s = next;
            }
            assert_eq!(s, code.end_state(), "state {} failed to terminate", s0);
        }
    }

    #[test]
    fn test_termination_to_nonzero_end_state() {
        let spec = CodeGeneratorSpec {
            end_state: 2,
            ..CodeGeneratorSpec::block(1, 2, vec![0b111, 0b101], 16)
        };
        let code = TrellisCode::new(&spec).unwrap();
        assert_eq!(code.end_state(), 2);
        for s0 in 0..code.n_states() as u32 {
            let mut s = s0;
            for combo in code.termination_sequence(s0) {
                s = code.encode_lookup(s, *combo).0;
            }
            assert_eq!(s, 2);
        }
    }

    #[test]
    fn test_feedback_coalesces_identical_polynomials() {
        // Systematic rate-1/2 code with the same feedback on both cells:
        // one physical memory serves both outputs under SIAO.
        let spec = CodeGeneratorSpec {
            feedback: Some(vec![0b111, 0b111]),
            ..CodeGeneratorSpec::streaming(1, 2, vec![0b1, 0b101])
        };
        let code = TrellisCode::new(&spec).unwrap();
        assert!(code.do_feedback());
        assert_eq!(code.realization(), Realization::SiaoFeedback);
        assert_eq!(code.n_memories, 1);
        assert_eq!(code.total_delays(), 2);
    }

    #[test]
    fn test_feedback_changes_the_code() {
        let ff = k3_streaming();
        let spec = CodeGeneratorSpec {
            feedback: Some(vec![0b111, 0b111]),
            ..CodeGeneratorSpec::streaming(1, 2, vec![0b111, 0b101])
        };
        let fb = TrellisCode::new(&spec).unwrap();
        assert_ne!(ff.outputs, fb.outputs);
    }

    #[test]
    fn test_noop_feedback_silently_disabled() {
        let spec = CodeGeneratorSpec {
            feedback: Some(vec![1, 1]),
            ..CodeGeneratorSpec::streaming(1, 2, vec![0b111, 0b101])
        };
        let code = TrellisCode::new(&spec).unwrap();
        assert!(!code.do_feedback());
        assert!(code.warnings().contains(&TrellisWarning::NoopFeedback));
        // Identical tables to the plain feed-forward construction.
        let plain = k3_streaming();
        assert_eq!(code.next_state, plain.next_state);
        assert_eq!(code.outputs, plain.outputs);
    }

    #[test]
    fn test_zero_output_column_warns_but_builds() {
        let code =
            TrellisCode::new(&CodeGeneratorSpec::streaming(1, 2, vec![0b111, 0])).unwrap();
        assert!(code.warnings().contains(&TrellisWarning::ZeroOutputColumn(1)));
        for state in 0..code.n_states() as u32 {
            for combo in 0..code.n_input_combinations() as u32 {
                let (_, out) = code.encode_lookup(state, combo);
                assert_eq!(out >> 1, 0, "dead output produced a bit");
            }
        }
    }

    #[test]
    fn test_unused_input_warns_but_builds() {
        let code =
            TrellisCode::new(&CodeGeneratorSpec::streaming(2, 1, vec![0b111, 0])).unwrap();
        assert!(code.warnings().contains(&TrellisWarning::UnusedInput(1)));
    }

    #[test]
    fn test_end_state_masked_with_warning() {
        let spec = CodeGeneratorSpec {
            end_state: 0x15,
            ..CodeGeneratorSpec::block(1, 2, vec![0b111, 0b101], 16)
        };
        let code = TrellisCode::new(&spec).unwrap();
        assert_eq!(code.end_state(), 0x15 & 0b11);
        assert!(code
            .warnings()
            .iter()
            .any(|w| matches!(w, TrellisWarning::EndStateMasked { given: 0x15, .. })));
    }

    #[test]
    fn test_invalid_dimensions_rejected() {
        assert!(matches!(
            TrellisCode::new(&CodeGeneratorSpec::streaming(0, 2, vec![])),
            Err(VsbError::InvalidStreamCount(0, _))
        ));
        assert!(matches!(
            TrellisCode::new(&CodeGeneratorSpec::streaming(1, 11, vec![0; 11])),
            Err(VsbError::InvalidStreamCount(11, _))
        ));
        assert!(matches!(
            TrellisCode::new(&CodeGeneratorSpec::streaming(2, 2, vec![0b111])),
            Err(VsbError::GeneratorSizeMismatch { got: 1, expected: 4 })
        ));
    }

    #[test]
    fn test_undersized_block_rejected() {
        let err = TrellisCode::new(&CodeGeneratorSpec::block(1, 2, vec![0b111, 0b101], 1));
        assert!(matches!(
            err,
            Err(VsbError::BlockTooShort { block: 1, max_delay: 2 })
        ));
    }

    #[test]
    fn test_streaming_never_terminates() {
        let spec = CodeGeneratorSpec {
            do_termination: true,
            ..CodeGeneratorSpec::streaming(1, 2, vec![0b111, 0b101])
        };
        let code = TrellisCode::new(&spec).unwrap();
        assert!(code.do_streaming());
        assert!(!code.do_termination());
    }

    #[test]
    fn test_two_input_code_table_shape() {
        let code =
            TrellisCode::new(&CodeGeneratorSpec::streaming(2, 2, vec![0b11, 0b101, 0b1, 0b111]))
                .unwrap();
        assert_eq!(code.n_input_combinations(), 4);
        assert_eq!(
            code.next_state.len(),
            code.n_states() * code.n_input_combinations()
        );
        // Zero input from the zero state stays at zero with zero output.
        assert_eq!(code.encode_lookup(0, 0), (0, 0));
    }
}
