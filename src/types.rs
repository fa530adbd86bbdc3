//! Core types for the 8-VSB physical layer
//!
//! Shared data model for the synchronization and channel-coding chain:
//! real-valued samples, the per-symbol tag channel, fixed-length data
//! segments, the pull-contract work result, and the crate error type.
//!
//! ## The tag channel
//!
//! Symbol timing recovery emits one [`SymbolTag`] per output symbol, even
//! while unlocked. The tag carries the lock flag, the symbol's position
//! within its 832-symbol segment, and a [`SyncMark`] set on the first
//! symbol of a synchronization run. Downstream, the field sync demux keys
//! entirely off this parallel metadata stream.

use serde::{Deserialize, Serialize};

/// A real-valued baseband sample.
pub type Sample = f64;

/// Symbols per data segment (4 segment-sync symbols + 828 payload symbols).
pub const SEGMENT_LENGTH: usize = 832;

/// Data segments per field, not counting the field sync segment.
pub const SEGMENTS_PER_FIELD: u16 = 312;

/// Length of the segment sync run at the head of every segment.
pub const SEG_SYNC_LENGTH: usize = 4;

/// 8-VSB symbol rate in Hz: 4.5 MHz / 286 * 684.
pub const ATSC_SYMBOL_RATE: f64 = 4.5e6 / 286.0 * 684.0;

/// Extra input samples the timing-recovery forecast requests beyond
/// `ceil(n * ratio)`, covering interpolator lookahead and lock convergence.
pub const LOOKAHEAD_MARGIN: usize = 1500;

/// Kind of synchronization run starting at a tagged symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncMark {
    /// Not the start of a sync run.
    #[default]
    None,
    /// Start of an ordinary 4-symbol segment sync.
    Segment,
    /// Start of a field sync segment, field 1.
    FieldSync1,
    /// Start of a field sync segment, field 2.
    FieldSync2,
}

impl SyncMark {
    /// True for any field sync variant.
    pub fn is_field_sync(self) -> bool {
        matches!(self, SyncMark::FieldSync1 | SyncMark::FieldSync2)
    }
}

/// Per-symbol metadata, emitted 1:1 with recovered symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SymbolTag {
    /// Segment sync lock flag. Tags are emitted even while unlocked.
    pub valid: bool,
    /// Position within the current segment, 0..831.
    pub symbol_index: u16,
    /// Set on the first symbol of a sync run.
    pub sync: SyncMark,
}

impl SymbolTag {
    /// An invalid (unlocked) tag.
    pub fn invalid() -> Self {
        Self::default()
    }

    /// Tag for a locked symbol at `symbol_index`, marked as a sync-run
    /// start when the index is 0.
    pub fn locked(symbol_index: u16, sync: SyncMark) -> Self {
        Self {
            valid: true,
            symbol_index,
            sync,
        }
    }

    /// True when this tag marks the first symbol of a segment or field
    /// sync run.
    pub fn is_sync_start(&self) -> bool {
        self.valid && self.symbol_index == 0 && self.sync != SyncMark::None
    }
}

/// One demultiplexed 832-symbol data segment with its frame position.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    /// True if this segment belongs to field 2 of the frame.
    pub field2: bool,
    /// Segment number within the field, 0..311.
    pub segment_number: u16,
    /// Payload symbols, always `SEGMENT_LENGTH` long.
    pub data: Vec<Sample>,
}

impl DataSegment {
    /// Field flag as transmitted: 1 or 2.
    pub fn field_flag(&self) -> u8 {
        if self.field2 {
            2
        } else {
            1
        }
    }
}

/// Result of one `work` call under the host pull contract.
///
/// `produced < requested` (including 0) signals transient input starvation;
/// the host appends more input and re-invokes. It is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkResult {
    /// Output items produced, at most the requested capacity.
    pub produced: usize,
    /// Input items consumed; the host commits these before the next call.
    pub consumed: usize,
}

/// Errors from construction-time validation.
///
/// Streaming components never return these: starvation and sync loss are
/// expressed through [`WorkResult`] and the demux state machine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VsbError {
    #[error("stream count {0} out of range 1..={1}")]
    InvalidStreamCount(usize, usize),

    #[error("generator matrix has {got} entries, expected n_inputs * n_outputs = {expected}")]
    GeneratorSizeMismatch { got: usize, expected: usize },

    #[error("block length {block} bits is shorter than the code memory depth {max_delay}")]
    BlockTooShort { block: usize, max_delay: usize },

    #[error("block length {0} bits exceeds the maximum {1}")]
    BlockTooLong(usize, usize),

    #[error("code needs {0} delay bits; the dense table supports at most 24")]
    StateSpaceTooLarge(usize),

    #[error("state {0} cannot be driven to the configured end state")]
    Termination(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_rate() {
        // ~10.76 Msym/s
        assert!((ATSC_SYMBOL_RATE - 10.762_237e6).abs() < 1e3);
    }

    #[test]
    fn test_sync_start_requires_index_zero() {
        let t = SymbolTag {
            valid: true,
            symbol_index: 5,
            sync: SyncMark::Segment,
        };
        assert!(!t.is_sync_start());
        let t = SymbolTag::locked(0, SyncMark::Segment);
        assert!(t.is_sync_start());
        assert!(!SymbolTag::invalid().is_sync_start());
    }

    #[test]
    fn test_field_flag() {
        let seg = DataSegment {
            field2: false,
            segment_number: 3,
            data: vec![0.0; SEGMENT_LENGTH],
        };
        assert_eq!(seg.field_flag(), 1);
        let seg = DataSegment { field2: true, ..seg };
        assert_eq!(seg.field_flag(), 2);
    }
}
