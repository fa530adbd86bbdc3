//! Field Sync Demux — tagged symbol stream to aligned data segments
//!
//! Consumes the `(Sample, SymbolTag)` stream produced by timing recovery
//! (and classified by the field sync checker) and re-frames it into whole
//! 832-symbol [`DataSegment`]s, each labelled with its field parity and
//! segment number. Field sync segments set the parity and reset the
//! segment counter but are not emitted; only data segments come out.
//!
//! The demux is an explicit two-state machine. In `Searching` it scans
//! for any sync-run start and consumes everything before it; in `Locked`
//! it walks the stream in 832-symbol strides, verifying that each stride
//! opens with a sync tag. A stride that does not drops the demux back to
//! `Searching` — a partial result, not an error.
//!
//! ## Example
//!
//! ```rust
//! use vsb_phy::field_sync_demux::{DemuxState, FieldSyncDemux};
//!
//! let demux = FieldSyncDemux::new();
//! assert_eq!(demux.state(), DemuxState::Searching);
//! assert_eq!(demux.forecast(1), 832 + 2 * 832 - 1);
//! ```

use crate::types::{
    DataSegment, Sample, SymbolTag, SyncMark, WorkResult, SEGMENTS_PER_FIELD, SEGMENT_LENGTH,
};

/// Demux lock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxState {
    /// Scanning for a sync-run start.
    Searching,
    /// Walking the stream in 832-symbol strides.
    Locked,
}

/// Segment-aligning demultiplexer.
#[derive(Debug, Clone)]
pub struct FieldSyncDemux {
    state: DemuxState,
    /// Field parity for segments currently being emitted. Starts true:
    /// the first field sync encountered sets the real parity, and a
    /// relock on a bare segment sync keeps whatever was last known.
    in_field2: bool,
    /// Number of the next data segment to emit, 0..311.
    segment_number: u16,
    /// Absolute input position of the most recent lock loss.
    lost_index: u64,
    /// Absolute input position counter, for diagnostics.
    items_seen: u64,
}

impl Default for FieldSyncDemux {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldSyncDemux {
    pub fn new() -> Self {
        Self {
            state: DemuxState::Searching,
            in_field2: true,
            segment_number: 0,
            lost_index: 0,
            items_seen: 0,
        }
    }

    /// Current lock state.
    pub fn state(&self) -> DemuxState {
        self.state
    }

    /// Field parity of the next segment to emit, as 1 or 2.
    pub fn field_flag(&self) -> u8 {
        if self.in_field2 {
            2
        } else {
            1
        }
    }

    /// Number the next emitted data segment will carry.
    pub fn segment_number(&self) -> u16 {
        self.segment_number
    }

    /// Input items required to emit `noutput` segments: the segments
    /// themselves plus enough slack to cover an interleaved field sync
    /// segment and a worst-case alignment offset.
    pub fn forecast(&self, noutput: usize) -> usize {
        noutput * SEGMENT_LENGTH + 2 * SEGMENT_LENGTH - 1
    }

    /// Demux up to `noutput` whole data segments from the input, appending
    /// them to `out`. Returns the number of segments appended and the
    /// number of input items consumed; input beyond the requested output
    /// is left unconsumed. Partial progress (including zero output) is
    /// normal; the host re-presents unconsumed input with more appended.
    ///
    /// # Panics
    ///
    /// Panics if `samples` and `tags` differ in length.
    pub fn work(
        &mut self,
        samples: &[Sample],
        tags: &[SymbolTag],
        noutput: usize,
        out: &mut Vec<DataSegment>,
    ) -> WorkResult {
        assert_eq!(
            samples.len(),
            tags.len(),
            "sample and tag streams must pair 1:1"
        );

        let mut si = 0usize;
        let mut produced = 0usize;
        loop {
            match self.state {
                DemuxState::Searching => {
                    match tags[si..].iter().position(|t| t.is_sync_start()) {
                        None => {
                            // Nothing to align to; discard it all.
                            si = tags.len();
                            break;
                        }
                        Some(offset) => {
                            let at = self.items_seen + (si + offset) as u64;
                            log::info!(
                                "field sync demux: locked at item {} ({} items after loss)",
                                at,
                                at - self.lost_index
                            );
                            match tags[si + offset].sync {
                                SyncMark::FieldSync1 => {
                                    self.in_field2 = false;
                                    self.segment_number = 0;
                                }
                                SyncMark::FieldSync2 => {
                                    self.in_field2 = true;
                                    self.segment_number = 0;
                                }
                                // A bare segment sync realigns without
                                // touching the field parity or segment
                                // counter.
                                SyncMark::Segment | SyncMark::None => {}
                            }
                            self.state = DemuxState::Locked;
                            if offset > 0 {
                                // Consume up to the marker and let the
                                // next call start segment-aligned.
                                si += offset;
                                break;
                            }
                        }
                    }
                }
                DemuxState::Locked => {
                    if produced == noutput {
                        break;
                    }
                    if samples.len() - si < SEGMENT_LENGTH {
                        break;
                    }
                    let tag = tags[si];
                    if !tag.is_sync_start() {
                        self.lost_index = self.items_seen + si as u64;
                        log::warn!(
                            "field sync demux: lost sync at item {}, last segment {} field {}",
                            self.lost_index,
                            self.segment_number,
                            self.field_flag()
                        );
                        self.state = DemuxState::Searching;
                        break;
                    }
                    if tag.sync.is_field_sync() {
                        self.in_field2 = tag.sync == SyncMark::FieldSync2;
                        self.segment_number = 0;
                        si += SEGMENT_LENGTH;
                        continue;
                    }
                    if self.segment_number >= SEGMENTS_PER_FIELD {
                        log::warn!(
                            "field sync demux: segment number {} out of range, wrapping to 0",
                            self.segment_number
                        );
                        self.segment_number = 0;
                    }
                    out.push(DataSegment {
                        field2: self.in_field2,
                        segment_number: self.segment_number,
                        data: samples[si..si + SEGMENT_LENGTH].to_vec(),
                    });
                    produced += 1;
                    self.segment_number += 1;
                    si += SEGMENT_LENGTH;
                }
            }
        }
        self.items_seen += si as u64;
        WorkResult {
            produced,
            consumed: si,
        }
    }

    /// Drop the lock and all framing state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
