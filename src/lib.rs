//! # 8-VSB Physical Layer Library
//!
//! This crate provides the physical-layer synchronization and channel-coding
//! core of an ATSC-style 8-VSB broadcast chain, in software.
//!
//! ## Overview
//!
//! 8-VSB carries MPEG transport packets over 832-symbol data segments, 312
//! data segments plus one field sync segment per field. This library
//! implements the blocks that sit between raw baseband samples and framed
//! segment data:
//!
//! - **Symbol Timing Recovery**: interpolate an oversampled stream down to
//!   one symbol per item, locked to the repeating 4-symbol segment sync
//! - **Field Sync Detection**: PN511/PN63 reference sequences and a sliding
//!   correlator that classifies field sync segments
//! - **Field Sync Demux**: re-frame the tagged symbol stream into aligned,
//!   numbered data segments
//! - **Data Randomizer**: the A/53 16-bit LFSR whitening applied to
//!   transport packets
//! - **Trellis Coding**: a generic convolutional encoder core with
//!   feedforward/feedback generator matrices, dual realizations, and block
//!   termination
//!
//! ## Signal Flow
//!
//! ```text
//! TX: TS packets → Randomizer → ... → ConvolutionalEncoder → symbols
//! RX: samples → SymbolTimingRecovery → FieldSyncChecker → FieldSyncDemux → segments
//! ```
//!
//! ## Pull contract
//!
//! The stream-transform blocks (`SymbolTimingRecovery`, `FieldSyncChecker`,
//! `FieldSyncDemux`) follow a host-driven pull model: `forecast(n)` reports
//! how much input is needed for `n` outputs, and `work(..)` returns a
//! [`types::WorkResult`] with the counts actually produced and consumed.
//! Producing less than requested signals input starvation, which is normal
//! flow control and never an error.
//!
//! ## Example
//!
//! ```rust
//! use vsb_phy::{Randomizer, SymbolTimingRecovery, FieldSyncDemux};
//! use vsb_phy::types::SymbolTag;
//!
//! // Whiten one MPEG transport packet.
//! let mut randomizer = Randomizer::new();
//! let mut packet = [0u8; 188];
//! packet[0] = 0x47;
//! let payload = randomizer.whiten(&packet);
//! assert_eq!(payload.len(), 187);
//!
//! // Recover symbols from an oversampled stream.
//! let mut timing = SymbolTimingRecovery::new(2.0);
//! let input = vec![0.0; timing.forecast(100)];
//! let mut symbols = vec![0.0; 100];
//! let mut tags = vec![SymbolTag::invalid(); 100];
//! let r = timing.work(&input, &mut symbols, &mut tags);
//! assert_eq!(r.produced, 100);
//! ```

pub mod conv_encoder;
pub mod field_sync;
pub mod field_sync_demux;
pub mod randomizer;
pub mod symbol_timing;
pub mod trellis;
pub mod types;

pub use conv_encoder::ConvolutionalEncoder;
pub use field_sync::{FieldSyncChecker, SlidingCorrelator};
pub use field_sync_demux::{DemuxState, FieldSyncDemux};
pub use randomizer::Randomizer;
pub use symbol_timing::SymbolTimingRecovery;
pub use trellis::{CodeGeneratorSpec, Realization, TrellisCode};
pub use types::{DataSegment, Sample, SymbolTag, SyncMark, VsbError, WorkResult};
