//! The `twopass_asr` core library.
//!
//! This crate provides the streaming search pipeline used by a two-pass
//! speech decoder: a tree-structured first pass records word-end hypotheses
//! ("backpointers") frame by frame, and a flat-lexicon second pass rescores
//! them while decoding is still in progress. The hand-off between the two
//! passes is the [`search::ArcBuffer`], a lock-protected producer/consumer
//! queue of committed hypothesis arcs keyed by start frame.

pub mod config;
pub mod error;
pub mod search;
pub mod types;

pub use config::SearchConfig;
pub use error::{Result, SearchError};
pub use search::{
    ArcBuffer, ArcBufferReader, BpTable, DecoderPipeline, GArray, HypArc, SearchConsumer,
    SearchProducer,
};
pub use types::{BpIdx, WordId};
