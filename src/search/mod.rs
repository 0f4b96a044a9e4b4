//! Streaming search pipeline.
//!
//! This module contains the data structures passed between the two search
//! passes: the growable array they are both built on, the backpointer table
//! written by the first pass, the arc buffer that streams retired
//! hypotheses to the second pass, and the pipeline driver that wires them
//! together.

mod arc_buffer;
mod bptbl;
mod driver;
mod garray;

pub use arc_buffer::{ArcBuffer, ArcBufferReader, HypArc};
pub use bptbl::{BpEntry, BpTable};
pub use driver::{DecoderPipeline, SearchConsumer, SearchProducer};
pub use garray::GArray;
