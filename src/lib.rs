//! Reading braille detector output as text, and scoring that text.
//!
//! [`Decoder`] groups symbol detections into lines and translates them through a
//! [`SymbolTable`]. [`Evaluator`] aligns predicted text against ground truth and
//! accumulates CER, WER and a confusion table into [`CorpusMetrics`].

mod align;
pub mod corpus;
pub mod decoder;
mod error;
pub mod labels;
mod metrics;
pub mod report;
mod result;
mod symbols;

pub use align::align;
pub use corpus::{CorpusLayout, GroundTruthOrder, LoadOptions, LoadedSample, SampleDetail};
pub use decoder::{group_lines, reading_order, DecodeOptions, Decoder, DecoderBuilder, LineCluster};
pub use error::{Error, Result};
pub use metrics::*;
pub use report::{Report, ReportOptions};
pub use result::*;
pub use symbols::{ClassNames, SymbolTable, UNKNOWN_SYMBOL};
