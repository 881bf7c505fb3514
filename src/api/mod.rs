//! Purpose: Define the public Rust API boundary for chunkwise.
//! Exports: Reader types, unit shapes, decoders, registry, preprocessors, and errors.
//! Role: Public, additive-only surface; hides internal buffering modules.
//! Invariants: This module is the only public path to core primitives.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::block::{
    BLOCK_HEADER_LEN, BlockCodec, BlockHeader, ColumnarDecoder, decode_block, encode_block,
};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::preprocess::{
    LogLinePreprocessor, Passthrough, Preprocessed, Preprocessor, SideState, TS_INIT_KEY,
    parse_log_timestamp,
};
pub use crate::core::reader::{
    BlockParser, CsvOptions, Granularity, Output, Parse, Reader, ReaderKind, ReaderOptions,
    Shape, StreamEnd,
};
pub use crate::core::registry::{DiscoveryHook, EntitySet, Registry, discover};
pub use crate::core::tabular::{CsvDecoder, TabularDecoder};
pub use crate::core::unit::{Column, ColumnarBatch, Row, TabularBatch, Unit};
