// Core modules implementing buffering, decoding seams, discovery, and error modeling.
pub mod block;
pub mod carry;
pub mod error;
pub mod preprocess;
pub mod reader;
pub mod registry;
pub mod tabular;
pub mod unit;
