//! Training data preparation

pub mod dataset;

pub use dataset::{build_token_stream, DatasetError, StreamDataset, Window};
