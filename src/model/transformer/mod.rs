//! Transformer blocks
mod block;
pub use block::TransformerBlock;
