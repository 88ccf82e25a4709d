//! Neural network layers

mod embedding;
mod ffn;
mod linear;
mod norm;

pub use embedding::Embedding;
pub use ffn::FeedForwardNetwork;
pub use linear::Linear;
pub use norm::LayerNorm;
