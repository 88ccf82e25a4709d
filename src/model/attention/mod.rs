//! Causal self-attention
mod mask;
pub use mask::CausalMask;

mod multihead;
pub use multihead::{AttentionConfig, CausalSelfAttention};
