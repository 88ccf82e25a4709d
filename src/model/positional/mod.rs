//! Positional encoding
mod sinusoidal;
pub use sinusoidal::SinusoidalPositionalEncoding;
