//! Utility functions shared across the crate
pub mod device;
pub mod io;
pub mod math;
pub mod sampling;

// Re-export commonly used utilities
pub use device::{Device, ExecutionContext};
pub use io::IoError;
pub use math::{apply_dropout, cross_entropy, gelu, softmax_1d, softmax_2d, softmax_4d, MathError};
pub use sampling::{Sampler, SamplingError};
