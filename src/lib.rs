pub mod checkpoint;
pub use checkpoint::{load_model, save_checkpoint, Checkpoint, CheckpointError};

pub mod config;
pub use config::AppConfig;

pub mod generation;
pub use generation::{generate, generate_with_rng, GenerationConfig, NextTokenPredictor};

pub mod model;
pub use model::{LanguageModel, ModelConfig};

pub mod serve;
pub use serve::{frame_prompt, ChatReply, ChatRequest, ChatService};

pub mod tokenizer;
pub use tokenizer::{PieceTokenizer, SentencePieceTokenizer, Vocab, WhitespaceTokenizer};

pub mod training;

pub mod utils;
pub use utils::{Device, ExecutionContext, Sampler};

pub mod error;
pub use error::CodethiumError;
