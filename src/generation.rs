//! Autoregressive text generation.

use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{LanguageModel, ModelError};
use crate::tokenizer::{PieceTokenizer, TokenizerError, Vocab};
use crate::utils::{ExecutionContext, Sampler, SamplingError};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),

    #[error("Sampling error: {0}")]
    Sampling(#[from] SamplingError),
}

/// Decoding parameters for one request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub temperature: f32,
    pub top_k: usize,
    pub top_p: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { max_new_tokens: 200, temperature: 0.9, top_k: 50, top_p: 0.9 }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), SamplingError> {
        self.sampler().map(|_| ())
    }

    pub fn sampler(&self) -> Result<Sampler, SamplingError> {
        Sampler::new(self.temperature, self.top_k, self.top_p)
    }
}

/// Anything that can score the next token of a context.
pub trait NextTokenPredictor: Send + Sync {
    /// Longest context a single prediction accepts
    fn max_seq_len(&self) -> usize;

    /// Logits over the vocabulary for the token after `context`
    fn next_token_logits(&self, context: &[usize]) -> Result<Array1<f32>, ModelError>;
}

impl NextTokenPredictor for LanguageModel {
    fn max_seq_len(&self) -> usize {
        LanguageModel::max_seq_len(self)
    }

    fn next_token_logits(&self, context: &[usize]) -> Result<Array1<f32>, ModelError> {
        LanguageModel::next_token_logits(self, context)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Prompting,
    Generating,
    Done,
}

#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Cleaned text of the whole context, prompt included
    pub text: String,
    /// Full context: prompt ids followed by the generated ids
    pub ids: Vec<usize>,
    pub prompt_len: usize,
    pub stopped_at_eos: bool,
}

impl GenerationOutput {
    pub fn new_tokens(&self) -> &[usize] {
        &self.ids[self.prompt_len..]
    }
}

/// Generates a continuation of `prompt` with a fresh RNG from `ctx`.
pub fn generate<M: NextTokenPredictor + ?Sized>(
    model: &M,
    vocab: &Vocab,
    tokenizer: &dyn PieceTokenizer,
    prompt: &str,
    config: &GenerationConfig,
    ctx: &ExecutionContext,
) -> Result<String, GenerationError> {
    let mut rng = ctx.rng();
    generate_with_rng(model, vocab, tokenizer, prompt, config, &mut rng).map(|output| output.text)
}

/// Runs the prompt/generate loop.
///
/// Every prediction sees at most the trailing `max_seq_len` ids of the
/// context. The loop ends on `<EOS>` or once `max_new_tokens` ids have been
/// appended. Nothing outside the local context is mutated.
pub fn generate_with_rng<M, R>(
    model: &M,
    vocab: &Vocab,
    tokenizer: &dyn PieceTokenizer,
    prompt: &str,
    config: &GenerationConfig,
    rng: &mut R,
) -> Result<GenerationOutput, GenerationError>
where
    M: NextTokenPredictor + ?Sized,
    R: Rng + ?Sized,
{
    let sampler = config.sampler()?;
    let eos_id = vocab.eos_id();
    let window = model.max_seq_len();

    let mut state = GenerationState::Prompting;
    let mut context = Vec::new();
    let mut prompt_len = 0;
    let mut stopped_at_eos = false;

    loop {
        state = match state {
            GenerationState::Prompting => {
                let pieces = tokenizer.tokenize(prompt)?;
                context = vocab.encode(&pieces);
                if context.is_empty() {
                    context.push(vocab.bos_id());
                }
                prompt_len = context.len();
                log::debug!("prompt encoded to {} ids", prompt_len);
                GenerationState::Generating
            }
            GenerationState::Generating => {
                if context.len() - prompt_len >= config.max_new_tokens {
                    GenerationState::Done
                } else {
                    let start = context.len().saturating_sub(window);
                    let logits = model.next_token_logits(&context[start..])?;
                    let next_id = sampler.sample(logits.view(), rng)?;
                    context.push(next_id);
                    log::trace!("step {}: sampled id {}", context.len() - prompt_len, next_id);

                    if next_id == eos_id {
                        stopped_at_eos = true;
                        GenerationState::Done
                    } else {
                        GenerationState::Generating
                    }
                }
            }
            GenerationState::Done => break,
        };
    }

    let pieces = vocab.decode(&context);
    let text = clean_output(&tokenizer.detokenize(&pieces));
    log::debug!(
        "generated {} ids (eos: {})",
        context.len() - prompt_len,
        stopped_at_eos
    );

    Ok(GenerationOutput { text, ids: context, prompt_len, stopped_at_eos })
}

/// Strips control-token literals and renders `<NL>` as a line break.
pub fn clean_output(text: &str) -> String {
    text.replace("<BOS> #", "")
        .replace("<BOS>", "")
        .replace("<EOS>", "")
        .replace("<PAD>", "")
        .replace("<NL>", ":<br>")
        .replace("::", ":")
}
