use rand::Rng;
use thiserror::Error;

use crate::tokenizer::{PieceTokenizer, TokenizerError, Vocab};

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),
    #[error("Token stream of {len} ids is too short for windows of {max_len}")]
    TooShort { len: usize, max_len: usize },
}

/// Tokenizes and encodes every example into one long id stream, repeated
/// `max(1, max_rep)` times.
pub fn build_token_stream<S: AsRef<str>>(
    examples: &[S],
    tokenizer: &dyn PieceTokenizer,
    vocab: &Vocab,
    max_rep: usize,
) -> Result<Vec<usize>, DatasetError> {
    let mut stream = Vec::new();
    for example in examples {
        let pieces = tokenizer.tokenize(example.as_ref())?;
        stream.extend(vocab.encode(&pieces));
    }

    let once = stream.len();
    let stream = stream.repeat(max_rep.max(1));
    log::debug!("token stream: {} ids from {} examples ({} per pass)", stream.len(), examples.len(), once);
    Ok(stream)
}

/// One training example: `target` is `input` shifted left by one.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub input: Vec<usize>,
    pub target: Vec<usize>,
}

/// Random fixed-length windows over a token stream
#[derive(Debug, Clone)]
pub struct StreamDataset {
    tokens: Vec<usize>,
    max_len: usize,
}

impl StreamDataset {
    /// Needs at least two tokens so every window has an input and a target.
    pub fn new(tokens: Vec<usize>, max_len: usize) -> Result<Self, DatasetError> {
        if tokens.len() < 2 || max_len == 0 {
            return Err(DatasetError::TooShort { len: tokens.len(), max_len });
        }
        Ok(Self { tokens, max_len })
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Window starting at `start`; shorter than `max_len` near the end of
    /// the stream. Offsets past the last pair are clamped to it.
    pub fn window_at(&self, start: usize) -> Window {
        let start = start.min(self.tokens.len() - 2);
        let end = (start + self.max_len + 1).min(self.tokens.len());
        let chunk = &self.tokens[start..end];
        Window {
            input: chunk[..chunk.len() - 1].to_vec(),
            target: chunk[1..].to_vec(),
        }
    }

    /// Endless iterator of windows at uniformly random offsets. A stream no
    /// longer than `max_len + 1` always yields the window at offset zero.
    pub fn windows<'a, R: Rng>(&'a self, rng: &'a mut R) -> impl Iterator<Item = Window> + 'a {
        std::iter::repeat_with(move || {
            let start = if self.tokens.len() <= self.max_len + 1 {
                0
            } else {
                rng.gen_range(0..=self.tokens.len() - self.max_len - 1)
            };
            self.window_at(start)
        })
    }

    /// Collects `batch_size` windows as `(inputs, targets)`.
    pub fn batch<R: Rng>(&self, batch_size: usize, rng: &mut R) -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
        self.windows(rng)
            .take(batch_size)
            .map(|window| (window.input, window.target))
            .unzip()
    }
}
