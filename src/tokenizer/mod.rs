mod error;
mod sentencepiece;
mod simple;
mod tokenizer;
mod vocab;

pub use error::{TokenizerError, VocabError};
pub use sentencepiece::SentencePieceTokenizer;
pub use simple::{WhitespaceTokenizer, WORD_BOUNDARY};
pub use tokenizer::PieceTokenizer;
pub use vocab::{SpecialToken, Vocab, ERROR_TOKEN, VOCAB_VERSION};

#[cfg(test)]
pub(crate) use sentencepiece::tests::{toy_tokenizer, TOY_TOKENIZER_JSON};
