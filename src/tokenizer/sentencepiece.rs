//! Subword segmentation backed by a HuggingFace `tokenizer.json`.
//!
//! SentencePiece models are converted to the `tokenizer.json` format once;
//! the pieces (`▁def`, `▁return`, ...) are identical to the ones the
//! SentencePiece processor produces.

use std::path::Path;

use tokenizers::{Decoder, Tokenizer as HfTokenizer};

use crate::tokenizer::{PieceTokenizer, TokenizerError};

#[derive(Clone)]
pub struct SentencePieceTokenizer {
    inner: HfTokenizer,
}

impl SentencePieceTokenizer {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TokenizerError> {
        let path = path.as_ref();
        let inner = HfTokenizer::from_file(path).map_err(|e| TokenizerError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        log::info!(
            "loaded tokenizer with {} pieces from {}",
            inner.get_vocab_size(true),
            path.display()
        );
        Ok(Self { inner })
    }

    pub fn new(inner: HfTokenizer) -> Self {
        Self { inner }
    }
}

impl PieceTokenizer for SentencePieceTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<String>, TokenizerError> {
        let encoding = self.inner.encode(text, false).map_err(TokenizerError::segmentation)?;
        Ok(encoding.get_tokens().to_vec())
    }

    fn detokenize(&self, pieces: &[String]) -> String {
        let decoded = self
            .inner
            .get_decoder()
            .map(|decoder| decoder.decode(pieces.to_vec()));

        match decoded {
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                log::debug!("decoder failed ({}), concatenating pieces", e);
                pieces.concat()
            }
            None => pieces.concat(),
        }
    }

    fn pieces(&self) -> Vec<String> {
        let size = self.inner.get_vocab_size(true) as u32;
        (0..size).filter_map(|id| self.inner.id_to_token(id)).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::str::FromStr;

    /// Word-level model over Metaspace pieces, enough to behave like a
    /// converted SentencePiece file for short inputs.
    pub(crate) const TOY_TOKENIZER_JSON: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Metaspace", "replacement": "▁", "prepend_scheme": "always", "split": true},
        "post_processor": null,
        "decoder": {"type": "Metaspace", "replacement": "▁", "prepend_scheme": "always", "split": true},
        "model": {
            "type": "WordLevel",
            "vocab": {"<UNK>": 0, "▁def": 1, "▁add": 2, "▁return": 3, "▁x": 4, "▁problem:": 5, "▁#": 6},
            "unk_token": "<UNK>"
        }
    }"#;

    pub(crate) fn toy_tokenizer() -> SentencePieceTokenizer {
        SentencePieceTokenizer::new(HfTokenizer::from_str(TOY_TOKENIZER_JSON).unwrap())
    }

    #[test]
    fn test_tokenize_produces_pieces() {
        let tokenizer = toy_tokenizer();
        let pieces = tokenizer.tokenize("def add x").unwrap();
        assert_eq!(pieces, vec!["▁def", "▁add", "▁x"]);
    }

    #[test]
    fn test_unknown_words_become_unk_piece() {
        let tokenizer = toy_tokenizer();
        let pieces = tokenizer.tokenize("def lambda").unwrap();
        assert_eq!(pieces, vec!["▁def", "<UNK>"]);
    }

    #[test]
    fn test_detokenize_restores_spaces() {
        let tokenizer = toy_tokenizer();
        let pieces = tokenizer.tokenize("return x").unwrap();
        assert_eq!(tokenizer.detokenize(&pieces), "return x");
    }

    #[test]
    fn test_piece_inventory_in_id_order() {
        let pieces = toy_tokenizer().pieces();
        assert_eq!(pieces.len(), 7);
        assert_eq!(pieces[0], "<UNK>");
        assert_eq!(pieces[3], "▁return");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        std::fs::write(&path, TOY_TOKENIZER_JSON).unwrap();
        let tokenizer = SentencePieceTokenizer::from_file(&path).unwrap();
        assert_eq!(tokenizer.tokenize("def x").unwrap(), vec!["▁def", "▁x"]);
    }

    #[test]
    fn test_missing_file_names_path() {
        match SentencePieceTokenizer::from_file("/nonexistent/tokenizer.json") {
            Err(TokenizerError::Load { path, .. }) => assert!(path.ends_with("tokenizer.json")),
            _ => panic!("expected load error"),
        }
    }
}
