use std::collections::BTreeSet;

use super::{PieceTokenizer, SpecialToken, TokenizerError};

/// Marks the start of a word, as SentencePiece does.
pub const WORD_BOUNDARY: char = '▁';

/// Word-level piece tokenizer built from a corpus
#[derive(Debug, Clone)]
pub struct WhitespaceTokenizer {
    pieces: Vec<String>,
}

impl WhitespaceTokenizer {
    /// Creates a tokenizer whose inventory is every distinct word in `text`
    pub fn from_text(text: &str) -> Self {
        let words: BTreeSet<String> = text.split_whitespace().map(Self::piece).collect();
        Self { pieces: words.into_iter().collect() }
    }

    /// Reserved tokens stay bare so they match the vocabulary entries
    fn piece(word: &str) -> String {
        if SpecialToken::ALL.iter().any(|special| special.as_str() == word) {
            word.to_string()
        } else {
            format!("{}{}", WORD_BOUNDARY, word)
        }
    }
}

impl PieceTokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<String>, TokenizerError> {
        Ok(text.split_whitespace().map(Self::piece).collect())
    }

    fn detokenize(&self, pieces: &[String]) -> String {
        let joined = pieces.concat().replace(WORD_BOUNDARY, " ");
        joined.trim_start().to_string()
    }

    fn pieces(&self) -> Vec<String> {
        self.pieces.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let text = "def add ( a , b ) :";
        let tokenizer = WhitespaceTokenizer::from_text(text);

        let pieces = tokenizer.tokenize(text).unwrap();
        assert_eq!(pieces.len(), 8);
        assert_eq!(pieces[0], "▁def");
        assert_eq!(pieces[4], "▁,");
        assert_eq!(pieces[7], "▁:");
        assert_eq!(tokenizer.detokenize(&pieces), text);
    }

    #[test]
    fn test_inventory_is_distinct_and_sorted() {
        let tokenizer = WhitespaceTokenizer::from_text("b a b\nc a");
        assert_eq!(tokenizer.pieces(), vec!["▁a", "▁b", "▁c"]);
    }

    #[test]
    fn test_control_pieces_pass_through() {
        let tokenizer = WhitespaceTokenizer::from_text("");
        let pieces = tokenizer.tokenize("<BOS> # problem: sum <NL>").unwrap();
        assert_eq!(pieces, vec!["<BOS>", "▁#", "▁problem:", "▁sum", "<NL>"]);
        assert_eq!(tokenizer.detokenize(&pieces), "<BOS> # problem: sum<NL>");
    }
}
