use crate::tokenizer::TokenizerError;

/// Splits text into subword pieces and joins pieces back into text.
///
/// Implementations hold only their loaded segmentation model and are
/// shared read-only between concurrent requests.
pub trait PieceTokenizer: Send + Sync {
    /// Segments text into piece strings
    fn tokenize(&self, text: &str) -> Result<Vec<String>, TokenizerError>;

    /// Reconstructs readable text, concatenating the pieces if that fails
    fn detokenize(&self, pieces: &[String]) -> String;

    /// Full piece inventory in id order
    fn pieces(&self) -> Vec<String>;
}
