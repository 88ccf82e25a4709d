use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::tokenizer::{PieceTokenizer, VocabError};
use crate::utils::io;

pub const VOCAB_VERSION: u32 = 1;

/// Piece returned when decoding an id outside the vocabulary.
pub const ERROR_TOKEN: &str = "<ERR>";

/// Reserved control tokens, in the order they are appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialToken {
    Pad,
    Bos,
    Eos,
    Unk,
    Newline,
    Indent,
    Dedent,
}

impl SpecialToken {
    pub const ALL: [SpecialToken; 7] = [
        SpecialToken::Pad,
        SpecialToken::Bos,
        SpecialToken::Eos,
        SpecialToken::Unk,
        SpecialToken::Newline,
        SpecialToken::Indent,
        SpecialToken::Dedent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SpecialToken::Pad => "<PAD>",
            SpecialToken::Bos => "<BOS>",
            SpecialToken::Eos => "<EOS>",
            SpecialToken::Unk => "<UNK>",
            SpecialToken::Newline => "<NL>",
            SpecialToken::Indent => "<INDENT>",
            SpecialToken::Dedent => "<DEDENT>",
        }
    }
}

impl fmt::Display for SpecialToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk form of a vocabulary.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedVocab {
    #[serde(default = "default_version")]
    version: u32,
    id2token: Vec<String>,
    token2id: BTreeMap<String, usize>,
}

fn default_version() -> u32 {
    VOCAB_VERSION
}

/// Bidirectional piece/id mapping, immutable once built.
#[derive(Debug, Clone)]
pub struct Vocab {
    id2token: Vec<String>,
    token2id: HashMap<String, usize>,
    bos_id: usize,
    eos_id: usize,
    unk_id: usize,
}

impl Vocab {
    /// Builds a vocabulary from a piece inventory, appending any reserved
    /// token the inventory does not already contain.
    pub fn from_pieces<I, S>(pieces: I) -> Result<Self, VocabError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut id2token = Vec::new();
        let mut token2id = HashMap::new();

        for piece in pieces {
            let piece = piece.into();
            let id = id2token.len();
            if let Some(&first) = token2id.get(&piece) {
                return Err(VocabError::DuplicatePiece { piece, first, second: id });
            }
            token2id.insert(piece.clone(), id);
            id2token.push(piece);
        }

        for special in SpecialToken::ALL {
            if !token2id.contains_key(special.as_str()) {
                token2id.insert(special.as_str().to_string(), id2token.len());
                id2token.push(special.as_str().to_string());
            }
        }

        Self::assemble(id2token, token2id)
    }

    /// Uses the tokenizer's piece inventory
    pub fn from_tokenizer(tokenizer: &dyn PieceTokenizer) -> Result<Self, VocabError> {
        Self::from_pieces(tokenizer.pieces())
    }

    /// Restores a vocabulary from an id/token pair, checking that every
    /// entry of `token2id` round-trips through `id2token`.
    pub fn from_pair(id2token: Vec<String>, token2id: HashMap<String, usize>) -> Result<Self, VocabError> {
        if id2token.len() != token2id.len() {
            return Err(VocabError::Inconsistent(format!(
                "id2token has {} entries, token2id has {}",
                id2token.len(),
                token2id.len()
            )));
        }
        for (token, &id) in &token2id {
            match id2token.get(id) {
                Some(stored) if stored == token => {}
                Some(stored) => {
                    return Err(VocabError::Inconsistent(format!(
                        "token2id maps {:?} to {} but id2token[{}] is {:?}",
                        token, id, id, stored
                    )))
                }
                None => {
                    return Err(VocabError::Inconsistent(format!(
                        "token2id maps {:?} to {} beyond {} entries",
                        token,
                        id,
                        id2token.len()
                    )))
                }
            }
        }

        for special in SpecialToken::ALL {
            if !token2id.contains_key(special.as_str()) {
                return Err(VocabError::MissingReservedToken(special.as_str()));
            }
        }

        Self::assemble(id2token, token2id)
    }

    fn assemble(id2token: Vec<String>, token2id: HashMap<String, usize>) -> Result<Self, VocabError> {
        let lookup = |special: SpecialToken| {
            token2id
                .get(special.as_str())
                .copied()
                .ok_or(VocabError::MissingReservedToken(special.as_str()))
        };
        let bos_id = lookup(SpecialToken::Bos)?;
        let eos_id = lookup(SpecialToken::Eos)?;
        let unk_id = lookup(SpecialToken::Unk)?;
        Ok(Self { id2token, token2id, bos_id, eos_id, unk_id })
    }

    /// Reads a persisted vocabulary. Every failure names `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, VocabError> {
        let path = path.as_ref();
        let load_error = |reason: String| VocabError::Load { path: path.to_path_buf(), reason };

        let persisted: PersistedVocab = io::read_json(path).map_err(|e| load_error(e.to_string()))?;
        if persisted.version != VOCAB_VERSION {
            return Err(load_error(VocabError::UnsupportedVersion(persisted.version).to_string()));
        }

        let token2id = persisted.token2id.into_iter().collect();
        let vocab = Self::from_pair(persisted.id2token, token2id).map_err(|e| load_error(e.to_string()))?;
        log::info!("loaded vocabulary of {} pieces from {}", vocab.size(), path.display());
        Ok(vocab)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), VocabError> {
        let persisted = PersistedVocab {
            version: VOCAB_VERSION,
            id2token: self.id2token.clone(),
            token2id: self.token2id.iter().map(|(t, &i)| (t.clone(), i)).collect(),
        };
        io::write_json(path, &persisted)?;
        Ok(())
    }

    /// Maps pieces to ids; unknown pieces map to the `<UNK>` id.
    pub fn encode<S: AsRef<str>>(&self, pieces: &[S]) -> Vec<usize> {
        pieces
            .iter()
            .map(|p| self.token2id.get(p.as_ref()).copied().unwrap_or(self.unk_id))
            .collect()
    }

    /// Maps ids to pieces; ids outside the vocabulary become `<ERR>`.
    pub fn decode(&self, ids: &[usize]) -> Vec<String> {
        ids.iter()
            .map(|&id| self.id2token.get(id).cloned().unwrap_or_else(|| ERROR_TOKEN.to_string()))
            .collect()
    }

    pub fn size(&self) -> usize {
        self.id2token.len()
    }

    pub fn id_of(&self, piece: &str) -> Option<usize> {
        self.token2id.get(piece).copied()
    }

    pub fn token(&self, id: usize) -> Option<&str> {
        self.id2token.get(id).map(String::as_str)
    }

    /// Id of a reserved token. Always present after construction.
    pub fn special_id(&self, special: SpecialToken) -> Option<usize> {
        self.id_of(special.as_str())
    }

    pub fn bos_id(&self) -> usize {
        self.bos_id
    }

    pub fn eos_id(&self) -> usize {
        self.eos_id
    }

    pub fn unk_id(&self) -> usize {
        self.unk_id
    }
}
