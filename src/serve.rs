//! Request handling for the chat endpoint.
//!
//! The HTTP layer lives outside this crate; it forwards the JSON body of a
//! `POST /chat` to [`ChatService::handle_json`] and returns the result.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkpoint::load_model;
use crate::config::AppConfig;
use crate::error::CodethiumError;
use crate::generation::{generate, GenerationConfig, GenerationError};
use crate::model::{LanguageModel, ModelConfig};
use crate::tokenizer::{PieceTokenizer, SentencePieceTokenizer, Vocab};
use crate::utils::ExecutionContext;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatFailure {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Malformed request: {0}")]
    BadRequest(String),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Worker thread exited without a reply")]
    WorkerLost,
}

/// Wraps a user message in the prompt structure the model was trained on.
pub fn frame_prompt(message: &str) -> String {
    format!("<BOS> # problem: {} <NL> ", message.trim())
}

/// Read-only state shared by every request.
#[derive(Clone)]
pub struct ChatService {
    model: Arc<LanguageModel>,
    vocab: Arc<Vocab>,
    tokenizer: Arc<dyn PieceTokenizer>,
    generation: GenerationConfig,
    ctx: ExecutionContext,
    timeout: Duration,
}

impl ChatService {
    pub fn new(
        model: LanguageModel,
        vocab: Vocab,
        tokenizer: Arc<dyn PieceTokenizer>,
        generation: GenerationConfig,
        ctx: ExecutionContext,
        timeout: Duration,
    ) -> Self {
        Self {
            model: Arc::new(model),
            vocab: Arc::new(vocab),
            tokenizer,
            generation,
            ctx,
            timeout,
        }
    }

    /// Loads tokenizer, vocabulary and checkpoint. Any failure here means
    /// the service must not start.
    pub fn load(config: &AppConfig) -> Result<Self, CodethiumError> {
        config.validate()?;
        let ctx = config.execution_context();

        let tokenizer = SentencePieceTokenizer::from_file(&config.paths.tokenizer)?;
        let vocab = Vocab::load(&config.paths.vocab)?;

        if config.model.vocab_size != vocab.size() {
            log::info!(
                "using vocabulary size {} instead of configured {}",
                vocab.size(),
                config.model.vocab_size
            );
        }
        let model_config = ModelConfig { vocab_size: vocab.size(), ..config.model.clone() };
        let model = load_model(model_config, &config.paths.checkpoint, &ctx)?;

        log::info!("chat service ready ({} pieces, context {})", vocab.size(), model.max_seq_len());
        Ok(Self::new(
            model,
            vocab,
            Arc::new(tokenizer),
            config.generation,
            ctx,
            config.server.request_timeout(),
        ))
    }

    pub fn model(&self) -> &LanguageModel {
        &self.model
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn tokenizer(&self) -> &dyn PieceTokenizer {
        self.tokenizer.as_ref()
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation
    }

    /// Runs one request on the calling thread.
    pub fn handle(&self, request: &ChatRequest) -> Result<ChatReply, ServeError> {
        let started = Instant::now();
        let prompt = frame_prompt(&request.message);
        let reply = generate(
            self.model.as_ref(),
            &self.vocab,
            self.tokenizer.as_ref(),
            &prompt,
            &self.generation,
            &self.ctx,
        )?;
        log::debug!("answered {} byte message in {:?}", request.message.len(), started.elapsed());
        Ok(ChatReply { reply })
    }

    /// Runs one request on a worker thread and gives up after the
    /// configured timeout. An abandoned worker finishes on its own and its
    /// result is dropped.
    pub fn handle_with_timeout(&self, request: ChatRequest) -> Result<ChatReply, ServeError> {
        let (tx, rx) = mpsc::channel();
        let service = self.clone();
        thread::spawn(move || {
            // The receiver is gone once the request has timed out
            let _ = tx.send(service.handle(&request));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ServeError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ServeError::WorkerLost),
        }
    }

    /// Maps a JSON request body to a JSON response body. Failures become a
    /// [`ChatFailure`] body; the `bool` reports success.
    pub fn handle_json(&self, body: &str) -> (bool, String) {
        let result = serde_json::from_str::<ChatRequest>(body)
            .map_err(|e| ServeError::BadRequest(e.to_string()))
            .and_then(|request| self.handle_with_timeout(request));

        match result {
            Ok(reply) => (true, to_json(&reply)),
            Err(e) => {
                log::warn!("chat request failed: {}", e);
                (false, to_json(&ChatFailure { error: e.to_string() }))
            }
        }
    }
}

fn to_json<T: Serialize>(body: &T) -> String {
    serde_json::to_string(body).unwrap_or_else(|e| format!("{{\"error\":\"serialization failed: {}\"}}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{save_checkpoint, Checkpoint};
    use crate::model::tests::tiny_config;
    use crate::model::NamedParameters;
    use crate::tokenizer::{toy_tokenizer, WhitespaceTokenizer, TOY_TOKENIZER_JSON};
    use tempfile::tempdir;

    fn service(max_new_tokens: usize, timeout: Duration) -> ChatService {
        let tokenizer = WhitespaceTokenizer::from_text("def add ( a , b ) : return a + b problem: sum two numbers #");
        let vocab = Vocab::from_tokenizer(&tokenizer).unwrap();
        let model = LanguageModel::new(tiny_config(vocab.size()), &ExecutionContext::seeded(3)).unwrap();
        let generation = GenerationConfig { max_new_tokens, ..GenerationConfig::default() };
        ChatService::new(model, vocab, Arc::new(tokenizer), generation, ExecutionContext::seeded(8), timeout)
    }

    #[test]
    fn test_frame_prompt() {
        assert_eq!(frame_prompt("  sum two numbers \n"), "<BOS> # problem: sum two numbers <NL> ");
    }

    #[test]
    fn test_handle_returns_cleaned_reply() {
        let service = service(5, Duration::from_secs(30));
        let reply = service.handle(&ChatRequest { message: "sum two numbers".to_string() }).unwrap();
        assert!(reply.reply.starts_with(" problem: sum two numbers"));
        assert!(!reply.reply.contains("<BOS>"));
        assert!(!reply.reply.contains("<NL>"));
    }

    #[test]
    fn test_handle_json_success_and_failure() {
        let service = service(3, Duration::from_secs(30));

        let (ok, body) = service.handle_json(r#"{"message": "add a b"}"#);
        assert!(ok);
        let reply: ChatReply = serde_json::from_str(&body).unwrap();
        assert!(reply.reply.contains("add a b"));

        let (ok, body) = service.handle_json(r#"{"text": "no message field"}"#);
        assert!(!ok);
        let failure: ChatFailure = serde_json::from_str(&body).unwrap();
        assert!(failure.error.contains("Malformed request"));
    }

    #[test]
    fn test_slow_request_times_out() {
        let service = service(200, Duration::from_nanos(1));
        let result = service.handle_with_timeout(ChatRequest { message: "add a b".to_string() });
        assert!(matches!(result, Err(ServeError::Timeout(_))));
    }

    #[test]
    fn test_concurrent_requests_share_the_model() {
        let service = service(4, Duration::from_secs(30));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let service = service.clone();
                thread::spawn(move || service.handle(&ChatRequest { message: format!("sum {}", i) }))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
    }

    #[test]
    fn test_load_fails_without_artifacts() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.paths.tokenizer = dir.path().join("tokenizer.json");
        config.paths.vocab = dir.path().join("vocab.json");
        config.paths.checkpoint = dir.path().join("model.bin");
        assert!(ChatService::load(&config).is_err());
    }

    #[test]
    fn test_load_resizes_model_to_vocabulary() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.paths.tokenizer = dir.path().join("tokenizer.json");
        config.paths.vocab = dir.path().join("vocab.json");
        config.paths.checkpoint = dir.path().join("model.bin");

        std::fs::write(&config.paths.tokenizer, TOY_TOKENIZER_JSON).unwrap();
        let vocab = Vocab::from_tokenizer(&toy_tokenizer()).unwrap();
        vocab.save(&config.paths.vocab).unwrap();
        let model = LanguageModel::new(tiny_config(vocab.size()), &ExecutionContext::seeded(1)).unwrap();
        save_checkpoint(&config.paths.checkpoint, &Checkpoint::from_model(&model)).unwrap();

        config.model = ModelConfig { vocab_size: 9999, ..tiny_config(vocab.size()) };
        let service = ChatService::load(&config).unwrap();
        assert_eq!(service.model().vocab_size(), vocab.size());
        assert_eq!(service.model().state_dict(), model.state_dict());

        let (ok, _) = service.handle_json(r#"{"message": "def add x"}"#);
        assert!(ok);
    }
}
