use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use codethium::checkpoint::{load_safetensors, save_checkpoint, Checkpoint};
use codethium::generation::generate;
use codethium::training::{build_token_stream, StreamDataset};
use codethium::utils::io::read_to_string;
use codethium::{
    frame_prompt, load_model, AppConfig, ChatService, LanguageModel, ModelConfig, PieceTokenizer,
    SentencePieceTokenizer, Vocab, WhitespaceTokenizer,
};

#[derive(Parser)]
#[command(name = "codethium", version, about = "Small decoder-only code assistant")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON config file; defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct SamplingArgs {
    #[arg(long)]
    max_new_tokens: Option<usize>,
    #[arg(long)]
    temperature: Option<f32>,
    #[arg(long)]
    top_k: Option<usize>,
    #[arg(long)]
    top_p: Option<f32>,
    #[arg(long)]
    seed: Option<u64>,
}

impl SamplingArgs {
    fn apply(self, config: &mut AppConfig) {
        let generation = &mut config.generation;
        if let Some(v) = self.max_new_tokens {
            generation.max_new_tokens = v;
        }
        if let Some(v) = self.temperature {
            generation.temperature = v;
        }
        if let Some(v) = self.top_k {
            generation.top_k = v;
        }
        if let Some(v) = self.top_p {
            generation.top_p = v;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single message
    Generate {
        message: String,
        /// Use the message as the prompt verbatim instead of framing it
        #[arg(long)]
        raw: bool,
        #[command(flatten)]
        sampling: SamplingArgs,
    },

    /// Serve JSON requests, one per line on stdin, replies on stdout
    Chat {
        #[command(flatten)]
        sampling: SamplingArgs,
    },

    /// Build and save a vocabulary from a tokenizer or a corpus
    Vocab {
        /// tokenizer.json to take the piece inventory from
        #[arg(long, conflicts_with = "corpus")]
        tokenizer: Option<PathBuf>,
        /// Plain-text corpus for a whitespace piece inventory
        #[arg(long)]
        corpus: Option<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Convert a safetensors export into the native checkpoint format
    Migrate {
        input: PathBuf,
        output: PathBuf,
    },

    /// Write a freshly initialised checkpoint for the configured model
    Init {
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Mean loss of the configured checkpoint over random corpus windows
    Eval {
        /// One example per line
        corpus: PathBuf,
        #[arg(long, default_value_t = 10)]
        batches: usize,
        #[arg(long, default_value_t = 8)]
        batch_size: usize,
        #[arg(long, default_value_t = 1)]
        max_rep: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();

    let mut config = AppConfig::load(cli.config.as_deref())
        .with_context(|| format!("loading config {:?}", cli.config))?;

    match cli.command {
        Commands::Generate { message, raw, sampling } => {
            sampling.apply(&mut config);
            run_generate(&config, &message, raw)
        }
        Commands::Chat { sampling } => {
            sampling.apply(&mut config);
            run_chat(&config)
        }
        Commands::Vocab { tokenizer, corpus, output } => run_vocab(tokenizer.as_deref(), corpus.as_deref(), &output),
        Commands::Migrate { input, output } => run_migrate(&input, &output),
        Commands::Init { output } => run_init(&config, &output),
        Commands::Eval { corpus, batches, batch_size, max_rep } => {
            run_eval(&config, &corpus, batches, batch_size, max_rep)
        }
    }
}

fn run_generate(config: &AppConfig, message: &str, raw: bool) -> Result<()> {
    let service = ChatService::load(config).context("startup failed")?;

    let prompt = if raw { message.to_string() } else { frame_prompt(message) };
    let reply = generate(
        service.model(),
        service.vocab(),
        service.tokenizer(),
        &prompt,
        service.generation_config(),
        &config.execution_context(),
    )?;
    println!("{}", reply);
    Ok(())
}

fn run_chat(config: &AppConfig) -> Result<()> {
    let service = ChatService::load(config).context("startup failed")?;
    log::info!("reading requests from stdin");

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let (_, body) = service.handle_json(&line);
        writeln!(stdout, "{}", body)?;
        stdout.flush()?;
    }
    Ok(())
}

fn run_vocab(tokenizer: Option<&Path>, corpus: Option<&Path>, output: &Path) -> Result<()> {
    let vocab = match (tokenizer, corpus) {
        (Some(path), _) => Vocab::from_tokenizer(&SentencePieceTokenizer::from_file(path)?)?,
        (None, Some(path)) => Vocab::from_tokenizer(&WhitespaceTokenizer::from_text(&read_to_string(path)?))?,
        (None, None) => bail!("either --tokenizer or --corpus is required"),
    };
    vocab.save(output)?;
    println!("wrote {} pieces to {}", vocab.size(), output.display());
    Ok(())
}

fn run_migrate(input: &Path, output: &Path) -> Result<()> {
    let state_dict = load_safetensors(input)?;
    let count = state_dict.len();
    save_checkpoint(output, &Checkpoint::bare(state_dict))?;
    println!("migrated {} tensors to {}", count, output.display());
    Ok(())
}

fn run_init(config: &AppConfig, output: &Path) -> Result<()> {
    let vocab = Vocab::load(&config.paths.vocab)?;
    let model_config = ModelConfig { vocab_size: vocab.size(), ..config.model.clone() };
    let model = LanguageModel::new(model_config, &config.execution_context())?;
    save_checkpoint(output, &Checkpoint::from_model(&model))?;
    println!("initialised {} layer model at {}", model.config().num_layers, output.display());
    Ok(())
}

fn run_eval(config: &AppConfig, corpus: &Path, batches: usize, batch_size: usize, max_rep: usize) -> Result<()> {
    if batches == 0 || batch_size == 0 {
        bail!("batches and batch_size must be positive");
    }
    let ctx = config.execution_context();
    let tokenizer = SentencePieceTokenizer::from_file(&config.paths.tokenizer)?;
    let vocab = Vocab::load(&config.paths.vocab)?;
    let model_config = ModelConfig { vocab_size: vocab.size(), ..config.model.clone() };
    let model = load_model(model_config, &config.paths.checkpoint, &ctx)?;

    let text = read_to_string(corpus)?;
    let examples: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    let stream = build_token_stream(&examples, &tokenizer as &dyn PieceTokenizer, &vocab, max_rep)?;
    let dataset = StreamDataset::new(stream, model.max_seq_len())?;
    log::info!("evaluating {} batches of {} windows of up to {} ids", batches, batch_size, dataset.max_len());

    let mut rng = ctx.rng();
    let mut total = 0.0;
    for step in 0..batches {
        let (inputs, targets) = dataset.batch(batch_size, &mut rng);
        let loss = model.evaluate(&inputs, &targets)?.loss.unwrap_or(f32::NAN);
        log::info!("batch {}: loss {:.4}", step, loss);
        total += loss;
    }
    println!("mean loss over {} batches: {:.4}", batches, total / batches as f32);
    Ok(())
}
