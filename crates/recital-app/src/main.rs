//! # Recital
//!
//! Reads text aloud one chunk at a time using Gemini speech synthesis.
//! Text comes from a file or the terminal; playback is controlled with
//! single-letter commands at the prompt.

mod commands;
mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use recital_audio::{CpalDriver, PcmDecoder};
use recital_core::{SentenceSplitter, Splitter, VoiceCatalog, VoiceId};
use recital_engine::{EngineEvent, EngineParts, ReaderEngine};
use recital_synth::GeminiSynthesizer;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{describe, Command, HELP};
use config::AppConfig;

/// Line that ends text typed at the terminal.
const END_OF_TEXT: &str = ".";

/// Command-line arguments for recital
#[derive(Parser, Debug)]
#[command(name = "recital")]
#[command(about = "Read text aloud, one chunk at a time")]
#[command(version)]
struct Args {
    /// Text file to read; prompts for text when omitted
    file: Option<PathBuf>,

    /// Voice id or name
    #[arg(long)]
    voice: Option<String>,

    /// Speech model
    #[arg(long)]
    model: Option<String>,

    /// Upper bound on characters per chunk
    #[arg(long)]
    max_chunk_chars: Option<usize>,

    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// API key for the synthesis provider
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Only synthesize chunks when they are reached
    #[arg(long)]
    no_prefetch: bool,

    /// Write a default config file and exit
    #[arg(long)]
    init_config: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(voice) = &self.voice {
            config.voice.clone_from(voice);
        }
        if let Some(model) = &self.model {
            config.model.clone_from(model);
        }
        if let Some(max) = self.max_chunk_chars {
            config.max_chunk_chars = max;
        }
        if self.no_prefetch {
            config.prefetch = false;
        }
        config.apply_api_key(self.api_key.clone());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they don't interleave with the prompt output
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recital=info".into()),
        )
        .init();

    let args = Args::parse();
    let config_path = args
        .config
        .clone()
        .or_else(AppConfig::default_path)
        .context("Could not determine a config directory; pass --config")?;

    if args.init_config {
        AppConfig::default().save(&config_path)?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    let mut config = AppConfig::load(&config_path)?;
    args.apply(&mut config);
    info!("Starting Recital v{}", env!("CARGO_PKG_VERSION"));

    let catalog = VoiceCatalog::prebuilt();
    let mut voice = resolve_voice(&catalog, &config.voice)?;

    let synthesizer = GeminiSynthesizer::new(config.synth_config())
        .context("Set GEMINI_API_KEY or api_key in the config file")?;
    let splitter: Arc<dyn Splitter> = Arc::new(SentenceSplitter::new(config.max_chunk_chars));

    let engine = ReaderEngine::spawn(
        &config.engine_config(voice.clone()),
        EngineParts {
            synthesizer: Arc::new(synthesizer),
            decoder: Arc::new(PcmDecoder),
            driver: Box::new(CpalDriver::new(config.volume)),
            splitter: splitter.clone(),
        },
    );

    let chunks = Arc::new(RwLock::new(Vec::new()));
    let printer = spawn_printer(&engine, chunks.clone())?;

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut text = match &args.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => read_text(&mut input).await?,
    };
    start(&engine, splitter.as_ref(), &chunks, &text)?;
    println!("{HELP}");

    while let Some(line) = input.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };

        match command {
            Command::TogglePlayPause => engine.toggle_play_pause()?,
            Command::Next => engine.next()?,
            Command::Prev => engine.prev()?,
            Command::Seek(index) => engine.seek(index)?,
            Command::Voice(query) => match catalog.find(&query) {
                Some(found) => {
                    voice = found.id.clone();
                    engine.change_voice(voice.clone())?;
                    println!("Voice: {} ('p' to resume)", found.name);
                }
                None => eprintln!("Unknown voice {query:?}; 'l' lists voices"),
            },
            Command::Reread => start(&engine, splitter.as_ref(), &chunks, &text)?,
            Command::Edit => {
                engine.exit_to_editing()?;
                text = read_text(&mut input).await?;
                start(&engine, splitter.as_ref(), &chunks, &text)?;
            }
            Command::Status => println!(
                "{} | voice {voice} | {} cached",
                describe(&engine.snapshot()),
                engine.cached_chunks()
            ),
            Command::ListVoices => {
                for v in catalog.voices() {
                    let marker = if v.id == voice { '*' } else { ' ' };
                    println!("{marker} {:<8} {}", v.name, v.gender);
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
        }
    }

    engine.shutdown().await?;
    drop(engine);
    if printer.join().is_err() {
        eprintln!("Event printer panicked");
    }
    info!("Bye");
    Ok(())
}

fn resolve_voice(catalog: &VoiceCatalog, query: &str) -> Result<VoiceId> {
    catalog
        .find(query)
        .map(|v| v.id.clone())
        .with_context(|| format!("Unknown voice {query:?}"))
}

/// Read lines until a lone `.` or end of input.
async fn read_text(input: &mut Lines<BufReader<Stdin>>) -> Result<String> {
    println!("Enter text, then a line with a single '{END_OF_TEXT}':");
    let mut lines = Vec::new();
    while let Some(line) = input.next_line().await? {
        if line.trim() == END_OF_TEXT {
            break;
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

fn start(
    engine: &ReaderEngine,
    splitter: &dyn Splitter,
    chunks: &RwLock<Vec<String>>,
    text: &str,
) -> Result<()> {
    // Same deterministic split the engine performs, kept for display
    *chunks.write() = splitter.split(text);
    engine.start_reading(text)?;
    Ok(())
}

/// Print engine events until the engine goes away.
fn spawn_printer(engine: &ReaderEngine, chunks: Arc<RwLock<Vec<String>>>) -> Result<JoinHandle<()>> {
    let events = engine.events();
    let handle = std::thread::Builder::new()
        .name("event-printer".to_string())
        .spawn(move || {
            for event in events.iter() {
                match event {
                    EngineEvent::StateChanged(snapshot) => println!("{}", describe(&snapshot)),
                    EngineEvent::ChunkStarted { index } => {
                        if let Some(text) = chunks.read().get(index) {
                            println!("  > {text}");
                        }
                    }
                    EngineEvent::Finished => println!("Done. 'r' reads again, 'e' takes new text."),
                    // Shown with the state change that follows
                    EngineEvent::Error(_) => {}
                }
            }
        })
        .context("Failed to spawn event printer")?;
    Ok(handle)
}
