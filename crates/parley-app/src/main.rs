//! Parley application binary - composition root.
//!
//! Ties together all Parley crates into a single executable:
//! 1. Load `.env` and the TOML configuration
//! 2. Initialize logging (stderr + `<data_dir>/parley.log`)
//! 3. Open the transcript store and start the persistence worker
//! 4. Build the provider, chat orchestrator and speech engines
//! 5. Serve the HTTP API until Ctrl-C, then drain pending saves

mod cli;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use parley_api::state::AppState;
use parley_chat::{ChatOrchestrator, GeminiProvider};
use parley_core::config::ParleyConfig;
use parley_core::error::ParleyError;
use parley_core::types::{Settings, Theme};
use parley_speech::{
    AcousticModel, AudioConverter, CloudTranscriber, NeuralSynthesizer, OfflineTranscriber,
    SpeechToText, Synthesizer, SystemVoice, TextToSpeech, Transcriber, WhisperModel,
};
use parley_storage::{ConversationCache, ConversationStore, PersistenceWorker, SaveMode};

use cli::CliArgs;

/// Install the stderr and log-file layers.
///
/// `RUST_LOG` wins over the configured level. The returned guard flushes the
/// file writer when dropped and must live until exit.
fn init_logging(log_level: &str, data_dir: &Path) -> Result<WorkerGuard, ParleyError> {
    std::fs::create_dir_all(data_dir)?;
    let file_appender = tracing_appender::rolling::never(data_dir, "parley.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();
    Ok(guard)
}

/// Speech-to-text chain: offline recognizer first, cloud recognizer second.
fn build_stt(config: &ParleyConfig) -> SpeechToText {
    let stt = &config.speech.stt;
    let mut engines: Vec<Arc<dyn Transcriber>> = Vec::new();

    let model: Option<Arc<dyn AcousticModel>> = if stt.enabled {
        let mut path = PathBuf::from(&stt.offline_model_path);
        if path.is_relative() {
            path = config.data_dir().join(path);
        }
        match WhisperModel::load(&path, &stt.language) {
            Ok(model) => {
                tracing::info!(path = %path.display(), "Offline recognizer loaded");
                Some(Arc::new(model) as Arc<dyn AcousticModel>)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Offline recognizer unavailable, using fallback");
                None
            }
        }
    } else {
        tracing::info!("Offline recognizer disabled in config");
        None
    };
    let converter = AudioConverter::new(stt.ffmpeg_path.clone(), stt.sample_rate);
    engines.push(Arc::new(OfflineTranscriber::new(
        converter,
        model,
        stt.chunk_bytes,
    )));

    if stt.cloud_enabled {
        let key = std::env::var(&stt.cloud_api_key_env).ok();
        if key.is_none() {
            tracing::warn!(
                env = %stt.cloud_api_key_env,
                "Cloud recognizer key not set"
            );
        }
        engines.push(Arc::new(CloudTranscriber::new(
            stt.cloud_url.clone(),
            key,
            stt.language.clone(),
        )));
    }

    SpeechToText::new(engines)
}

/// Text-to-speech chain: neural server first, system voice second.
fn build_tts(config: &ParleyConfig) -> TextToSpeech {
    let tts = &config.speech.tts;
    let rate = Arc::new(AtomicU32::new(tts.voice_rate));
    let mut engines: Vec<Arc<dyn Synthesizer>> = Vec::new();

    if tts.enabled {
        engines.push(Arc::new(NeuralSynthesizer::new(
            tts.server_url.clone(),
            tts.player_command.clone(),
            tts.player_args.clone(),
        )));
        engines.push(Arc::new(SystemVoice::new(
            tts.fallback_command.clone(),
            Arc::clone(&rate),
        )));
    } else {
        tracing::info!("Speech output disabled in config");
    }

    TextToSpeech::new(engines, rate)
}

fn initial_settings(config: &ParleyConfig) -> Settings {
    Settings {
        tts_enabled: config.ui.tts_enabled && config.speech.tts.enabled,
        voice_speed: config.speech.tts.voice_rate.max(1),
        theme: if config.ui.theme.eq_ignore_ascii_case("dark") {
            Theme::Dark
        } else {
            Theme::Light
        },
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenv::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to read .env: {}", e);
        }
    }

    let args = CliArgs::parse();
    let config_file = args.resolve_config_path();
    let (mut config, load_error) = match ParleyConfig::load(&config_file) {
        Ok(config) => (config, None),
        Err(e) => (ParleyConfig::default(), Some(e)),
    };
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    let data_dir = config.data_dir();
    let _log_guard = init_logging(&config.general.log_level, &data_dir)?;
    match load_error {
        None => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(e) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Configuration not loaded, using defaults"
        ),
    }

    // Storage: transcript files, persistence worker, working-window cache.
    let store = ConversationStore::open(config.history_dir())?;
    let worker = PersistenceWorker::spawn(store.clone(), config.history.save_queue_capacity);
    let cache = Arc::new(ConversationCache::new(
        store,
        worker.handle(),
        config.history.cache_limit,
        SaveMode::from_full_history(config.history.persist_full_history),
    )
    .with_max_conversations(config.history.max_cached_conversations));
    tracing::info!(dir = %config.history_dir().display(), "Conversation store ready");

    // Provider and chat orchestration.
    let api_key = config.provider_api_key();
    if api_key.is_none() {
        tracing::warn!(
            env = %config.provider.api_key_env,
            "No provider API key; replies will report an error"
        );
    }
    let provider = GeminiProvider::new(&config.provider, api_key)?;
    let chat = Arc::new(ChatOrchestrator::new(
        Arc::new(provider),
        Arc::clone(&cache),
        config.provider.context_messages,
    ));
    tracing::info!(model = %config.provider.model, "Provider configured");

    let stt = Arc::new(build_stt(&config));
    let tts = Arc::new(build_tts(&config));

    let state = AppState::new(cache, chat, stt, tts, initial_settings(&config))
        .with_voice_replies(config.speech.tts.speak_voice_replies);

    let host = args.resolve_host(&config.general.host);
    let port = args.resolve_port(config.general.port);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| ParleyError::Config(format!("Invalid address {}:{}: {}", host, port, e)))?;

    let served = parley_api::start_server(addr, state, shutdown_signal()).await;

    tracing::info!("Draining pending conversation saves");
    worker.shutdown().await;

    served?;
    tracing::info!("Parley stopped");
    Ok(())
}
