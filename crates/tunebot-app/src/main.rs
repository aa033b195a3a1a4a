//! # Tunebot
//!
//! A queue-driven music bot for voice channels. This binary runs the bot
//! against the console: each stdin line is a chat message from the
//! configured identity, replies go to stdout and audio goes to
//! `voice_output`.

mod command;
mod config;
mod console;
mod dispatcher;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunebot_audio::{EngineEvent, FfmpegDecoder, PlaybackEngine};
use tunebot_cache::AudioCache;
use tunebot_core::{Invoker, PermissionGate, VoiceSink};
use tunebot_extractor::YtDlpResolver;

use config::BotConfig;
use console::{ConsoleTransport, NullSink, PcmFileSink, StaticDirectory};
use dispatcher::{CommandDispatcher, CommandEvent};

/// Command-line arguments for tunebot
#[derive(Parser, Debug)]
#[command(name = "tunebot")]
#[command(about = "Queue-driven music bot for voice channels")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "TUNEBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Unique identifier the console speaks as
    #[arg(long, default_value = "console", env = "TUNEBOT_UID")]
    uid: String,

    /// Nickname the console speaks as
    #[arg(long, default_value = "console", env = "TUNEBOT_NICKNAME")]
    nickname: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only replies
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunebot=info,tunebot_app=debug,tunebot_audio=info".into()),
        )
        .init();

    let args = Args::parse();
    info!("Starting Tunebot v{}", env!("CARGO_PKG_VERSION"));

    let config = BotConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    let cache = match &config.cache_dir {
        Some(dir) => AudioCache::with_path(dir.clone()),
        None => AudioCache::new(),
    }
    .context("Failed to open audio cache")?;

    if let Some(max_age) = config.cache_max_age() {
        match cache.cleanup(max_age) {
            Ok(removed) => info!("Removed {removed} stale downloads"),
            Err(e) => warn!("Cache cleanup failed: {e}"),
        }
    }
    let stats = cache.stats();
    info!(
        "Audio cache at {}: {} files, {:.1} MB",
        cache.cache_dir().display(),
        stats.audio_count,
        stats.audio_size_mb()
    );

    let resolver = YtDlpResolver::new(&config.yt_dlp_path, cache).with_auth_method(config.auth_method());
    if !resolver.check_installed().await {
        warn!(
            "yt-dlp not runnable at {}; playback will fail",
            config.yt_dlp_path.display()
        );
    }

    let sink: Arc<dyn VoiceSink> = match &config.voice_output {
        Some(path) => Arc::new(
            PcmFileSink::create(path)
                .await
                .context("Failed to open voice output")?,
        ),
        None => {
            info!("No voice_output configured, audio will be discarded");
            Arc::new(NullSink)
        }
    };

    let engine = PlaybackEngine::start(
        config.engine_config(),
        Arc::new(resolver),
        Arc::new(FfmpegDecoder::new(&config.ffmpeg_path)),
        sink,
    );
    tokio::spawn(log_events(engine.subscribe()));

    let gate = Arc::new(PermissionGate::new(
        config.permission_policy(),
        Arc::new(StaticDirectory::new(config.directory.clone())),
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(
        config.command_prefix.clone(),
        gate,
        engine.clone(),
        Arc::new(ConsoleTransport::new()),
    ));

    let invoker = Invoker::new("console", args.uid, args.nickname);
    info!(
        "Ready. Type {}help for commands, Ctrl-C to quit",
        config.command_prefix
    );

    let mut signals = ShutdownSignal::listen().context("Failed to install signal handlers")?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line.context("Failed to read stdin")? {
                    Some(line) => {
                        let dispatcher = dispatcher.clone();
                        let event = CommandEvent::new(line, invoker.clone());
                        tokio::spawn(async move { dispatcher.handle(event).await });
                    }
                    None => {
                        info!("Input closed, playing until Ctrl-C or SIGTERM");
                        input_open = false;
                    }
                }
            }
            signal = signals.recv() => {
                info!("Received {signal}, shutting down");
                break;
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

/// Ctrl-C, plus SIGTERM on Unix.
struct ShutdownSignal {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    /// Register the handlers now so no signal is missed before `recv`.
    fn listen() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
        })
    }

    /// Wait for the next shutdown request and name it.
    async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!("Failed to listen for Ctrl-C: {e}");
                    }
                    "Ctrl-C"
                }
                _ = self.terminate.recv() => "SIGTERM",
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {e}");
            }
            "Ctrl-C"
        }
    }
}

/// Log engine events until the engine goes away.
async fn log_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::StateChanged(state)) => debug!("Playback state: {state:?}"),
            Ok(EngineEvent::TrackStarted(track)) => {
                info!("Started {} (requested by {})", track.display_line(), track.requested_by());
            }
            Ok(EngineEvent::TrackFinished(track)) => debug!("Finished {}", track.title()),
            Ok(EngineEvent::TrackFailed { track, reason }) => {
                warn!("Dropped {}: {reason}", track.title());
            }
            Ok(EngineEvent::QueueCleared(count)) => debug!("Cleared {count} queued tracks"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Event log skipped {skipped} events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_requests_shutdown() {
        let mut signals = ShutdownSignal::listen().unwrap();

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let signal = tokio::time::timeout(std::time::Duration::from_secs(5), signals.recv())
            .await
            .unwrap();
        assert_eq!(signal, "SIGTERM");
    }
}
