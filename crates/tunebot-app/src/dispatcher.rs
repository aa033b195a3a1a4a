//! Routes chat commands to the playback engine and replies to the invoker.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, error, warn};

use tunebot_audio::{PauseOutcome, PlaybackEngine, PlaybackState};
use tunebot_core::{ChatTransport, Error, Invoker, PermissionGate, TrackInfo};

use crate::command::Command;

/// Number of results returned by the search command.
pub const SEARCH_LIMIT: usize = 5;

/// Pending entries shown by the queue command.
pub const QUEUE_DISPLAY_LIMIT: usize = 10;

const PERMISSION_DENIED: &str = "You do not have permission to use bot commands.";
const NOTHING_PLAYING: &str = "Nothing is currently playing.";

/// An inbound chat message.
#[derive(Debug, Clone)]
pub struct CommandEvent {
    pub raw_text: String,
    pub invoker: Invoker,
}

impl CommandEvent {
    pub fn new(raw_text: impl Into<String>, invoker: Invoker) -> Self {
        Self {
            raw_text: raw_text.into(),
            invoker,
        }
    }
}

/// Parses chat messages, checks permissions and runs commands.
pub struct CommandDispatcher {
    prefix: String,
    gate: Arc<PermissionGate>,
    engine: PlaybackEngine,
    transport: Arc<dyn ChatTransport>,
}

impl CommandDispatcher {
    pub fn new(
        prefix: impl Into<String>,
        gate: Arc<PermissionGate>,
        engine: PlaybackEngine,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            gate,
            engine,
            transport,
        }
    }

    /// Handle one chat message. Never fails; problems become replies or logs.
    pub async fn handle(&self, event: CommandEvent) {
        let CommandEvent { raw_text, invoker } = event;

        let Some(parsed) = Command::parse(&raw_text, &self.prefix) else {
            return;
        };

        if !self.gate.check(&invoker).await {
            debug!("Denied command from {} ({})", invoker.nickname, invoker.uid);
            self.reply(&invoker, PERMISSION_DENIED).await;
            return;
        }

        match parsed {
            Ok(command) => {
                debug!("{} issued {command:?}", invoker.nickname);
                self.run(&invoker, command).await;
            }
            Err(e) => self.reply(&invoker, &e.user_message()).await,
        }
    }

    async fn run(&self, invoker: &Invoker, command: Command) {
        match command {
            Command::Play(query) => self.play(invoker, &query).await,
            Command::Skip => {
                let text = match self.engine.skip() {
                    Some(track) => format!("Skipped: {}", track.title()),
                    None => NOTHING_PLAYING.to_string(),
                };
                self.reply(invoker, &text).await;
            }
            Command::Queue => {
                let text = format_queue(&self.engine.snapshot());
                self.reply(invoker, &text).await;
            }
            Command::Search(query) => self.search(invoker, &query).await,
            Command::Pause => {
                let text = match self.engine.pause() {
                    PauseOutcome::Changed => {
                        format!("Playback paused. Use {}resume to continue.", self.prefix)
                    }
                    PauseOutcome::AlreadyInState => format!(
                        "Playback is already paused. Use {}resume to continue.",
                        self.prefix
                    ),
                    PauseOutcome::NotPlaying => NOTHING_PLAYING.to_string(),
                };
                self.reply(invoker, &text).await;
            }
            Command::Resume => {
                let text = match self.engine.resume() {
                    PauseOutcome::Changed => "Playback resumed.",
                    PauseOutcome::AlreadyInState => "Playback is not paused.",
                    PauseOutcome::NotPlaying => NOTHING_PLAYING,
                };
                self.reply(invoker, text).await;
            }
            Command::Stop => {
                self.engine.stop();
                self.reply(invoker, "Stopped playback and cleared queue.").await;
            }
            Command::Current => {
                let text = format_current(&self.engine.snapshot())
                    .unwrap_or_else(|| NOTHING_PLAYING.to_string());
                self.reply(invoker, &text).await;
            }
            Command::Remove(index) => {
                let text = match self.engine.remove(index) {
                    Ok(track) => format!("Removed from queue: {}", track.title()),
                    Err(_) => "Invalid queue position.".to_string(),
                };
                self.reply(invoker, &text).await;
            }
            Command::Clear => {
                let cleared = self.engine.clear();
                self.reply(invoker, &format!("Cleared {cleared} song(s) from queue."))
                    .await;
            }
            Command::Volume(None) => {
                let text = format!("Current volume: {}", self.engine.volume());
                self.reply(invoker, &text).await;
            }
            Command::Volume(Some(volume)) => {
                let volume = self.engine.set_volume(i64::from(volume));
                self.reply(invoker, &format!("Volume set to {volume}")).await;
            }
            Command::Help => self.reply(invoker, &help_text(&self.prefix)).await,
        }
    }

    async fn play(&self, invoker: &Invoker, query: &str) {
        self.reply(invoker, &format!("Searching for: {query}...")).await;

        let text = match self.engine.enqueue(query, &invoker.nickname).await {
            Ok(enqueued) if enqueued.position <= 1 => {
                format!("Now playing: {}", enqueued.track.display_line())
            }
            Ok(enqueued) => format!(
                "Added to queue (position {}): {}",
                enqueued.position,
                enqueued.track.display_line()
            ),
            Err(e) => {
                log_failure("play", query, &e);
                format!("Error: {}", e.user_message())
            }
        };
        self.reply(invoker, &text).await;
    }

    async fn search(&self, invoker: &Invoker, query: &str) {
        self.reply(invoker, &format!("Searching for: {query}...")).await;

        let text = match self.engine.search(query, SEARCH_LIMIT).await {
            Ok(results) if !results.is_empty() => format_search_results(&results),
            Ok(_) | Err(Error::NoResults) => "No results found.".to_string(),
            Err(e) => {
                log_failure("search", query, &e);
                format!("Error: {}", e.user_message())
            }
        };
        self.reply(invoker, &text).await;
    }

    async fn reply(&self, to: &Invoker, text: &str) {
        if let Err(e) = self.transport.send_text(to, text).await {
            warn!("Failed to reply to {}: {e}", to.nickname);
        }
    }
}

fn log_failure(command: &str, query: &str, error: &Error) {
    if error.is_user_error() || error.is_track_failure() {
        warn!("{command} {query:?} failed: {error}");
    } else {
        error!("{command} {query:?} failed unexpectedly: {error}");
    }
}

/// Render the queue command reply.
pub fn format_queue(state: &PlaybackState) -> String {
    if state.current.is_none() && state.queue.is_empty() {
        return "Queue is empty.".to_string();
    }

    let mut message = String::new();
    if let Some(current) = &state.current {
        let _ = write!(message, "[b]Now Playing:[/b] {}", current.display_line());
        if state.is_paused() {
            message.push_str(" [PAUSED]");
        }
        message.push('\n');
    }

    if !state.queue.is_empty() {
        message.push_str("\n[b]Queue:[/b]\n");
        for (i, track) in state.queue.iter().take(QUEUE_DISPLAY_LIMIT).enumerate() {
            let _ = writeln!(
                message,
                "{}. {} - Requested by {}",
                i + 1,
                track.display_line(),
                track.requested_by()
            );
        }
        if state.queue.len() > QUEUE_DISPLAY_LIMIT {
            let _ = write!(
                message,
                "... and {} more songs",
                state.queue.len() - QUEUE_DISPLAY_LIMIT
            );
        }
    }

    message.trim_end().to_string()
}

/// Render the current command reply, or `None` when nothing is current.
pub fn format_current(state: &PlaybackState) -> Option<String> {
    let current = state.current.as_ref()?;
    let mut message = format!(
        "[b]Now Playing:[/b]\n{}\nDuration: {}\nRequested by: {}",
        current.title(),
        current.duration(),
        current.requested_by()
    );
    if state.is_paused() {
        message.push_str("\n[PAUSED]");
    }
    Some(message)
}

pub fn format_search_results(results: &[TrackInfo]) -> String {
    let mut message = String::from("[b]Search Results:[/b]\n");
    for (i, info) in results.iter().enumerate() {
        let _ = writeln!(
            message,
            "{}. {} [{}] by {}",
            i + 1,
            info.title,
            info.duration,
            info.author_display()
        );
        let _ = writeln!(message, "   URL: {}", info.source_ref);
    }
    message.trim_end().to_string()
}

pub fn help_text(prefix: &str) -> String {
    [
        ("play <URL/query>", "Play a song or add to queue"),
        ("skip", "Skip current song"),
        ("queue", "Show current queue"),
        ("search <query>", "Search YouTube"),
        ("pause", "Pause playback"),
        ("resume", "Resume playback"),
        ("stop", "Stop playback and clear queue"),
        ("current", "Show current song"),
        ("remove <position>", "Remove song from queue"),
        ("clear", "Clear queue"),
        ("volume [0-100]", "Set or show volume"),
        ("help", "Show this help message"),
    ]
    .iter()
    .fold(String::from("[b]Available Commands:[/b]"), |mut text, (usage, what)| {
        let _ = write!(text, "\n{prefix}{usage} - {what}");
        text
    })
}
