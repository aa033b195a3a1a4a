//! Console adapters: replies on stdout, PCM to a file or FIFO, and a
//! config-backed identity directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use tunebot_core::{ChatTransport, Error, Frame, IdentityLookup, Invoker, Result, VoiceSink};

/// Prints replies to stdout, one block per reply.
pub struct ConsoleTransport {
    stdout: AsyncMutex<Stdout>,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self {
            stdout: AsyncMutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn send_text(&self, to: &Invoker, text: &str) -> Result<()> {
        let block = format!("[to {}] {}\n", to.nickname, strip_markup(text));
        let mut stdout = self.stdout.lock().await;
        stdout
            .write_all(block.as_bytes())
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        stdout.flush().await.map_err(|e| Error::Transport(e.to_string()))
    }
}

/// Drop the `[b]` bold tags, which a terminal cannot render.
fn strip_markup(text: &str) -> String {
    text.replace("[b]", "").replace("[/b]", "")
}

/// Writes raw s16le PCM to a file or FIFO.
pub struct PcmFileSink {
    path: PathBuf,
    file: AsyncMutex<File>,
}

impl PcmFileSink {
    /// Open `path` for writing. Opening a FIFO waits for a reader.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).await.map_err(|e| {
            Error::Transport(format!("Failed to open voice output {}: {e}", path.display()))
        })?;
        info!("Writing PCM to {}", path.display());
        Ok(Self {
            path,
            file: AsyncMutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl VoiceSink for PcmFileSink {
    async fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.file
            .lock()
            .await
            .write_all(&frame.to_le_bytes())
            .await
            .map_err(|e| Error::Transport(format!("Failed to write PCM: {e}")))
    }
}

/// Accepts and discards every frame.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl VoiceSink for NullSink {
    async fn send_frame(&self, _frame: &Frame) -> Result<()> {
        Ok(())
    }
}

/// Group memberships read from the `[directory]` config table.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    groups: HashMap<String, Vec<u32>>,
}

impl StaticDirectory {
    pub const fn new(groups: HashMap<String, Vec<u32>>) -> Self {
        Self { groups }
    }
}

#[async_trait]
impl IdentityLookup for StaticDirectory {
    async fn groups(&self, invoker: &Invoker) -> Result<Vec<u32>> {
        let groups = self.groups.get(&invoker.uid).cloned().unwrap_or_default();
        debug!("{} is in groups {groups:?}", invoker.uid);
        Ok(groups)
    }
}
