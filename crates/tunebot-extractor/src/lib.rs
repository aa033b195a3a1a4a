//! # tunebot-extractor
//!
//! `YouTube` resolution and audio download for Tunebot using yt-dlp.
//!
//! Features:
//! - Links, bare video IDs and free-text search resolve to a single track
//! - Downloads land in the shared [`AudioCache`] for instant repeated plays
//! - Concurrent fetches of the same track share one download

pub mod link;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use tunebot_cache::AudioCache;
use tunebot_core::{Error, MediaResolver, Result, TrackInfo};

/// Authentication method for yt-dlp.
#[derive(Debug, Clone, Default)]
pub enum AuthMethod {
    /// Use cookies from a browser profile.
    BrowserCookies(String),
    /// No authentication.
    #[default]
    None,
}

impl AuthMethod {
    fn to_args(&self) -> Vec<String> {
        match self {
            Self::BrowserCookies(browser) => {
                vec!["--cookies-from-browser".to_string(), browser.clone()]
            }
            Self::None => vec![],
        }
    }
}

/// One line of `yt-dlp --dump-json` output.
#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    id: String,
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
    webpage_url: Option<String>,
}

impl YtDlpEntry {
    fn into_track_info(self) -> TrackInfo {
        let source_ref = self
            .webpage_url
            .filter(|u| u.starts_with("http"))
            .unwrap_or_else(|| link::watch_url(&self.id));
        let duration = self.duration.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(0.0);

        let mut info = TrackInfo::new(self.id, self.title.unwrap_or_else(|| "Unknown title".into()))
            .with_duration(duration.round() as u64)
            .with_source_ref(source_ref);
        if let Some(author) = self.uploader.or(self.channel) {
            info = info.with_author(author);
        }
        info
    }
}

/// Parse newline-delimited yt-dlp JSON, skipping lines that do not parse.
fn parse_entries(stdout: &[u8]) -> Vec<TrackInfo> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<YtDlpEntry>(line) {
            Ok(entry) => Some(entry.into_track_info()),
            Err(e) => {
                debug!("Skipping unparseable yt-dlp line: {e}");
                None
            }
        })
        .collect()
}

/// `YouTube` resolver and downloader backed by yt-dlp and a disk cache.
pub struct YtDlpResolver {
    yt_dlp_path: PathBuf,
    cache: AudioCache,
    auth_method: AuthMethod,
    /// One lock per source ID so concurrent requests share a download.
    fetch_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl YtDlpResolver {
    /// Create a resolver using `yt_dlp_path` and storing downloads in `cache`.
    pub fn new(yt_dlp_path: impl Into<PathBuf>, cache: AudioCache) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
            cache,
            auth_method: AuthMethod::default(),
            fetch_locks: DashMap::new(),
        }
    }

    /// Set the authentication method.
    #[must_use]
    pub fn with_auth_method(mut self, auth_method: AuthMethod) -> Self {
        self.auth_method = auth_method;
        self
    }

    /// Check that the yt-dlp binary runs.
    pub async fn check_installed(&self) -> bool {
        self.command()
            .arg("--version")
            .output()
            .await
            .is_ok_and(|output| output.status.success())
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.yt_dlp_path);
        command
            .args(self.auth_method.to_args())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    /// Run yt-dlp with `--dump-json` and return parsed entries.
    async fn dump_json(&self, extra: &[&str], target: &str) -> Result<Vec<TrackInfo>> {
        let output = self
            .command()
            .args(["--dump-json", "--no-warnings", "--skip-download"])
            .args(extra)
            .arg(target)
            .output()
            .await
            .map_err(|e| Error::Resolution(format!("Failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp stderr: {}", stderr.trim());
            return Err(Error::Resolution(
                stderr
                    .lines()
                    .find(|l| l.starts_with("ERROR"))
                    .unwrap_or("Failed to get video information")
                    .to_string(),
            ));
        }

        Ok(parse_entries(&output.stdout))
    }

    async fn download(&self, track: &TrackInfo, dest: &Path) -> Result<()> {
        info!("Cache miss - downloading {}", track.source_id);
        let mut partial = PartialDownload::new(dest);

        let output = self
            .command()
            .arg(&track.source_ref)
            .args([
                "-f",
                "bestaudio/best",
                "-x",
                "--audio-format",
                "opus",
                "--audio-quality",
                "0",
                "--no-playlist",
                "--quiet",
                "--no-warnings",
                "-o",
            ])
            .arg(dest)
            .stdout(Stdio::null())
            .output()
            .await;

        let failure = match output {
            Ok(output) if output.status.success() => None,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!("yt-dlp stderr: {}", stderr.trim());
                Some(format!(
                    "yt-dlp failed: {}",
                    stderr.lines().next().unwrap_or("Unknown error")
                ))
            }
            Err(e) => Some(format!("Failed to run yt-dlp: {e}")),
        };

        if let Some(message) = failure {
            return Err(Error::Fetch(message));
        }
        partial.keep();
        Ok(())
    }
}

/// Removes a download's output and `.part` file on drop unless kept.
///
/// Runs on failure and when the fetch future is dropped mid-download.
struct PartialDownload {
    paths: [PathBuf; 2],
    keep: bool,
}

impl PartialDownload {
    fn new(dest: &Path) -> Self {
        let mut part = dest.as_os_str().to_owned();
        part.push(".part");
        Self {
            paths: [dest.to_path_buf(), PathBuf::from(part)],
            keep: false,
        }
    }

    fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for PartialDownload {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        for path in &self.paths {
            if std::fs::remove_file(path).is_ok() {
                debug!("Removed partial download {}", path.display());
            }
        }
    }
}

/// Drops the fetch lock entry for a source ID once nobody holds or awaits it.
struct FetchLockRelease<'a> {
    locks: &'a DashMap<String, Arc<AsyncMutex<()>>>,
    source_id: &'a str,
}

impl Drop for FetchLockRelease<'_> {
    fn drop(&mut self) {
        self.locks
            .remove_if(self.source_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, input: &str) -> Result<TrackInfo> {
        let target = link::video_id(input).map_or_else(
            || format!("ytsearch1:{}", input.trim()),
            |id| link::watch_url(&id),
        );
        debug!("Resolving {input:?} via {target}");

        self.dump_json(&["--no-playlist"], &target)
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NoResults)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackInfo>> {
        let target = format!("ytsearch{}:{}", limit.max(1), query.trim());
        let results = self.dump_json(&["--flat-playlist"], &target).await?;
        debug!("Search {query:?} returned {} results", results.len());
        Ok(results)
    }

    async fn fetch(&self, track: &TrackInfo) -> Result<PathBuf> {
        // Declared before the lock handle so it drops after it.
        let _release = FetchLockRelease {
            locks: &self.fetch_locks,
            source_id: &track.source_id,
        };
        let lock = self
            .fetch_locks
            .entry(track.source_id.clone())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        if let Some(path) = self.cache.lookup(&track.source_id) {
            info!("Using cached file for {}", track.source_id);
            Ok(path)
        } else {
            let dest = self.cache.path_for(&track.source_id);
            self.download(track, &dest).await?;
            info!("Downloaded: {}", track.source_id);
            self.cache.record(&track.source_id)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_parse_full_entry() {
        let line = br#"{"id":"dQw4w9WgXcQ","title":"Never Gonna Give You Up","duration":212.0,"uploader":"Rick Astley","webpage_url":"https://www.youtube.com/watch?v=dQw4w9WgXcQ"}"#;
        let entries = parse_entries(line);
        assert_eq!(entries.len(), 1);
        let info = &entries[0];
        assert_eq!(info.source_id, "dQw4w9WgXcQ");
        assert_eq!(info.duration.as_seconds(), 212);
        assert_eq!(info.author_display(), "Rick Astley");
        assert_eq!(info.source_ref, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn test_parse_flat_entries_with_gaps() {
        let stdout = b"{\"id\":\"aaaaaaaaaaa\",\"title\":\"A\",\"channel\":\"Chan\"}\n\nnot json\n{\"id\":\"bbbbbbbbbbb\",\"title\":null,\"duration\":null}\n";
        let entries = parse_entries(stdout);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].author_display(), "Chan");
        assert_eq!(entries[0].source_ref, link::watch_url("aaaaaaaaaaa"));
        assert_eq!(entries[1].title, "Unknown title");
        assert_eq!(entries[1].duration.as_seconds(), 0);
    }

    #[test]
    fn test_auth_args() {
        assert!(AuthMethod::None.to_args().is_empty());
        assert_eq!(
            AuthMethod::BrowserCookies("firefox".into()).to_args(),
            vec!["--cookies-from-browser", "firefox"]
        );
    }

    #[tokio::test]
    async fn test_fetch_uses_cache_without_running_yt_dlp() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::with_path(dir.path().to_path_buf()).unwrap();
        std::fs::write(cache.path_for("dQw4w9WgXcQ"), b"OggS").unwrap();

        let resolver = YtDlpResolver::new("/nonexistent/yt-dlp", cache);
        let info = TrackInfo::new("dQw4w9WgXcQ", "cached");
        let path = resolver.fetch(&info).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_a_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::with_path(dir.path().to_path_buf()).unwrap();
        let resolver = YtDlpResolver::new("/nonexistent/yt-dlp", cache);

        let err = resolver
            .fetch(&TrackInfo::new("missing0000", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
        assert!(resolver.fetch_locks.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_fetch_removes_part_file_and_lock() {
        use std::os::unix::fs::PermissionsExt;

        // Stand-in yt-dlp that writes a part file for its `-o` target and hangs.
        let bin = tempfile::tempdir().unwrap();
        let script = bin.path().join("yt-dlp");
        std::fs::write(
            &script,
            "#!/bin/sh\nfor last; do :; done\necho partial > \"$last.part\"\nsleep 30\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::with_path(dir.path().to_path_buf()).unwrap();
        let mut part = cache.path_for("hang0000000").into_os_string();
        part.push(".part");
        let part = PathBuf::from(part);

        let resolver = YtDlpResolver::new(&script, cache);
        let info = TrackInfo::new("hang0000000", "hangs");
        let mut fetch = Box::pin(resolver.fetch(&info));

        let started = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                tokio::select! {
                    result = &mut fetch => panic!("fetch finished early: {result:?}"),
                    () = tokio::time::sleep(std::time::Duration::from_millis(20)) => {
                        if part.exists() {
                            break;
                        }
                    }
                }
            }
        })
        .await;
        assert!(started.is_ok(), "yt-dlp never wrote its part file");
        assert_eq!(resolver.fetch_locks.len(), 1);

        drop(fetch);
        assert!(!part.exists());
        assert!(resolver.fetch_locks.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_without_binary_is_a_resolution_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::with_path(dir.path().to_path_buf()).unwrap();
        let resolver = YtDlpResolver::new("/nonexistent/yt-dlp", cache);
        assert!(!resolver.check_installed().await);
        let err = resolver.resolve("some song").await.unwrap_err();
        assert!(err.is_track_failure());
    }
}
