//! # tunebot-cache
//!
//! On-disk cache of downloaded audio for Tunebot.
//!
//! Files live in a single directory, named by a hash of the track's source
//! ID. A `SQLite` index tracks sizes and access times so old downloads can be
//! cleaned up.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use parking_lot::Mutex;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use tunebot_core::{Error, Result};

/// Extension of cached audio files.
const AUDIO_EXTENSION: &str = "opus";

/// Index database file name; its journal files share the prefix.
const DB_FILE_NAME: &str = "cache.db";

/// Cache of downloaded audio keyed by source ID.
#[derive(Clone)]
pub struct AudioCache {
    /// `SQLite` database connection.
    db: Arc<Mutex<Connection>>,
    /// Cache directory path.
    cache_dir: PathBuf,
}

impl AudioCache {
    /// Create a cache in the platform cache directory.
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("com", "tunebot", "Tunebot")
            .ok_or_else(|| Error::Cache("Failed to determine cache directory".to_string()))?;

        Self::with_path(project_dirs.cache_dir().join("audio"))
    }

    /// Create a cache rooted at a custom path.
    pub fn with_path(cache_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&cache_dir)
            .map_err(|e| Error::Cache(format!("Failed to create cache directory: {e}")))?;

        let db_path = cache_dir.join(DB_FILE_NAME);
        let db = Connection::open(&db_path)
            .map_err(|e| Error::Cache(format!("Failed to open database: {e}")))?;

        db.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS audio_cache (
                source_id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                cached_at TEXT NOT NULL,
                last_accessed TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audio_last_accessed ON audio_cache(last_accessed);
            ",
        )
        .map_err(|e| Error::Cache(format!("Failed to initialize database: {e}")))?;

        info!("Audio cache initialized at {}", cache_dir.display());

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            cache_dir,
        })
    }

    /// Get the cache directory path.
    pub const fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    /// Where the audio for `source_id` lives (or will live) on disk.
    pub fn path_for(&self, source_id: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{AUDIO_EXTENSION}", Self::hash_key(source_id)))
    }

    /// Return the cached file for `source_id`, if a non-empty one exists.
    ///
    /// Files left behind by an earlier run without an index row are adopted.
    /// Empty files are treated as broken downloads and removed.
    pub fn lookup(&self, source_id: &str) -> Option<PathBuf> {
        let path = self.path_for(source_id);
        match fs::metadata(&path) {
            Ok(meta) if meta.len() > 0 => {
                if let Err(e) = self.upsert(source_id, &path, meta.len()) {
                    warn!("Failed to touch cache entry for {source_id}: {e}");
                }
                Some(path)
            }
            Ok(_) => {
                debug!("Removing empty cache file for {source_id}");
                let _ = fs::remove_file(&path);
                self.delete_row(source_id);
                None
            }
            Err(_) => {
                self.delete_row(source_id);
                None
            }
        }
    }

    /// Check if audio is cached for a source ID.
    pub fn contains(&self, source_id: &str) -> bool {
        fs::metadata(self.path_for(source_id)).is_ok_and(|m| m.len() > 0)
    }

    /// Index a file that was just written to [`path_for`](Self::path_for).
    pub fn record(&self, source_id: &str) -> Result<PathBuf> {
        let path = self.path_for(source_id);
        let size = fs::metadata(&path)
            .map_err(|e| Error::Cache(format!("Downloaded file missing: {e}")))?
            .len();
        if size == 0 {
            let _ = fs::remove_file(&path);
            return Err(Error::Cache(format!("Downloaded file for {source_id} is empty")));
        }

        self.upsert(source_id, &path, size)?;
        debug!("Cached {size} bytes for {source_id} at {}", path.display());
        Ok(path)
    }

    /// Remove one entry and its file. Returns true if anything was removed.
    pub fn remove(&self, source_id: &str) -> bool {
        let path = self.path_for(source_id);
        let removed_file = fs::remove_file(&path).is_ok();
        let removed_row = self.delete_row(source_id);
        removed_file || removed_row
    }

    /// Remove entries not accessed within `max_age`, plus unindexed files
    /// (partial downloads, leftovers) last modified before the cutoff.
    /// Returns how many files went.
    pub fn cleanup(&self, max_age: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;

        let stale: Vec<(String, String)> = {
            let db = self.db.lock();
            let mut stmt = db
                .prepare("SELECT source_id, file_path, last_accessed FROM audio_cache")
                .map_err(|e| Error::Cache(format!("Failed to query cache: {e}")))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(|e| Error::Cache(format!("Failed to query cache: {e}")))?;

            rows.filter_map(std::result::Result::ok)
                .filter(|(_, _, accessed)| {
                    DateTime::parse_from_rfc3339(accessed).map_or(true, |t| t < cutoff)
                })
                .map(|(id, path, _)| (id, path))
                .collect()
        };

        for (source_id, file_path) in &stale {
            if let Err(e) = fs::remove_file(file_path) {
                debug!("Cache file for {source_id} already gone: {e}");
            }
            self.delete_row(source_id);
            info!("Cleaned up old download: {source_id}");
        }

        let cutoff = SystemTime::from(cutoff);
        let mut swept = 0;
        for path in self.stray_files() {
            let old = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .map_or(true, |modified| modified < cutoff);
            if old && fs::remove_file(&path).is_ok() {
                info!("Cleaned up stray file: {}", path.display());
                swept += 1;
            }
        }

        Ok(stale.len() + swept)
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let db = self.db.lock();

        let audio_count: i64 = db
            .query_row("SELECT COUNT(*) FROM audio_cache", [], |row| row.get(0))
            .unwrap_or(0);

        let audio_size: i64 = db
            .query_row(
                "SELECT COALESCE(SUM(size_bytes), 0) FROM audio_cache",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        CacheStats {
            audio_count: audio_count as usize,
            audio_size_bytes: audio_size as u64,
        }
    }

    /// Clear all cached audio.
    pub fn clear(&self) -> Result<()> {
        let paths: Vec<String> = {
            let db = self.db.lock();
            let mut stmt = db
                .prepare("SELECT file_path FROM audio_cache")
                .map_err(|e| Error::Cache(format!("Failed to query cache: {e}")))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| Error::Cache(format!("Failed to query cache: {e}")))?;
            rows.filter_map(std::result::Result::ok).collect()
        };

        for path in paths {
            let _ = fs::remove_file(path);
        }
        for path in self.stray_files() {
            let _ = fs::remove_file(path);
        }

        self.db
            .lock()
            .execute("DELETE FROM audio_cache", [])
            .map_err(|e| Error::Cache(format!("Failed to clear cache: {e}")))?;

        info!("Audio cache cleared");
        Ok(())
    }

    /// Files in the cache directory that have no index row, database excluded.
    fn stray_files(&self) -> Vec<PathBuf> {
        let indexed = self.indexed_paths();
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list cache directory: {e}");
                return Vec::new();
            }
        };

        entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && !indexed.contains(path)
                    && !path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with(DB_FILE_NAME))
            })
            .collect()
    }

    fn indexed_paths(&self) -> HashSet<PathBuf> {
        let db = self.db.lock();
        let Ok(mut stmt) = db.prepare("SELECT file_path FROM audio_cache") else {
            return HashSet::new();
        };
        let rows = match stmt.query_map([], |row| row.get::<_, String>(0)) {
            Ok(rows) => rows,
            Err(_) => return HashSet::new(),
        };
        rows.filter_map(std::result::Result::ok)
            .map(PathBuf::from)
            .collect()
    }

    fn upsert(&self, source_id: &str, path: &Path, size: u64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock();
        db.execute(
            "INSERT INTO audio_cache (source_id, file_path, size_bytes, cached_at, last_accessed)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(source_id) DO UPDATE SET
                file_path = excluded.file_path,
                size_bytes = excluded.size_bytes,
                last_accessed = excluded.last_accessed",
            rusqlite::params![source_id, path.to_string_lossy(), size as i64, now],
        )
        .map_err(|e| Error::Cache(format!("Failed to index audio: {e}")))?;
        Ok(())
    }

    fn delete_row(&self, source_id: &str) -> bool {
        let db = self.db.lock();
        db.execute("DELETE FROM audio_cache WHERE source_id = ?", [source_id])
            .map(|n| n > 0)
            .unwrap_or(false)
    }

    /// File-system safe key for a source ID.
    fn hash_key(source_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source_id.as_bytes());
        hex::encode(hasher.finalize())
    }

    #[cfg(test)]
    fn backdate(&self, source_id: &str, when: DateTime<Utc>) {
        let db = self.db.lock();
        db.execute(
            "UPDATE audio_cache SET last_accessed = ? WHERE source_id = ?",
            rusqlite::params![when.to_rfc3339(), source_id],
        )
        .ok();
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cached audio files.
    pub audio_count: usize,
    /// Total size of cached audio in bytes.
    pub audio_size_bytes: u64,
}

impl CacheStats {
    /// Get the total audio size in megabytes.
    pub fn audio_size_mb(&self) -> f64 {
        self.audio_size_bytes as f64 / (1024.0 * 1024.0)
    }
}
