use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

use crate::errors::Result;

/// Flat on-disk staging area for fetched files. Collision avoidance rests
/// on identifier uniqueness, not locks: concurrent writers never share an
/// identifier.
pub struct DownloadStore {
    dir: PathBuf,
    counter: AtomicU64,
}

impl DownloadStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Opaque 128-bit identifier: SHA-256 over the URL, a wall-clock
    /// nanosecond sample and a process-monotonic counter, truncated to
    /// 16 bytes. The counter disambiguates calls within one clock tick.
    pub fn new_identifier(&self, url: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);

        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(seq.to_le_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..16])
    }

    /// Engine output template; the engine substitutes the extension.
    pub fn output_template(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.%(ext)s"))
    }

    /// Finds the staged file for an identifier, whatever extension the
    /// engine chose. Ignores in-progress `.part`/`.ytdl` companions.
    pub async fn find_file(&self, id: &str) -> Option<PathBuf> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(id) && !name.ends_with(".part") && !name.ends_with(".ytdl") {
                return Some(entry.path());
            }
        }
        None
    }

    /// Removes every file belonging to an identifier, partial outputs
    /// included. Idempotent; missing files are not an error.
    pub async fn discard(&self, id: &str) {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name().to_string_lossy().starts_with(id) {
                if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                    warn!("Failed to discard {:?}: {e}", entry.path());
                }
            }
        }
    }

    /// Schedules eager deletion of a streamed file. Non-blocking for the
    /// handler path; deletion failures are logged, never surfaced.
    pub fn schedule_removal(&self, path: PathBuf, delay: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => info!("Cleaned up file: {path:?}"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Error cleaning up file {path:?}: {e}"),
            }
        });
    }

    /// Free bytes on the filesystem backing the store, for health checks.
    pub fn free_disk_bytes(&self) -> std::io::Result<u64> {
        fs2::available_space(&self.dir)
    }
}

/// Deletes regular files older than `window`. Returns how many were
/// removed; an empty directory is a no-op.
pub async fn sweep(dir: &Path, window: Duration) -> std::io::Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let meta = match entry.metadata().await {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        if !meta.is_file() {
            continue;
        }
        // Creation time is not available on every filesystem; fall back
        // to the modification time, which the engine only touches while
        // writing.
        let stamp = meta.created().or_else(|_| meta.modified());
        let age = stamp
            .ok()
            .and_then(|t| SystemTime::now().duration_since(t).ok());
        if let Some(age) = age {
            if age > window {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => {
                        info!("Removed old file: {:?}", entry.path());
                        removed += 1;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!("Error removing old file {:?}: {e}", entry.path()),
                }
            }
        }
    }
    Ok(removed)
}

/// Background sweeper. Tolerates files appearing and disappearing under
/// it; handlers never wait on it.
pub fn spawn_reaper(
    dir: PathBuf,
    window: Duration,
    tick: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        // The first tick of a tokio interval fires immediately; skip it
        // so a fresh start does not race startup file creation.
        interval.tick().await;
        loop {
            interval.tick().await;
            match sweep(&dir, window).await {
                Ok(0) => debug!("Reaper sweep: nothing to remove"),
                Ok(n) => info!("Reaper sweep removed {n} stale file(s)"),
                Err(e) => error!("Reaper sweep failed: {e}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    async fn temp_store() -> (tempfile::TempDir, DownloadStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn identifiers_are_unique_per_call() {
        let (_dir, store) = temp_store().await;
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = store.new_identifier("https://example.com/watch?v=abc");
            assert_eq!(id.len(), 32, "128 bits hex-encoded");
            assert!(seen.insert(id), "identifier collided");
        }
    }

    #[tokio::test]
    async fn find_file_skips_partial_outputs() {
        let (dir, store) = temp_store().await;
        let id = store.new_identifier("u");
        tokio::fs::write(dir.path().join(format!("{id}.mp4.part")), b"x")
            .await
            .unwrap();
        assert!(store.find_file(&id).await.is_none());

        tokio::fs::write(dir.path().join(format!("{id}.mp4")), b"x")
            .await
            .unwrap();
        let found = store.find_file(&id).await.unwrap();
        assert_eq!(found.extension().unwrap(), "mp4");
    }

    #[tokio::test]
    async fn discard_removes_partials_and_is_idempotent() {
        let (dir, store) = temp_store().await;
        let id = store.new_identifier("u");
        tokio::fs::write(dir.path().join(format!("{id}.mp4")), b"x")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join(format!("{id}.mp4.part")), b"x")
            .await
            .unwrap();

        store.discard(&id).await;
        store.discard(&id).await;
        assert!(store.find_file(&id).await.is_none());
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_on_empty_directory_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let removed = sweep(dir.path(), Duration::from_secs(0)).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn sweep_removes_files_older_than_window() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("stale.mp4"), b"x")
            .await
            .unwrap();
        // Zero window: everything qualifies as stale.
        let removed = sweep(dir.path(), Duration::from_secs(0)).await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn sweep_keeps_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("fresh.mp4"), b"x")
            .await
            .unwrap();
        let removed = sweep(dir.path(), Duration::from_secs(3600)).await.unwrap();
        assert_eq!(removed, 0);
        assert!(dir.path().join("fresh.mp4").exists());
    }

    #[tokio::test]
    async fn scheduled_removal_deletes_after_delay() {
        let (dir, store) = temp_store().await;
        let path = dir.path().join("done.mp4");
        tokio::fs::write(&path, b"x").await.unwrap();

        store.schedule_removal(path.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!path.exists());
    }
}
