//! Attachment lifecycle: resolution, loading, post-send deletion, and the
//! orphan sweep over the uploads directory.

use crate::schema::ScheduleItem;
use crate::transport::MediaKind;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, warn};

/// Failure while resolving or loading an attachment. Always terminal for
/// the owning schedule item.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The referenced local file does not exist.
    #[error("Media file not found")]
    NotFound(PathBuf),

    /// Reading the file failed for another reason.
    #[error("Failed to read media file: {0}")]
    Io(#[from] std::io::Error),
}

/// Where an item's attachment lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedMedia {
    /// Absolute http(s) URL, handed to the transport unchanged.
    Remote(String),
    /// Path inside the managed uploads directory.
    Local(PathBuf),
}

/// Map a MIME-like string onto a protocol message kind.
///
/// Substring match, case-insensitive, image > video > audio priority;
/// anything unrecognized (including a missing type) becomes a document.
pub fn categorize(media_type: Option<&str>) -> MediaKind {
    let Some(media_type) = media_type else {
        return MediaKind::Document;
    };
    let lowered = media_type.to_lowercase();
    if lowered.contains("image") {
        MediaKind::Image
    } else if lowered.contains("video") {
        MediaKind::Video
    } else if lowered.contains("audio") {
        MediaKind::Audio
    } else {
        MediaKind::Document
    }
}

/// Manages attachments under a single uploads directory.
#[derive(Debug, Clone)]
pub struct MediaStore {
    uploads_dir: PathBuf,
}

impl MediaStore {
    /// Create a store rooted at `uploads_dir`. The directory is created on
    /// first write, not here.
    pub fn new(uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
        }
    }

    /// The managed directory.
    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Resolve an item's `media_url` to a remote URL or a local path.
    ///
    /// Local paths never escape the managed directory: an absolute or
    /// parent-traversing `media_url` is reduced to its basename before
    /// joining.
    pub fn resolve(&self, item: &ScheduleItem) -> Option<ResolvedMedia> {
        let url = item.media_url.as_deref().filter(|url| !url.is_empty())?;
        if url.starts_with("http://") || url.starts_with("https://") {
            return Some(ResolvedMedia::Remote(url.to_owned()));
        }

        let path = Path::new(url);
        let relative = if path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            path
        } else {
            Path::new(path.file_name()?)
        };
        Some(ResolvedMedia::Local(self.uploads_dir.join(relative)))
    }

    /// Read a local attachment into memory.
    pub async fn load(&self, path: &Path) -> Result<Vec<u8>, MediaError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(MediaError::NotFound(path.to_owned()))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Delete a local attachment after a successful send. Best effort: a
    /// failure is logged and swallowed.
    pub async fn delete_after_send(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Deleted media file after send"),
            Err(error) => {
                warn!(path = %path.display(), %error, "Failed to delete media file after send");
            }
        }
    }

    /// Delete every file in the uploads directory older than `max_age`
    /// whose basename is not in `active` (basenames referenced by pending
    /// items). Sentinel files like `.gitkeep` are always preserved.
    ///
    /// Returns the number of files removed.
    pub async fn sweep(&self, active: &HashSet<String>, max_age: Duration) -> std::io::Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.uploads_dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(error) => return Err(error),
        };

        let cutoff = SystemTime::now() - max_age;
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == ".gitkeep" || active.contains(&name) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(error) => {
                    warn!(file = %name, %error, "Skipping unreadable file during media sweep");
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = match metadata.modified() {
                Ok(modified) => modified,
                Err(error) => {
                    warn!(file = %name, %error, "Skipping file without mtime during media sweep");
                    continue;
                }
            };
            if modified > cutoff {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    debug!(file = %name, "Removed orphaned media file");
                    removed += 1;
                }
                Err(error) => warn!(file = %name, %error, "Failed to remove orphaned media file"),
            }
        }

        Ok(removed)
    }
}

/// Basenames of media files referenced by the given items.
pub fn active_basenames<'a>(items: impl IntoIterator<Item = &'a ScheduleItem>) -> HashSet<String> {
    items
        .into_iter()
        .filter_map(|item| item.media_url.as_deref())
        .filter(|url| !url.starts_with("http://") && !url.starts_with("https://"))
        .filter_map(|url| Path::new(url).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_priority_order() {
        assert_eq!(categorize(Some("image/png")), MediaKind::Image);
        assert_eq!(categorize(Some("VIDEO/mp4")), MediaKind::Video);
        assert_eq!(categorize(Some("audio/ogg; codecs=opus")), MediaKind::Audio);
        assert_eq!(categorize(Some("application/pdf")), MediaKind::Document);
        assert_eq!(categorize(None), MediaKind::Document);
    }

    #[test]
    fn remote_urls_pass_through() {
        let store = MediaStore::new("/tmp/uploads");
        let item = test_item(Some("https://cdn.example.com/pic.jpg"));
        assert_eq!(
            store.resolve(&item),
            Some(ResolvedMedia::Remote("https://cdn.example.com/pic.jpg".into()))
        );
    }

    #[test]
    fn relative_paths_join_uploads_dir() {
        let store = MediaStore::new("/tmp/uploads");
        let item = test_item(Some("pic.jpg"));
        assert_eq!(
            store.resolve(&item),
            Some(ResolvedMedia::Local(PathBuf::from("/tmp/uploads/pic.jpg")))
        );
    }

    #[test]
    fn traversing_paths_are_confined_to_uploads_dir() {
        let store = MediaStore::new("/tmp/uploads");
        assert_eq!(
            store.resolve(&test_item(Some("../../etc/passwd"))),
            Some(ResolvedMedia::Local(PathBuf::from("/tmp/uploads/passwd")))
        );
        assert_eq!(
            store.resolve(&test_item(Some("/etc/passwd"))),
            Some(ResolvedMedia::Local(PathBuf::from("/tmp/uploads/passwd")))
        );
        // No basename left to resolve.
        assert_eq!(store.resolve(&test_item(Some(".."))), None);
    }

    #[test]
    fn subdirectories_inside_uploads_are_allowed() {
        let store = MediaStore::new("/tmp/uploads");
        assert_eq!(
            store.resolve(&test_item(Some("thumbs/pic.jpg"))),
            Some(ResolvedMedia::Local(PathBuf::from("/tmp/uploads/thumbs/pic.jpg")))
        );
    }

    #[test]
    fn missing_media_url_resolves_to_none() {
        let store = MediaStore::new("/tmp/uploads");
        assert_eq!(store.resolve(&test_item(None)), None);
        assert_eq!(store.resolve(&test_item(Some(""))), None);
    }

    #[test]
    fn active_basenames_skip_remote_urls() {
        let local = test_item(Some("uploads/pic.jpg"));
        let remote = test_item(Some("https://cdn.example.com/other.jpg"));
        let names = active_basenames([&local, &remote]);
        assert!(names.contains("pic.jpg"));
        assert_eq!(names.len(), 1);
    }

    fn test_item(media_url: Option<&str>) -> ScheduleItem {
        ScheduleItem {
            id: 1,
            batch_id: "b".into(),
            recipient: "r".into(),
            caption: None,
            media_url: media_url.map(Into::into),
            media_type: None,
            send_at: chrono::Utc::now(),
            status: crate::schema::ScheduleStatus::Pending,
            error: None,
            retry_count: 0,
            sent_at: None,
            created_at: chrono::Utc::now(),
        }
    }
}
