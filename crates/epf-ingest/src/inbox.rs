//! Inbox directories: finding candidate files and moving them out afterwards

use chrono::{DateTime, Local};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::{IngestError, Result};

/// Timestamp appended to dispositioned files, down to the microsecond
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%6f";

/// A candidate file found in the ready inbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// File name without directories; also the target table name
    ///
    /// Names that are not valid UTF-8 are decoded lossily, which leaves a
    /// replacement character that table name validation rejects.
    pub filename: String,
    pub path: PathBuf,
}

/// List every regular file under `ready_path`, sorted by path
///
/// Hidden files are listed like any other so they get dispositioned too.
/// Unreadable entries are logged and skipped.
pub fn discover(ready_path: &Path) -> Result<Vec<DiscoveredFile>> {
    if !ready_path.is_dir() {
        return Err(IngestError::config(format!(
            "ready inbox '{}' is not a directory",
            ready_path.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(ready_path).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable inbox entry");
                continue;
            },
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let filename = entry.file_name().to_string_lossy();
        if matches!(filename, std::borrow::Cow::Owned(_)) {
            warn!(path = %entry.path().display(), "File name is not valid UTF-8");
        }

        files.push(DiscoveredFile {
            filename: filename.into_owned(),
            path: entry.path().to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(inbox = %ready_path.display(), count = files.len(), "Discovered files");
    Ok(files)
}

/// `<filename>_<timestamp>`
pub fn timestamped_name(filename: &str, at: DateTime<Local>) -> String {
    format!("{}_{}", filename, at.format(TIMESTAMP_FORMAT))
}

/// Moves processed files into the finished or failed inbox
#[derive(Debug, Clone, Copy, Default)]
pub struct FileMover;

impl FileMover {
    pub fn new() -> Self {
        Self
    }

    /// Move `source` into `destination_dir` under a timestamped name
    ///
    /// Returns the new path, or `None` if the file could not be moved; in that
    /// case the error is logged and the file stays where it was.
    pub async fn relocate(
        &self,
        filename: &str,
        source: &Path,
        destination_dir: &Path,
        message: &str,
    ) -> Option<PathBuf> {
        match self
            .try_relocate(filename, source, destination_dir, Local::now())
            .await
        {
            Ok(destination) => {
                info!(
                    file = %filename,
                    destination = %destination.display(),
                    "{}",
                    message
                );
                Some(destination)
            },
            Err(e) => {
                error!(file = %filename, error = %e, "{}", message);
                None
            },
        }
    }

    async fn try_relocate(
        &self,
        filename: &str,
        source: &Path,
        destination_dir: &Path,
        at: DateTime<Local>,
    ) -> Result<PathBuf> {
        let move_error = |destination: &Path, source_err: std::io::Error| IngestError::Move {
            file: filename.to_string(),
            destination: destination.to_path_buf(),
            source: source_err,
        };

        tokio::fs::create_dir_all(destination_dir)
            .await
            .map_err(|e| move_error(destination_dir, e))?;

        let base = timestamped_name(filename, at);
        let destination = place(source, destination_dir, &base)
            .await
            .map_err(|e| move_error(&destination_dir.join(&base), e))?;

        if let Err(remove_err) = tokio::fs::remove_file(source).await {
            warn!(
                file = %filename,
                source = %source.display(),
                error = %remove_err,
                "Placed file but could not remove the original"
            );
        }

        Ok(destination)
    }
}

/// Create `dir/base` (or `dir/base_<n>` if taken) holding the contents of
/// `source`, leaving `source` in place
///
/// The destination is claimed atomically, by hard link or by an exclusive
/// create when linking is not possible, so an existing file is never
/// replaced even when two movers pick the same name.
async fn place(source: &Path, dir: &Path, base: &str) -> std::io::Result<PathBuf> {
    let mut n = 0;
    loop {
        let candidate = if n == 0 {
            dir.join(base)
        } else {
            dir.join(format!("{}_{}", base, n))
        };

        let claimed = match tokio::fs::hard_link(source, &candidate).await {
            Err(e) if e.kind() != ErrorKind::AlreadyExists && e.kind() != ErrorKind::NotFound => {
                debug!(source = %source.display(), error = %e, "Hard link failed, copying instead");
                copy_new(source, &candidate).await
            },
            linked => linked,
        };

        match claimed {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Copy `source` to a destination that must not exist yet
async fn copy_new(source: &Path, destination: &Path) -> std::io::Result<()> {
    let mut reader = tokio::fs::File::open(source).await?;
    let mut writer = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)
        .await?;

    if let Err(e) = tokio::io::copy(&mut reader, &mut writer).await {
        drop(writer);
        let _ = tokio::fs::remove_file(destination).await;
        return Err(e);
    }
    writer.sync_all().await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"data").unwrap();
        path
    }

    #[test]
    fn test_timestamped_name_format() {
        let at = Local
            .with_ymd_and_hms(2024, 3, 7, 9, 5, 1)
            .unwrap()
            + chrono::Duration::microseconds(42);
        assert_eq!(timestamped_name("artist", at), "artist_20240307090501000042");
    }

    #[test]
    fn test_discover_sorted_including_hidden() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "song");
        touch(dir.path(), "artist");
        touch(dir.path(), ".DS_Store");
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        touch(&dir.path().join("nested"), "collection");
        std::fs::create_dir(dir.path().join(".hidden")).unwrap();
        touch(&dir.path().join(".hidden"), "genre");

        let names: Vec<String> = discover(dir.path())
            .unwrap()
            .into_iter()
            .map(|f| f.filename)
            .collect();

        assert_eq!(names, vec![".DS_Store", "genre", "artist", "collection", "song"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_discover_keeps_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let name = OsStr::from_bytes(b"art\xffist");
        std::fs::write(dir.path().join(name), b"data").unwrap();

        let files = discover(dir.path()).unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "art\u{FFFD}ist");
        assert_eq!(files[0].path, dir.path().join(name));
    }

    #[test]
    fn test_discover_missing_inbox_fails() {
        let dir = TempDir::new().unwrap();
        assert!(discover(&dir.path().join("absent")).is_err());
    }

    #[tokio::test]
    async fn test_relocate_moves_with_timestamp() {
        let dir = TempDir::new().unwrap();
        let source = touch(dir.path(), "artist");
        let finished = dir.path().join("finished");

        let moved = FileMover::new()
            .relocate("artist", &source, &finished, "done")
            .await
            .unwrap();

        assert!(!source.exists());
        assert_eq!(moved.parent().unwrap(), finished);
        let name = moved.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("artist_"));
        assert_eq!(name.len(), "artist_".len() + 20);
        assert_eq!(std::fs::read(&moved).unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_relocate_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let failed = dir.path().join("failed");
        let mover = FileMover::new();

        let first = touch(dir.path(), "artist");
        let a = mover.relocate("artist", &first, &failed, "x").await.unwrap();
        let second = touch(dir.path(), "artist");
        let b = mover.relocate("artist", &second, &failed, "x").await.unwrap();

        assert_ne!(a, b);
        assert_eq!(std::fs::read_dir(&failed).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_relocate_same_instant_keeps_every_file() {
        let dir = TempDir::new().unwrap();
        let failed = dir.path().join("failed");
        std::fs::create_dir(&failed).unwrap();
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        let taken = failed.join(timestamped_name("artist", at));
        std::fs::write(&taken, b"earlier").unwrap();

        let first = dir.path().join("one");
        let second = dir.path().join("two");
        std::fs::write(&first, b"first").unwrap();
        std::fs::write(&second, b"second").unwrap();

        let mover = FileMover::new();
        let (a, b) = tokio::join!(
            mover.try_relocate("artist", &first, &failed, at),
            mover.try_relocate("artist", &second, &failed, at),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a, b);
        assert_ne!(a, taken);
        assert_ne!(b, taken);
        assert_eq!(std::fs::read(&taken).unwrap(), b"earlier");
        assert_eq!(std::fs::read_dir(&failed).unwrap().count(), 3);
        let mut contents = vec![std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap()];
        contents.sort();
        assert_eq!(contents, vec![b"first".to_vec(), b"second".to_vec()]);
        assert!(!first.exists());
        assert!(!second.exists());
    }

    #[tokio::test]
    async fn test_relocate_missing_source_returns_none() {
        let dir = TempDir::new().unwrap();
        let moved = FileMover::new()
            .relocate("ghost", &dir.path().join("ghost"), dir.path(), "x")
            .await;
        assert!(moved.is_none());
    }
}
