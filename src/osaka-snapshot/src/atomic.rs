//! Durable file writes.
//!
//! Content reaches its final name only after it has been synced:
//! 1. Write to a temporary file in the target directory
//! 2. Sync the temporary file (fsync)
//! 3. Rename it over the target (atomic on POSIX)
//! 4. Sync the parent directory so the rename itself survives a crash

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `data` to `path` so that a crash leaves either the old content or
/// the new content, never a prefix of the new content.
///
/// Parent directories are created when missing.
pub fn write_durable(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let temp_path = parent.join(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let written = (|| {
        let mut temp = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        temp.write_all(data)?;
        temp.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    sync_dir(parent)?;
    debug!(path = %path.display(), bytes = data.len(), "durable write completed");
    Ok(())
}

/// Whether `err` means nothing exists at the path, including a path whose
/// parent is a regular file.
pub fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Remove `path` and sync its parent directory.
///
/// Removing a file that is already gone is not an error.
pub fn durable_remove(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if is_missing(&err) => return Ok(()),
        Err(err) => return Err(err),
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        sync_dir(parent)?;
    }
    debug!(path = %path.display(), "durable remove completed");
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

// Directory handles cannot be synced on Windows; the rename is already
// durable once the file data has been flushed.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
