//! Name collision handling and name validation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use retrace_core::{OpError, OpResult};

/// Prefix of the hidden siblings used for temp-then-rename writes.
pub const TEMP_PREFIX: &str = ".retrace-tmp-";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Check whether anything (including a broken symlink) occupies `path`.
pub fn path_occupied(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// Split a file name into stem and extension.
///
/// Dot-files such as `.bashrc` have no extension.
fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(idx) => (&name[..idx], Some(&name[idx + 1..])),
    }
}

/// Generate an auto-renamed path to avoid conflicts.
///
/// For "file.txt", tries "file (1).txt", "file (2).txt", etc.
pub fn auto_rename_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new(""));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, extension) = split_name(&name);

    for i in 1..10_000 {
        let new_name = match extension {
            Some(ext) => format!("{} ({}).{}", stem, i, ext),
            None => format!("{} ({})", stem, i),
        };

        let new_path = parent.join(&new_name);
        if !path_occupied(&new_path) {
            return new_path;
        }
    }

    // Fallback: use timestamp
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let new_name = match extension {
        Some(ext) => format!("{}_{}.{}", stem, timestamp, ext),
        None => format!("{}_{}", stem, timestamp),
    };

    parent.join(&new_name)
}

/// Destination for placing an entry called `name` into `dest_dir`,
/// suffixed if the plain name is taken.
pub fn unique_destination(dest_dir: &Path, name: &std::ffi::OsStr) -> PathBuf {
    let candidate = dest_dir.join(name);
    if path_occupied(&candidate) {
        auto_rename_path(&candidate)
    } else {
        candidate
    }
}

/// A fresh hidden sibling of `path` for staging a write.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new(""));
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    parent.join(format!("{}{}-{}", TEMP_PREFIX, std::process::id(), n))
}

/// Validate a filename for cross-platform compatibility.
pub fn validate_filename(name: &str) -> OpResult<()> {
    let invalid = |reason: &str| {
        Err(OpError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() {
        return invalid("name cannot be empty");
    }

    if name.len() > 255 {
        return invalid("name is too long (max 255 bytes)");
    }

    for c in ['/', '\0'] {
        if name.contains(c) {
            return invalid(&format!("name cannot contain {:?}", c));
        }
    }

    #[cfg(target_os = "windows")]
    {
        for c in ['\\', ':', '*', '?', '"', '<', '>', '|'] {
            if name.contains(c) {
                return invalid(&format!("name cannot contain {:?}", c));
            }
        }
    }

    if name.starts_with(' ') || name.ends_with(' ') {
        return invalid("name cannot start or end with spaces");
    }

    if name == "." || name == ".." {
        return invalid("'.' and '..' are reserved names");
    }

    if name.ends_with('.') {
        return invalid("name cannot end with a dot");
    }

    Ok(())
}

/// Validate the last component of `path`.
pub fn validate_path_name(path: &Path) -> OpResult<()> {
    match path.file_name() {
        Some(name) => validate_filename(&name.to_string_lossy()),
        None => Err(OpError::InvalidName {
            name: path.display().to_string(),
            reason: "path has no file name".to_string(),
        }),
    }
}
