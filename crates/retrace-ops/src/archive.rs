//! Zip archive creation and extraction.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use retrace_core::{normalize_path, IoResultExt, OpError, OpResult};

use crate::conflict::{path_occupied, temp_sibling, unique_destination};
use crate::copy::{calculate_totals, remove_path};
use crate::executor::OperationExecutor;
use crate::operation::{BulkOutcome, Inverse, OperationKind, OperationRecord};
use crate::progress::{ProgressReporter, ProgressSender};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Options for archive creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveOptions {
    /// Replace an existing archive (the old one goes to the trash).
    pub overwrite: bool,
    /// Deflate level; `None` uses the format default.
    pub compression_level: Option<i64>,
}

/// Creates and extracts zip archives as reversible operations.
#[derive(Debug, Clone)]
pub struct ArchiveManager {
    executor: OperationExecutor,
}

impl ArchiveManager {
    /// Create a manager that trashes overwritten archives through `executor`.
    pub fn new(executor: OperationExecutor) -> Self {
        Self { executor }
    }

    /// Pack `paths` into a new zip archive at `dest`.
    ///
    /// Entries are named relative to each path's parent. The archive is
    /// written to a hidden sibling and renamed into place when complete.
    /// With `overwrite`, an existing `dest` is trashed first and its own
    /// Delete record precedes the Archive record.
    pub fn create_archive(
        &self,
        paths: &[PathBuf],
        dest: &Path,
        options: &ArchiveOptions,
        cancel: &CancellationToken,
        tx: &ProgressSender,
    ) -> BulkOutcome {
        let dest = normalize_path(dest);
        let sources: Vec<PathBuf> = paths.iter().map(|p| normalize_path(p)).collect();
        let mut outcome = BulkOutcome::new(OperationKind::Archive);

        if sources.is_empty() {
            outcome.push(dest, Err(OpError::NothingSelected));
            return outcome;
        }
        if let Some(source) = sources.iter().find(|source| dest.starts_with(source)) {
            outcome.push(
                dest.clone(),
                Err(OpError::invalid_target(
                    &dest,
                    format!("archive cannot be placed inside '{}'", source.display()),
                )),
            );
            return outcome;
        }

        let mut names = HashSet::new();
        if let Some(source) = sources
            .iter()
            .find(|source| source.file_name().is_some_and(|name| !names.insert(name)))
        {
            outcome.push(
                source.clone(),
                Err(OpError::invalid_target(
                    source,
                    "another selected entry has the same name",
                )),
            );
            return outcome;
        }

        let replacing = path_occupied(&dest);
        if replacing && !options.overwrite {
            outcome.push(dest.clone(), Err(OpError::AlreadyExists { path: dest }));
            return outcome;
        }

        let mut progress = ProgressReporter::new(
            OperationKind::Archive,
            sources.len(),
            calculate_totals(&sources),
            tx.clone(),
        );

        let temp = temp_sibling(&dest);
        if let Err(e) = write_archive(&sources, &temp, options.compression_level, cancel, &mut progress) {
            if path_occupied(&temp) {
                let _ = remove_path(&temp);
            }
            outcome.push(dest, Err(e));
            return outcome;
        }

        if replacing {
            let trashed = self.executor.delete(&dest);
            let failed = trashed.is_err();
            outcome.push(dest.clone(), trashed);
            if failed {
                let _ = remove_path(&temp);
                return outcome;
            }
        }

        if let Err(e) = fs::rename(&temp, &dest).at(&dest) {
            let _ = remove_path(&temp);
            outcome.push(dest, Err(e));
            return outcome;
        }

        info!(archive = %dest.display(), entries = sources.len(), "archive created");
        let pairs = sources.into_iter().map(|source| (source, dest.clone())).collect();
        outcome.push(
            dest.clone(),
            Ok(OperationRecord::with_pairs(
                OperationKind::Archive,
                pairs,
                Inverse::Remove { path: dest },
            )),
        );
        outcome
    }

    /// Unpack `archive` into `dest_dir`.
    ///
    /// Entries are grouped by their top-level component. Each group is
    /// assembled in a hidden staging directory and renamed to a
    /// collision-free name, producing one Extract record. The first failure
    /// stops extraction; groups already placed keep their records.
    pub fn extract_archive(
        &self,
        archive: &Path,
        dest_dir: &Path,
        cancel: &CancellationToken,
        tx: &ProgressSender,
    ) -> BulkOutcome {
        let archive_path = normalize_path(archive);
        let dest_dir = normalize_path(dest_dir);
        let mut outcome = BulkOutcome::new(OperationKind::Extract);

        let (mut zip, groups) = match plan_extraction(&archive_path, &dest_dir) {
            Ok(plan) => plan,
            Err(e) => {
                outcome.push(archive_path, Err(e));
                return outcome;
            }
        };

        let bytes_total = (0..zip.len())
            .filter_map(|i| zip.by_index(i).ok().map(|entry| entry.size()))
            .sum();
        let mut progress =
            ProgressReporter::new(OperationKind::Extract, groups.len(), bytes_total, tx.clone());

        for (top, entries) in &groups {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let target = dest_dir.join(top);
            progress.set_current_file(Some(target.clone()));

            let staging = temp_sibling(&target);
            let result = fs::create_dir(&staging)
                .at(&staging)
                .and_then(|()| extract_group(&mut zip, &archive_path, entries, &staging, cancel, &mut progress))
                .and_then(|()| {
                    let placed = unique_destination(&dest_dir, OsStr::new(top));
                    fs::rename(staging.join(top), &placed).at(&placed)?;
                    Ok(placed)
                });

            if path_occupied(&staging) {
                if let Err(e) = remove_path(&staging) {
                    warn!(staging = %staging.display(), error = %e, "failed to clean staging directory");
                }
            }

            match result {
                Ok(placed) => {
                    debug!(entry = %placed.display(), "extracted");
                    progress.complete_file();
                    outcome.push(
                        target,
                        Ok(OperationRecord::new(
                            OperationKind::Extract,
                            archive_path.clone(),
                            placed.clone(),
                            Inverse::Remove { path: placed },
                        )),
                    );
                }
                Err(e) => {
                    if !e.is_cancelled() {
                        progress.fail_file();
                    }
                    outcome.push(target, Err(e));
                    break;
                }
            }
        }

        progress.set_current_file(None);
        info!(archive = %archive_path.display(), summary = %outcome.summary(), "extraction finished");
        outcome
    }
}

/// Entry names of `archive`, in archive order.
pub fn list_archive(archive: &Path) -> OpResult<Vec<String>> {
    let file = File::open(archive).at(archive)?;
    let zip = ZipArchive::new(file).map_err(|e| zip_error(archive, e))?;
    Ok(zip.file_names().map(String::from).collect())
}

fn zip_error(path: &Path, error: ZipError) -> OpError {
    match error {
        ZipError::Io(e) => OpError::io(path, e),
        other => OpError::invalid_archive(path, other.to_string()),
    }
}

fn entry_options(level: Option<i64>, mode: u32) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(level)
        .unix_permissions(mode)
}

fn write_archive(
    sources: &[PathBuf],
    temp: &Path,
    level: Option<i64>,
    cancel: &CancellationToken,
    progress: &mut ProgressReporter,
) -> OpResult<()> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp)
        .at(temp)?;
    let mut writer = ZipWriter::new(file);

    for source in sources {
        progress.set_current_file(Some(source.clone()));
        let base = source.parent().unwrap_or(Path::new("/"));
        add_tree(&mut writer, source, base, level, cancel, progress)?;
        progress.complete_file();
    }

    writer.finish().map_err(|e| zip_error(temp, e))?;
    Ok(())
}

fn add_tree(
    writer: &mut ZipWriter<File>,
    path: &Path,
    base: &Path,
    level: Option<i64>,
    cancel: &CancellationToken,
    progress: &mut ProgressReporter,
) -> OpResult<()> {
    if cancel.is_cancelled() {
        return Err(OpError::CancelledByUser);
    }

    let metadata = fs::symlink_metadata(path).at(path)?;
    let name = archive_name(path, base);
    let options = entry_options(level, file_mode(&metadata));

    if metadata.file_type().is_symlink() {
        let target = fs::read_link(path).at(path)?;
        writer
            .add_symlink(name, target.to_string_lossy().into_owned(), options)
            .map_err(|e| zip_error(path, e))?;
    } else if metadata.is_dir() {
        writer
            .add_directory(format!("{name}/"), options)
            .map_err(|e| zip_error(path, e))?;

        let mut children: Vec<PathBuf> = fs::read_dir(path)
            .at(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<_>>()
            .at(path)?;
        children.sort();

        for child in children {
            add_tree(writer, &child, base, level, cancel, progress)?;
        }
    } else {
        writer
            .start_file(name, options)
            .map_err(|e| zip_error(path, e))?;
        let mut file = File::open(path).at(path)?;
        let bytes = io::copy(&mut file, writer).at(path)?;
        progress.add_bytes(bytes);
    }

    Ok(())
}

/// `/`-separated name of `path` relative to `base`.
fn archive_name(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    if metadata.is_dir() { 0o755 } else { 0o644 }
}

/// Entries of one top-level group: archive index and safe relative path.
type Group = Vec<(usize, PathBuf)>;

/// Open the archive and group its entries by top-level component.
///
/// Every entry name is validated before anything is written.
fn plan_extraction(
    archive: &Path,
    dest_dir: &Path,
) -> OpResult<(ZipArchive<File>, IndexMap<String, Group>)> {
    let metadata = fs::metadata(dest_dir).at(dest_dir)?;
    if !metadata.is_dir() {
        return Err(OpError::invalid_target(dest_dir, "destination is not a directory"));
    }

    let file = File::open(archive).at(archive)?;
    let mut zip = ZipArchive::new(file).map_err(|e| zip_error(archive, e))?;

    let mut groups: IndexMap<String, Group> = IndexMap::new();
    for index in 0..zip.len() {
        let entry = zip.by_index(index).map_err(|e| zip_error(archive, e))?;
        let relative = safe_relative_path(entry.name(), entry.enclosed_name()).ok_or_else(|| {
            OpError::invalid_archive(archive, format!("unsafe entry name '{}'", entry.name()))
        })?;

        let Some(Component::Normal(top)) = relative.components().next() else {
            continue;
        };
        groups
            .entry(top.to_string_lossy().into_owned())
            .or_default()
            .push((index, relative));
    }

    Ok((zip, groups))
}

/// Accept only relative names made of plain components.
fn safe_relative_path(raw: &str, enclosed: Option<PathBuf>) -> Option<PathBuf> {
    let enclosed = enclosed?;
    if raw.starts_with('/') || raw.starts_with('\\') {
        return None;
    }

    let mut clean = PathBuf::new();
    for component in enclosed.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if raw.split(['/', '\\']).any(|part| part == "..") {
        return None;
    }

    (!clean.as_os_str().is_empty()).then_some(clean)
}

fn extract_group(
    zip: &mut ZipArchive<File>,
    archive: &Path,
    entries: &Group,
    staging: &Path,
    cancel: &CancellationToken,
    progress: &mut ProgressReporter,
) -> OpResult<()> {
    for (index, relative) in entries {
        if cancel.is_cancelled() {
            return Err(OpError::CancelledByUser);
        }

        let mut entry = zip.by_index(*index).map_err(|e| zip_error(archive, e))?;
        let out = staging.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out).at(&out)?;
            continue;
        }

        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }

        let mode = entry.unix_mode();
        if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
            let mut target = String::new();
            entry
                .read_to_string(&mut target)
                .map_err(|e| OpError::invalid_archive(archive, e.to_string()))?;
            write_symlink(&target, &out)?;
            continue;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&out)
            .at(&out)?;
        let bytes = io::copy(&mut entry, &mut file)
            .map_err(|e| OpError::invalid_archive(archive, e.to_string()))?;
        progress.add_bytes(bytes);

        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o777)).at(&out)?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn write_symlink(target: &str, link: &Path) -> OpResult<()> {
    std::os::unix::fs::symlink(target, link).at(link)
}

#[cfg(not(unix))]
fn write_symlink(target: &str, link: &Path) -> OpResult<()> {
    fs::write(link, target).at(link)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_name_relative() {
        let name = archive_name(Path::new("/a/b/c/file.txt"), Path::new("/a/b"));
        assert_eq!(name, "c/file.txt");
    }

    #[test]
    fn test_safe_relative_path() {
        assert_eq!(
            safe_relative_path("dir/file", Some(PathBuf::from("dir/file"))),
            Some(PathBuf::from("dir/file"))
        );
        assert_eq!(safe_relative_path("../evil", None), None);
        assert_eq!(safe_relative_path("a/../b", Some(PathBuf::from("b"))), None);
        assert_eq!(safe_relative_path("/etc/passwd", Some(PathBuf::from("etc/passwd"))), None);
    }
}
