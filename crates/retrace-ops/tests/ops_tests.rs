use retrace_core::OpError;
use retrace_ops::{
    list_archive, ArchiveManager, ArchiveOptions, CreateKind, OperationExecutor, OperationKind,
    ProgressSender, TrashStore, UndoManager, UndoState, TEMP_PREFIX,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Fixture {
    temp: TempDir,
    executor: OperationExecutor,
    undo: UndoManager,
}

impl Fixture {
    fn new(capacity: usize) -> Self {
        let temp = TempDir::new().unwrap();
        let trash = Arc::new(TrashStore::open(temp.path().join("trash")).unwrap());
        let executor = OperationExecutor::new(Arc::clone(&trash));
        let undo = UndoManager::new(capacity, trash);
        fs::create_dir(temp.path().join("work")).unwrap();
        Self {
            temp,
            executor,
            undo,
        }
    }

    fn work(&self) -> PathBuf {
        self.temp.path().join("work")
    }

    fn trash(&self) -> &TrashStore {
        self.executor.trash()
    }
}

fn build_tree(root: &Path) {
    fs::create_dir_all(root.join("sub/deeper")).unwrap();
    fs::write(root.join("top.txt"), "top level").unwrap();
    fs::write(root.join("sub/mid.txt"), "middle").unwrap();
    fs::write(root.join("sub/deeper/leaf.bin"), [0u8, 1, 2, 3, 255]).unwrap();
}

fn assert_same_tree(a: &Path, b: &Path) {
    let mut left: Vec<_> = fs::read_dir(a).unwrap().flatten().map(|e| e.file_name()).collect();
    let mut right: Vec<_> = fs::read_dir(b).unwrap().flatten().map(|e| e.file_name()).collect();
    left.sort();
    right.sort();
    assert_eq!(left, right, "entries differ in {}", a.display());

    for name in left {
        let (pa, pb) = (a.join(&name), b.join(&name));
        if pa.is_dir() {
            assert!(pb.is_dir());
            assert_same_tree(&pa, &pb);
        } else {
            assert_eq!(fs::read(&pa).unwrap(), fs::read(&pb).unwrap());
        }
    }
}

#[test]
fn test_delete_then_undo_restores_tree() {
    let mut fx = Fixture::new(10);
    let dir = fx.work().join("project");
    build_tree(&dir);
    let reference = fx.temp.path().join("reference");
    build_tree(&reference);

    let record = fx.executor.delete(&dir).unwrap();
    assert!(!dir.exists());
    fx.undo.push(record);

    let entry = fx.undo.undo(&fx.executor).unwrap();
    assert_eq!(entry.record.kind, OperationKind::Delete);
    assert_same_tree(&dir, &reference);
    assert!(fx.trash().is_empty().unwrap());
    assert_eq!(fx.undo.state(), UndoState::Idle);
}

#[test]
fn test_bulk_delete_creates_one_trash_entry_each() {
    let fx = Fixture::new(10);
    let paths: Vec<PathBuf> = (0..4)
        .map(|i| {
            let path = fx.work().join(format!("file{i}.txt"));
            fs::write(&path, format!("content {i}")).unwrap();
            path
        })
        .collect();

    let outcome = fx
        .executor
        .delete_all(&paths, &CancellationToken::new(), &ProgressSender::none());
    assert!(outcome.is_success());
    assert_eq!(fx.trash().len().unwrap(), 4);

    // Each entry restores on its own, in any order.
    for record in outcome.records.iter().rev() {
        fx.executor.apply_inverse(&record.inverse).unwrap();
    }
    for (i, path) in paths.iter().enumerate() {
        assert_eq!(fs::read_to_string(path).unwrap(), format!("content {i}"));
    }
}

#[test]
fn test_copy_then_undo_removes_only_copy() {
    let mut fx = Fixture::new(10);
    let src = fx.work().join("src");
    build_tree(&src);
    let dest = fx.work().join("dest");
    fs::create_dir(&dest).unwrap();

    let record = fx
        .executor
        .copy(&src, &dest, &CancellationToken::new())
        .unwrap();
    assert_same_tree(&src, &dest.join("src"));
    fx.undo.push(record);

    fx.undo.undo(&fx.executor).unwrap();
    assert!(!dest.join("src").exists());
    assert!(src.join("sub/deeper/leaf.bin").exists());
}

#[test]
fn test_eviction_purges_trash() {
    let mut fx = Fixture::new(2);
    let doomed = fx.work().join("doomed.txt");
    fs::write(&doomed, "bye").unwrap();

    let record = fx.executor.delete(&doomed).unwrap();
    let trash_id = record.inverse.trash_id().unwrap();
    fx.undo.push(record);

    for name in ["a", "b"] {
        let record = fx
            .executor
            .create(&fx.work().join(name), CreateKind::File)
            .unwrap();
        fx.undo.push(record);
    }

    assert_eq!(fx.undo.len(), 2);
    assert!(matches!(
        fx.trash().restore(trash_id),
        Err(OpError::NotFound { .. })
    ));
}

#[test]
fn test_partial_failure_keeps_going() {
    let fx = Fixture::new(10);
    let mut paths: Vec<PathBuf> = (0..4)
        .map(|i| {
            let path = fx.work().join(format!("ok{i}"));
            fs::write(&path, "x").unwrap();
            path
        })
        .collect();
    paths.insert(2, fx.work().join("missing"));

    let dest = fx.work().join("dest");
    fs::create_dir(&dest).unwrap();

    let outcome = fx.executor.copy_all(
        &paths,
        &dest,
        &CancellationToken::new(),
        &ProgressSender::none(),
    );
    assert_eq!(outcome.succeeded(), 4);
    assert_eq!(outcome.failed(), 1);

    let (records, error) = outcome.into_parts();
    assert_eq!(records.len(), 4);
    match error {
        Some(OpError::PartialFailure(failures)) => {
            assert_eq!(failures[0].path, fx.work().join("missing"));
            assert!(matches!(failures[0].error, OpError::NotFound { .. }));
        }
        other => panic!("expected partial failure, got {other:?}"),
    }
}

#[cfg(unix)]
#[test]
fn test_partial_failure_permission_denied() {
    use std::os::unix::fs::PermissionsExt;

    let fx = Fixture::new(10);
    let locked = fx.work().join("locked");
    fs::create_dir(&locked).unwrap();

    let mut paths = Vec::new();
    for i in 0..4 {
        let path = fx.work().join(format!("f{i}"));
        fs::write(&path, "x").unwrap();
        paths.push(path);
    }
    let guarded = locked.join("guarded");
    fs::write(&guarded, "x").unwrap();
    paths.push(guarded);

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();
    // Privileged users ignore directory permissions.
    if fs::write(locked.join("write-check"), "").is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let outcome = fx
        .executor
        .delete_all(&paths, &CancellationToken::new(), &ProgressSender::none());
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(outcome.succeeded(), 4);
    assert_eq!(outcome.failed(), 1);
    assert!(matches!(
        outcome.failures[0].error,
        OpError::PermissionDenied { .. }
    ));
}

#[test]
fn test_restore_conflict_leaves_stack_unchanged() {
    let mut fx = Fixture::new(10);
    let file = fx.work().join("notes.txt");
    fs::write(&file, "original").unwrap();

    let record = fx.executor.delete(&file).unwrap();
    fx.undo.push(record);
    fs::write(&file, "replacement").unwrap();

    let result = fx.undo.undo(&fx.executor);
    assert!(matches!(result, Err(OpError::Conflict { .. })));
    assert_eq!(fx.undo.len(), 1);
    assert_eq!(fs::read_to_string(&file).unwrap(), "replacement");

    fs::remove_file(&file).unwrap();
    fx.undo.undo(&fx.executor).unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "original");
}

#[test]
fn test_undo_empty_stack() {
    let mut fx = Fixture::new(10);
    assert!(matches!(
        fx.undo.undo(&fx.executor),
        Err(OpError::NothingToUndo)
    ));
}

#[test]
fn test_trash_ids_survive_reopen() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("trash");

    let first_id = {
        let store = TrashStore::open(&root).unwrap();
        let file = temp.path().join("a");
        fs::write(&file, "a").unwrap();
        store.store(&file).unwrap().id
    };

    let store = TrashStore::open(&root).unwrap();
    let file = temp.path().join("b");
    fs::write(&file, "b").unwrap();
    let second_id = store.store(&file).unwrap().id;

    assert!(second_id > first_id);
    assert_eq!(store.len().unwrap(), 2);
}

#[test]
fn test_cancelled_copy_leaves_no_temp_files() {
    let fx = Fixture::new(10);
    let src = fx.work().join("src");
    build_tree(&src);
    let dest = fx.work().join("dest");
    fs::create_dir(&dest).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = fx
        .executor
        .copy_all(&[src], &dest, &cancel, &ProgressSender::none());

    assert!(outcome.cancelled);
    assert!(outcome.records.is_empty());
    let leftovers: Vec<_> = fs::read_dir(&dest)
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_archive_round_trip() {
    let fx = Fixture::new(10);
    let manager = ArchiveManager::new(fx.executor.clone());
    let src = fx.work().join("bundle");
    build_tree(&src);
    let archive = fx.work().join("bundle.zip");

    let outcome = manager.create_archive(
        &[src.clone()],
        &archive,
        &ArchiveOptions::default(),
        &CancellationToken::new(),
        &ProgressSender::none(),
    );
    assert!(outcome.is_success(), "{}", outcome.summary());

    let names = list_archive(&archive).unwrap();
    assert!(names.contains(&"bundle/sub/deeper/leaf.bin".to_string()));

    let out = fx.work().join("out");
    fs::create_dir(&out).unwrap();
    let outcome = manager.extract_archive(
        &archive,
        &out,
        &CancellationToken::new(),
        &ProgressSender::none(),
    );
    assert!(outcome.is_success(), "{}", outcome.summary());
    assert_eq!(outcome.records.len(), 1);
    assert_same_tree(&src, &out.join("bundle"));

    // A second extraction lands beside the first under a suffixed name.
    let outcome = manager.extract_archive(
        &archive,
        &out,
        &CancellationToken::new(),
        &ProgressSender::none(),
    );
    assert_eq!(outcome.records[0].pairs[0].1, out.join("bundle (1)"));
    assert_same_tree(&src, &out.join("bundle (1)"));
}

#[test]
fn test_archive_overwrite_is_reversible() {
    let mut fx = Fixture::new(10);
    let manager = ArchiveManager::new(fx.executor.clone());
    let file = fx.work().join("data.txt");
    fs::write(&file, "payload").unwrap();
    let archive = fx.work().join("out.zip");
    fs::write(&archive, "previous archive").unwrap();

    let refused = manager.create_archive(
        &[file.clone()],
        &archive,
        &ArchiveOptions::default(),
        &CancellationToken::new(),
        &ProgressSender::none(),
    );
    assert!(matches!(
        refused.failures[0].error,
        OpError::AlreadyExists { .. }
    ));

    let options = ArchiveOptions {
        overwrite: true,
        compression_level: None,
    };
    let outcome = manager.create_archive(
        &[file],
        &archive,
        &options,
        &CancellationToken::new(),
        &ProgressSender::none(),
    );
    assert!(outcome.is_success());
    let kinds: Vec<_> = outcome.records.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![OperationKind::Delete, OperationKind::Archive]);

    for record in outcome.records {
        fx.undo.push(record);
    }
    fx.undo.undo(&fx.executor).unwrap();
    fx.undo.undo(&fx.executor).unwrap();
    assert_eq!(fs::read_to_string(&archive).unwrap(), "previous archive");
}

#[test]
fn test_extract_rejects_traversal() {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let fx = Fixture::new(10);
    let archive = fx.work().join("evil.zip");
    {
        let mut writer = zip::ZipWriter::new(fs::File::create(&archive).unwrap());
        writer
            .start_file("fine.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"ok").unwrap();
        writer
            .start_file("../escape.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"gotcha").unwrap();
        writer.finish().unwrap();
    }

    let out = fx.work().join("out");
    fs::create_dir(&out).unwrap();
    let manager = ArchiveManager::new(fx.executor.clone());
    let outcome = manager.extract_archive(
        &archive,
        &out,
        &CancellationToken::new(),
        &ProgressSender::none(),
    );

    assert!(outcome.records.is_empty());
    assert!(matches!(
        outcome.failures[0].error,
        OpError::InvalidArchive { .. }
    ));
    assert!(!fx.work().join("escape.txt").exists());
    assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn test_extract_failure_midway_keeps_earlier_groups() {
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;

    let mut fx = Fixture::new(10);
    let archive = fx.work().join("damaged.zip");
    {
        let stored = || SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let mut writer = zip::ZipWriter::new(fs::File::create(&archive).unwrap());
        writer.start_file("first.txt", stored()).unwrap();
        writer.write_all(b"first-payload").unwrap();
        writer.start_file("second.txt", stored()).unwrap();
        writer.write_all(b"second-payload").unwrap();
        writer.finish().unwrap();
    }

    // Flip a byte of the second entry's data so its checksum no longer matches.
    let mut bytes = fs::read(&archive).unwrap();
    let needle = b"second-payload";
    let at = bytes
        .windows(needle.len())
        .position(|window| window == needle)
        .unwrap();
    bytes[at] ^= 0xff;
    fs::write(&archive, bytes).unwrap();

    let out = fx.work().join("out");
    fs::create_dir(&out).unwrap();
    let manager = ArchiveManager::new(fx.executor.clone());
    let outcome = manager.extract_archive(
        &archive,
        &out,
        &CancellationToken::new(),
        &ProgressSender::none(),
    );

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.failures.len(), 1);
    let names: Vec<_> = fs::read_dir(&out)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["first.txt".to_string()]);
    assert_eq!(fs::read_to_string(out.join("first.txt")).unwrap(), "first-payload");

    for record in outcome.records {
        fx.undo.push(record);
    }
    fx.undo.undo(&fx.executor).unwrap();
    assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn test_archive_rejects_duplicate_top_level_names() {
    let fx = Fixture::new(10);
    for dir in ["a", "b"] {
        fs::create_dir(fx.work().join(dir)).unwrap();
        fs::write(fx.work().join(dir).join("x.txt"), dir).unwrap();
    }
    let archive = fx.work().join("both.zip");

    let manager = ArchiveManager::new(fx.executor.clone());
    let outcome = manager.create_archive(
        &[fx.work().join("a/x.txt"), fx.work().join("b/x.txt")],
        &archive,
        &ArchiveOptions::default(),
        &CancellationToken::new(),
        &ProgressSender::none(),
    );

    assert!(outcome.records.is_empty());
    assert!(matches!(
        outcome.failures[0].error,
        OpError::InvalidTarget { .. }
    ));
    assert_eq!(outcome.failures[0].path, fx.work().join("b/x.txt"));
    assert!(!archive.exists());
}
