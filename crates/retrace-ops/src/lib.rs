//! Reversible file operations for retrace.
//!
//! Every mutation (create, rename, delete, copy, move, archive, extract)
//! produces an [`OperationRecord`] carrying the [`Inverse`] that reverses it.
//! Deletions go to an engine-owned [`TrashStore`] so they can be restored.
//! The primitives here are blocking; callers run them on worker threads and
//! receive progress over a channel.

mod archive;
mod conflict;
mod copy;
mod create;
mod executor;
mod move_op;
mod operation;
mod progress;
mod rename;
mod trash;
mod undo;

pub use archive::{list_archive, ArchiveManager, ArchiveOptions};
pub use conflict::{
    auto_rename_path, path_occupied, unique_destination, validate_filename, TEMP_PREFIX,
};
pub use create::CreateKind;
pub use executor::OperationExecutor;
pub use operation::{BulkOutcome, Inverse, OperationKind, OperationRecord};
pub use progress::{OperationProgress, ProgressReporter, ProgressSender};
pub use trash::{TrashEntry, TrashId, TrashStore};
pub use undo::{UndoEntry, UndoManager, UndoState};

/// Default channel buffer size for operation progress updates.
pub const OPERATION_CHANNEL_SIZE: usize = 100;
