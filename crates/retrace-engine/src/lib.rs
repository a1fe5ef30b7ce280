//! Background task engine for retrace.
//!
//! [`Engine`] accepts file commands from a single control thread, runs them
//! as cancellable background tasks serialized per path, and applies their
//! results to the undo stack, clipboard, selection and status cache when the
//! control thread drains [`EngineEvent`]s.

mod engine;
mod scheduler;
mod selection;
mod task;

pub use engine::Engine;
pub use scheduler::{Claim, Scheduler};
pub use selection::{Clipboard, ClipboardMode, SelectionSet};
pub use task::{EngineEvent, Job, JobKind, TaskId, TaskReport};
