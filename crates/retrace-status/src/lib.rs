//! Version-control status overlay for retrace.
//!
//! A [`StatusProvider`] reports a [`StatusMap`] for a directory; the
//! [`StatusCache`] keeps results per directory until a mutation touches it.

mod cache;
mod git;
mod provider;

pub use cache::StatusCache;
pub use git::{classify, GitStatusProvider};
pub use provider::{NoStatus, StatusError, StatusMap, StatusProvider};
