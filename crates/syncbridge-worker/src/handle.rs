//! Shared connector-handle lifecycle pieces.

use tokio::io::{AsyncBufRead, AsyncWrite};

/// Lifecycle of a connector handle. Never re-enters `Started` after
/// `Finished` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Created,
    Started,
    Finished,
    Failed,
    Closed,
}

pub(crate) type DynReader = Box<dyn AsyncBufRead + Send + Unpin>;
pub(crate) type DynWriter = Box<dyn AsyncWrite + Send + Unpin>;
