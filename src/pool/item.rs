//! Work items: the unit scheduled by the pool.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Boxed error returned by user closures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Completion result of a user closure.
pub type TaskResult = Result<(), BoxError>;

/// Boxed user closure: takes the worker's cancellation signal, produces an
/// asynchronous completion.
pub(crate) type TaskFn =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, TaskResult> + Send + 'static>;

/// Priority class of a work item.
///
/// Discriminants index the queue lanes and the weight table; adding a level
/// means extending the enum, [`WorkPriority::ALL`], and the weight lookup;
/// the scheduler itself is level-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WorkPriority {
    Low = 0,
    Normal = 1,
    High = 2,
}

impl WorkPriority {
    /// Every priority level, in descending natural order. Selection
    /// tie-breaks follow this order (higher priority wins).
    pub const ALL: [WorkPriority; 3] =
        [WorkPriority::High, WorkPriority::Normal, WorkPriority::Low];

    /// Stable lane index for this level.
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl Default for WorkPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for WorkPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Unique identifier of a work item, generated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItemId(Uuid);

impl WorkItemId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable unit of work: closure + priority + identity.
///
/// Every field is set exactly once at construction; after handoff to the
/// pool the item is only ever moved, never mutated.
pub struct WorkItem {
    id: WorkItemId,
    name: Option<String>,
    priority: WorkPriority,
    created_at: DateTime<Utc>,
    /// Monotonic twin of `created_at`, used for aging and wait measurement.
    queued_at: Instant,
    task: TaskFn,
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl WorkItem {
    /// Create a work item from a closure.
    ///
    /// The closure receives the executing worker's cancellation token
    /// (linked to the pool root) and must observe it cooperatively; the
    /// pool never interrupts a running closure beyond signalling it.
    pub fn new<F, Fut>(priority: WorkPriority, task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            id: WorkItemId::new(),
            name: None,
            priority,
            created_at: Utc::now(),
            queued_at: Instant::now(),
            task: Box::new(move |cancel| task(cancel).boxed()),
        }
    }

    /// Create a named work item. The name is observational only.
    pub fn named<F, Fut>(name: impl Into<String>, priority: WorkPriority, task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let mut item = Self::new(priority, task);
        item.name = Some(name.into());
        item
    }

    pub fn id(&self) -> WorkItemId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn priority(&self) -> WorkPriority {
        self.priority
    }

    /// UTC timestamp taken when the item was constructed.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time spent waiting since construction (monotonic).
    pub(crate) fn queued_for(&self) -> Duration {
        self.queued_at.elapsed()
    }

    /// Consume the item, producing the closure's future.
    pub(crate) fn into_future(self, cancel: CancellationToken) -> BoxFuture<'static, TaskResult> {
        (self.task)(cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_order_naturally() {
        assert!(WorkPriority::High > WorkPriority::Normal);
        assert!(WorkPriority::Normal > WorkPriority::Low);
        assert_eq!(WorkPriority::ALL.len(), 3);
    }

    #[test]
    fn lane_indices_are_distinct() {
        let mut seen = [false; 3];
        for p in WorkPriority::ALL {
            assert!(!seen[p.index()], "duplicate lane index for {p}");
            seen[p.index()] = true;
        }
    }

    #[tokio::test]
    async fn item_carries_identity_and_runs_once() {
        let item = WorkItem::named("probe", WorkPriority::High, |_cancel| async { Ok(()) });
        assert_eq!(item.name(), Some("probe"));
        assert_eq!(item.priority(), WorkPriority::High);

        let id = item.id();
        let other = WorkItem::new(WorkPriority::Low, |_cancel| async { Ok(()) });
        assert_ne!(id, other.id(), "ids must be unique per construction");

        let result = item.into_future(CancellationToken::new()).await;
        assert!(result.is_ok());
    }
}
