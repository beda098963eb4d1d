//! Units of work carried around the ring.

use crate::storage::Ttl;
use tokio::sync::oneshot;

/// What a task asks for, together with the channel its answer goes to.
#[derive(Debug)]
pub enum TaskKind {
    /// Look a key up, answering `None` once every shard has missed
    Get {
        respond: oneshot::Sender<Option<String>>,
    },
    /// Store a key in whichever shard dequeues the task
    Set {
        value: String,
        ttl: Ttl,
        respond: oneshot::Sender<bool>,
    },
}

/// A request submitted to the router.
///
/// `origin` stays unset until the first shard misses a `Get`; that shard's
/// index then marks where the traversal stops.
#[derive(Debug)]
pub struct Task {
    pub key: String,
    pub kind: TaskKind,
    pub(crate) origin: Option<usize>,
    pub(crate) hops: usize,
}

impl Task {
    /// Builds a lookup task and the receiver for its answer.
    pub fn get(key: impl Into<String>) -> (Self, oneshot::Receiver<Option<String>>) {
        let (respond, rx) = oneshot::channel();
        let task = Self {
            key: key.into(),
            kind: TaskKind::Get { respond },
            origin: None,
            hops: 0,
        };
        (task, rx)
    }

    /// Builds a write task and the receiver for its acknowledgement.
    pub fn set(
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Ttl,
    ) -> (Self, oneshot::Receiver<bool>) {
        let (respond, rx) = oneshot::channel();
        let task = Self {
            key: key.into(),
            kind: TaskKind::Set {
                value: value.into(),
                ttl,
                respond,
            },
            origin: None,
            hops: 0,
        };
        (task, rx)
    }

    /// Index of the first shard that missed this task, if any.
    pub fn origin(&self) -> Option<usize> {
        self.origin
    }

    /// Number of times the task has been forwarded along the ring.
    pub fn hops(&self) -> usize {
        self.hops
    }
}
