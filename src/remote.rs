//! Transport frame for remote updates.

use serde::{Deserialize, Serialize};

use crate::revision::{Revision, Stamp};

/// A `(revision, id, value)` triple as exchanged between replicas.
///
/// Produced by [`Signal::snapshot`](crate::Signal::snapshot) and consumed by
/// [`Signal::apply_remote_update`](crate::Signal::apply_remote_update). The
/// frame is not validated on deserialization; the receiving signal applies
/// the same checks as [`Signal::apply_remote`](crate::Signal::apply_remote).
///
/// # Example
///
/// ```
/// use synced_signal::{RemoteOutcome, RemoteUpdate, Runtime};
///
/// let replica_a = Runtime::new();
/// let replica_b = Runtime::new();
/// let a = replica_a.signal(vec![1, 2]).unwrap();
/// let b = replica_b.signal(Vec::<i32>::new()).unwrap();
///
/// a.set(vec![1, 2, 3]).unwrap();
/// let frame = serde_json::to_string(&a.snapshot().unwrap()).unwrap();
///
/// let update: RemoteUpdate<Vec<i32>> = serde_json::from_str(&frame).unwrap();
/// assert_eq!(b.apply_remote_update(update).unwrap(), RemoteOutcome::Applied);
/// assert_eq!(b.get(), Some(vec![1, 2, 3]));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUpdate<T> {
    /// Revision of the write.
    pub revision: Revision,
    /// Revision id of the write.
    pub id: String,
    /// The written value.
    pub value: T,
}

impl<T> RemoteUpdate<T> {
    /// Build a frame from a stamp and a value.
    pub fn new(stamp: &Stamp, value: T) -> Self {
        Self {
            revision: stamp.revision,
            id: stamp.id.as_str().to_string(),
            value,
        }
    }
}
