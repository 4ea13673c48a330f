//! Revision stamps and the last-writer-wins ordering between them.
//!
//! A register's position in its history is a [`Stamp`]: an integer
//! [`Revision`] plus an opaque, totally ordered [`RevisionId`]. The integer
//! gives the cheap common-case ordering; the id breaks ties between two
//! writers that raced on the same predecessor.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::SignalError;

/// Revision counter. Starts at 1 and never decreases.
pub type Revision = u64;

/// The first revision of every register.
pub const INITIAL_REVISION: Revision = 1;

/// Opaque, non-empty identifier of a single write.
///
/// Ids are compared lexicographically by their UTF-8 bytes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionId(Arc<str>);

impl RevisionId {
    /// Create a revision id, rejecting the empty string.
    pub fn new(id: impl AsRef<str>) -> Result<Self, SignalError> {
        let id = id.as_ref();
        if id.is_empty() {
            return Err(SignalError::InvalidId);
        }
        Ok(Self(Arc::from(id)))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RevisionId {
    type Error = SignalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RevisionId> for String {
    fn from(id: RevisionId) -> Self {
        id.0.to_string()
    }
}

impl AsRef<str> for RevisionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RevisionId({:?})", &*self.0)
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for RevisionId {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for RevisionId {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

/// A `(revision, id)` pair identifying one position in a register's history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stamp {
    /// Monotonic revision counter.
    pub revision: Revision,
    /// Tie-breaker among writes sharing a revision.
    pub id: RevisionId,
}

/// How an incoming stamp relates to the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// The incoming revision is strictly ahead.
    Ahead,
    /// Same revision, and the incoming id wins the tie.
    TieBreak,
    /// Exactly the current stamp, typically a redelivery.
    Duplicate,
    /// Lower revision, or same revision with a losing id.
    Stale,
}

impl Resolution {
    /// Returns true if the incoming write replaces the current position.
    pub fn is_accepted(self) -> bool {
        matches!(self, Resolution::Ahead | Resolution::TieBreak)
    }
}

impl Stamp {
    /// Create a stamp, validating both halves.
    pub fn new(revision: Revision, id: impl AsRef<str>) -> Result<Self, SignalError> {
        if revision < INITIAL_REVISION {
            return Err(SignalError::InvalidRevision { revision });
        }
        Ok(Self {
            revision,
            id: RevisionId::new(id)?,
        })
    }

    /// Decide whether `incoming` supersedes this stamp.
    ///
    /// A lower incoming revision is stale whatever its id.
    ///
    /// # Examples
    ///
    /// ```
    /// # use synced_signal::{Resolution, Stamp};
    /// let current = Stamp::new(2, "b").unwrap();
    /// assert_eq!(current.resolve(&Stamp::new(3, "a").unwrap()), Resolution::Ahead);
    /// assert_eq!(current.resolve(&Stamp::new(2, "c").unwrap()), Resolution::TieBreak);
    /// assert_eq!(current.resolve(&Stamp::new(2, "b").unwrap()), Resolution::Duplicate);
    /// assert_eq!(current.resolve(&Stamp::new(1, "z").unwrap()), Resolution::Stale);
    /// ```
    pub fn resolve(&self, incoming: &Stamp) -> Resolution {
        if incoming.revision > self.revision {
            Resolution::Ahead
        } else if incoming.revision == self.revision && incoming.id > self.id {
            Resolution::TieBreak
        } else if incoming == self {
            Resolution::Duplicate
        } else {
            Resolution::Stale
        }
    }

    /// The stamp a local write on top of this one receives.
    ///
    /// Fails at `u64::MAX`: reusing the revision with a fresh id could sort
    /// below the current stamp and be rejected by peers.
    pub(crate) fn successor(&self, id: RevisionId) -> Result<Self, SignalError> {
        let revision = self
            .revision
            .checked_add(1)
            .ok_or(SignalError::RevisionExhausted {
                revision: self.revision,
            })?;
        Ok(Self { revision, id })
    }
}

/// Supplier of fresh revision ids.
///
/// Implementations must return non-empty ids that are unique for the
/// lifetime of the process. Ids should increase over time so that same
/// revision ties favor the more recent writer, although correctness only
/// relies on uniqueness and the total order.
pub trait IdSource: Send + Sync + 'static {
    /// Produce a new id.
    fn fresh_id(&self) -> RevisionId;
}

/// Time-ordered ids from UUIDv7.
///
/// The hyphenated form has fixed width, so lexicographic order follows the
/// embedded millisecond timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidV7Ids;

impl IdSource for UuidV7Ids {
    fn fresh_id(&self) -> RevisionId {
        RevisionId(Arc::from(uuid::Uuid::now_v7().hyphenated().to_string()))
    }
}

/// Deterministic ids: a prefix followed by a zero-padded counter.
///
/// The padding keeps lexicographic order identical to numeric order.
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    /// Create a generator whose first id is `{prefix}00000000000000000001`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::starting_at(prefix, 1)
    }

    /// Create a generator starting from a given counter value.
    pub fn starting_at(prefix: impl Into<String>, first: u64) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(first),
        }
    }
}

impl IdSource for SequentialIds {
    fn fresh_id(&self) -> RevisionId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        RevisionId(Arc::from(format!("{}{:020}", self.prefix, n)))
    }
}
