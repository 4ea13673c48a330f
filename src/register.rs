//! The last-writer-wins register behind every signal.
//!
//! The register owns the value and its [`Stamp`], and decides whether a
//! write changes anything. It never notifies; accepted changes are returned
//! as a [`Change`] for the caller to schedule.

use crate::codec::Codec;
use crate::revision::{IdSource, Resolution, Revision, RevisionId, Stamp};
use crate::SignalError;

/// An accepted change, as delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<T> {
    /// The new value.
    pub value: T,
    /// The value it replaced; `None` if the register was empty.
    pub old: Option<T>,
    /// The stamp of the write.
    pub stamp: Stamp,
}

impl<T> Change<T> {
    /// Revision of the write.
    pub fn revision(&self) -> Revision {
        self.stamp.revision
    }

    /// Revision id of the write.
    pub fn revision_id(&self) -> &RevisionId {
        &self.stamp.id
    }
}

/// Result of a write that passed validation.
#[derive(Debug)]
pub(crate) enum WriteOutcome<T> {
    /// The value changed; listeners must be notified.
    Changed(Change<T>),
    /// The encoded value was identical; nothing to notify.
    Unchanged,
}

/// What [`Signal::apply_remote`](crate::Signal::apply_remote) did with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOutcome {
    /// Accepted and the value changed.
    Applied,
    /// Accepted, but the value was equal: only the stamp advanced.
    Adopted,
    /// Exactly the current stamp; ignored.
    Duplicate,
    /// Behind the current stamp; ignored.
    Stale,
}

impl RemoteOutcome {
    /// Returns true if the register adopted the update's stamp.
    pub fn is_accepted(self) -> bool {
        matches!(self, RemoteOutcome::Applied | RemoteOutcome::Adopted)
    }
}

#[derive(Debug)]
pub(crate) struct RemoteWrite<T> {
    pub resolution: Resolution,
    pub incoming: Stamp,
    pub outcome: WriteOutcome<T>,
}

impl<T> RemoteWrite<T> {
    pub fn remote_outcome(&self) -> RemoteOutcome {
        match (self.resolution, &self.outcome) {
            (Resolution::Duplicate, _) => RemoteOutcome::Duplicate,
            (Resolution::Stale, _) => RemoteOutcome::Stale,
            (_, WriteOutcome::Changed(_)) => RemoteOutcome::Applied,
            (_, WriteOutcome::Unchanged) => RemoteOutcome::Adopted,
        }
    }
}

/// Which writer is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Writer {
    /// Public API; blocked by the freeze gate.
    Public,
    /// The derivation edge of a derived signal; the only writer allowed
    /// through a frozen register.
    Derivation,
}

#[derive(Debug)]
pub(crate) struct Register<T> {
    value: Option<T>,
    encoded: Option<Vec<u8>>,
    stamp: Stamp,
    frozen: bool,
    disposed: bool,
}

impl<T: Clone + 'static> Register<T> {
    pub fn new(
        value: Option<T>,
        stamp: Stamp,
        codec: &dyn Codec<T>,
        frozen: bool,
    ) -> Result<Self, SignalError> {
        let encoded = value.as_ref().map(|v| codec.encode(v)).transpose()?;
        Ok(Self {
            value,
            encoded,
            stamp,
            frozen,
            disposed: false,
        })
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Returns false if the register was already disposed.
    pub fn dispose(&mut self) -> bool {
        !std::mem::replace(&mut self.disposed, true)
    }

    /// The freeze gate is checked before anything else.
    fn check_gate(&self, writer: Writer) -> Result<(), SignalError> {
        if self.frozen && writer == Writer::Public {
            return Err(SignalError::Frozen);
        }
        if self.disposed {
            return Err(SignalError::Disposed);
        }
        Ok(())
    }

    pub fn write_local(
        &mut self,
        value: T,
        codec: &dyn Codec<T>,
        ids: &dyn IdSource,
        writer: Writer,
    ) -> Result<WriteOutcome<T>, SignalError> {
        self.check_gate(writer)?;
        let encoded = codec.encode(&value)?;
        if self.encoded.as_deref() == Some(encoded.as_slice()) {
            return Ok(WriteOutcome::Unchanged);
        }
        let stamp = self.stamp.successor(ids.fresh_id())?;
        Ok(WriteOutcome::Changed(self.replace(value, encoded, stamp)))
    }

    pub fn write_remote(
        &mut self,
        revision: Revision,
        id: &str,
        value: T,
        codec: &dyn Codec<T>,
    ) -> Result<RemoteWrite<T>, SignalError> {
        self.check_gate(Writer::Public)?;
        let incoming = Stamp::new(revision, id)?;
        let encoded = codec.encode(&value)?;
        let resolution = self.stamp.resolve(&incoming);
        if !resolution.is_accepted() {
            return Ok(RemoteWrite {
                resolution,
                incoming,
                outcome: WriteOutcome::Unchanged,
            });
        }
        let outcome = if self.encoded.as_deref() == Some(encoded.as_slice()) {
            // Advance the position even though the content coincides, so a
            // redelivery of this update is recognised as a duplicate.
            self.stamp = incoming.clone();
            WriteOutcome::Unchanged
        } else {
            WriteOutcome::Changed(self.replace(value, encoded, incoming.clone()))
        };
        Ok(RemoteWrite {
            resolution,
            incoming,
            outcome,
        })
    }

    fn replace(&mut self, value: T, encoded: Vec<u8>, stamp: Stamp) -> Change<T> {
        let old = self.value.replace(value.clone());
        self.encoded = Some(encoded);
        self.stamp = stamp.clone();
        Change { value, old, stamp }
    }
}
