//! Tracer trait for observing signal activity.
//!
//! This module defines the [`Tracer`] trait and its two stock
//! implementations. [`NoopTracer`] is the default and costs nothing;
//! [`LogTracer`] forwards every event to the `tracing` crate.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use synced_signal::{Runtime, SignalId, Stamp, Tracer};
//!
//! #[derive(Default)]
//! struct CountNotifications(AtomicUsize);
//!
//! impl Tracer for CountNotifications {
//!     fn on_notify(&self, _id: SignalId, _stamp: &Stamp, _listeners: usize) {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!     }
//! }
//!
//! let tracer = Arc::new(CountNotifications::default());
//! let runtime = Runtime::builder().tracer(tracer.clone()).build().unwrap();
//! let signal = runtime.signal(1).unwrap();
//! signal.set(2).unwrap();
//! runtime.run_due();
//! assert_eq!(tracer.0.load(Ordering::Relaxed), 1);
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::graph::{NodeKind, SignalId};
use crate::revision::{Resolution, Stamp};
use crate::SignalError;

/// Where a write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOrigin {
    /// `Signal::set` / `Signal::update`.
    Local,
    /// `Signal::apply_remote`.
    Remote,
    /// Recomputation of a derived signal.
    Derived,
}

/// Tracer trait for observing signal activity.
///
/// All methods have default empty implementations, so you only need to
/// override the events you're interested in.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` since signals may be shared across
/// threads. Write hooks run while the signal's register is locked, so a
/// tracer must not call back into the signal it observes.
pub trait Tracer: Send + Sync + 'static {
    /// Called when a signal is created.
    #[inline]
    fn on_signal_created(&self, _id: SignalId, _kind: NodeKind) {}

    /// Called after a write is applied. `changed` is false when the stamp
    /// advanced over an equal value.
    #[inline]
    fn on_write(&self, _id: SignalId, _origin: WriteOrigin, _stamp: &Stamp, _changed: bool) {}

    /// Called for every remote update that passed validation.
    #[inline]
    fn on_remote_resolved(&self, _id: SignalId, _incoming: &Stamp, _resolution: Resolution) {}

    /// Called when a notification is scheduled. `superseded` is true if a
    /// pending notification was cancelled in its favor.
    #[inline]
    fn on_notification_scheduled(&self, _id: SignalId, _delay: Duration, _superseded: bool) {}

    /// Called when a notification fans out to `listeners` callbacks.
    #[inline]
    fn on_notify(&self, _id: SignalId, _stamp: &Stamp, _listeners: usize) {}

    /// Called when a listener or derivation failed and the error was contained.
    #[inline]
    fn on_callback_error(&self, _id: SignalId, _error: &SignalError) {}

    /// Called when a signal is disposed.
    #[inline]
    fn on_disposed(&self, _id: SignalId) {}
}

impl<T: Tracer> Tracer for Arc<T> {
    fn on_signal_created(&self, id: SignalId, kind: NodeKind) {
        (**self).on_signal_created(id, kind)
    }

    fn on_write(&self, id: SignalId, origin: WriteOrigin, stamp: &Stamp, changed: bool) {
        (**self).on_write(id, origin, stamp, changed)
    }

    fn on_remote_resolved(&self, id: SignalId, incoming: &Stamp, resolution: Resolution) {
        (**self).on_remote_resolved(id, incoming, resolution)
    }

    fn on_notification_scheduled(&self, id: SignalId, delay: Duration, superseded: bool) {
        (**self).on_notification_scheduled(id, delay, superseded)
    }

    fn on_notify(&self, id: SignalId, stamp: &Stamp, listeners: usize) {
        (**self).on_notify(id, stamp, listeners)
    }

    fn on_callback_error(&self, id: SignalId, error: &SignalError) {
        (**self).on_callback_error(id, error)
    }

    fn on_disposed(&self, id: SignalId) {
        (**self).on_disposed(id)
    }
}

/// Zero-cost tracer that discards all events.
///
/// This is the default tracer for [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

/// Tracer that emits every event through the `tracing` crate.
///
/// Lifecycle events are logged at `debug`, per-write events at `trace`, and
/// contained callback failures at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn on_signal_created(&self, id: SignalId, kind: NodeKind) {
        tracing::debug!(signal = id.as_u64(), ?kind, "signal created");
    }

    fn on_write(&self, id: SignalId, origin: WriteOrigin, stamp: &Stamp, changed: bool) {
        tracing::trace!(
            signal = id.as_u64(),
            ?origin,
            revision = stamp.revision,
            revision_id = %stamp.id,
            changed,
            "write applied"
        );
    }

    fn on_remote_resolved(&self, id: SignalId, incoming: &Stamp, resolution: Resolution) {
        if resolution.is_accepted() {
            tracing::trace!(
                signal = id.as_u64(),
                revision = incoming.revision,
                revision_id = %incoming.id,
                ?resolution,
                "remote update accepted"
            );
        } else {
            tracing::debug!(
                signal = id.as_u64(),
                revision = incoming.revision,
                revision_id = %incoming.id,
                ?resolution,
                "remote update rejected"
            );
        }
    }

    fn on_notification_scheduled(&self, id: SignalId, delay: Duration, superseded: bool) {
        tracing::trace!(
            signal = id.as_u64(),
            delay_ms = delay.as_millis() as u64,
            superseded,
            "notification scheduled"
        );
    }

    fn on_notify(&self, id: SignalId, stamp: &Stamp, listeners: usize) {
        tracing::trace!(
            signal = id.as_u64(),
            revision = stamp.revision,
            listeners,
            "notifying listeners"
        );
    }

    fn on_callback_error(&self, id: SignalId, error: &SignalError) {
        tracing::warn!(signal = id.as_u64(), %error, "callback failed");
    }

    fn on_disposed(&self, id: SignalId) {
        tracing::debug!(signal = id.as_u64(), "signal disposed");
    }
}
