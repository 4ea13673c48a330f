//! Listener bookkeeping and the pending-notification slot of a signal.
//!
//! A [`Notifier`] never runs callbacks itself. It hands out snapshots of its
//! listeners so the caller can invoke them with no lock held, which lets
//! listeners write, subscribe and unsubscribe re-entrantly.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::register::Change;
use crate::revision::{Revision, RevisionId};
use crate::scheduler::TimerId;
use crate::SignalError;

/// Return type accepted from listeners: `()` or `Result<(), E>`.
pub trait CallbackResult {
    /// Convert into the error channel's representation.
    fn into_result(self) -> anyhow::Result<()>;
}

impl CallbackResult for () {
    fn into_result(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<E: Into<anyhow::Error>> CallbackResult for Result<(), E> {
    fn into_result(self) -> anyhow::Result<()> {
        self.map_err(Into::into)
    }
}

pub(crate) type Listener<T> =
    Arc<dyn Fn(&T, Option<&T>, Revision, &RevisionId) -> anyhow::Result<()> + Send + Sync>;

pub(crate) type ErrorHandler<T> = Arc<dyn Fn(&SignalError, Option<&T>) + Send + Sync>;

/// Run a user callback, turning a panic into an error.
pub(crate) fn guarded<R>(f: impl FnOnce() -> anyhow::Result<R>) -> anyhow::Result<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "callback panicked".to_string()
            };
            Err(anyhow::anyhow!("panicked: {message}"))
        }
    }
}

pub(crate) struct Entry<T> {
    listener: Listener<T>,
    /// Derivation edges are not counted as subscribers.
    edge: bool,
}

struct Pending<T> {
    timer: TimerId,
    change: Change<T>,
}

/// What a closed notifier released; dropped by the caller outside the lock.
pub(crate) struct Closed<T> {
    pub pending: Option<TimerId>,
    _listeners: BTreeMap<u64, Entry<T>>,
    _error_handler: Option<ErrorHandler<T>>,
}

pub(crate) struct Notifier<T> {
    listeners: BTreeMap<u64, Entry<T>>,
    next_key: u64,
    pending: Option<Pending<T>>,
    error_handler: Option<ErrorHandler<T>>,
    debounce: Duration,
    closed: bool,
}

impl<T> Notifier<T> {
    pub fn new(debounce: Duration) -> Self {
        Self {
            listeners: BTreeMap::new(),
            next_key: 0,
            pending: None,
            error_handler: None,
            debounce,
            closed: false,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Takes effect for notifications scheduled afterwards.
    pub fn set_debounce(&mut self, debounce: Duration) {
        self.debounce = debounce;
    }

    /// Returns `None` once closed.
    pub fn insert(&mut self, listener: Listener<T>, edge: bool) -> Option<u64> {
        if self.closed {
            return None;
        }
        let key = self.next_key;
        self.next_key += 1;
        self.listeners.insert(key, Entry { listener, edge });
        Some(key)
    }

    pub fn remove(&mut self, key: u64) -> Option<Entry<T>> {
        self.listeners.remove(&key)
    }

    pub fn external_count(&self) -> usize {
        self.listeners.values().filter(|entry| !entry.edge).count()
    }

    pub fn set_error_handler(&mut self, handler: ErrorHandler<T>) -> Option<ErrorHandler<T>> {
        if self.closed {
            return Some(handler);
        }
        self.error_handler.replace(handler)
    }

    pub fn error_handler(&self) -> Option<ErrorHandler<T>> {
        self.error_handler.clone()
    }

    /// Install `change` as the only pending notification.
    ///
    /// Returns the timer of the notification it supersedes, which the caller
    /// must cancel.
    pub fn replace_pending(&mut self, timer: TimerId, change: Change<T>) -> Option<TimerId> {
        self.pending
            .replace(Pending { timer, change })
            .map(|old| old.timer)
    }

    pub fn pending_timer(&self) -> Option<TimerId> {
        self.pending.as_ref().map(|pending| pending.timer)
    }

    /// Take the pending change if `timer` is the one that owns it, together
    /// with the listeners registered at this moment, in insertion order.
    pub fn take_due(&mut self, timer: TimerId) -> Option<(Change<T>, Vec<Listener<T>>)> {
        if self.pending_timer() != Some(timer) {
            return None;
        }
        let pending = self.pending.take()?;
        let listeners = self
            .listeners
            .values()
            .map(|entry| entry.listener.clone())
            .collect();
        Some((pending.change, listeners))
    }

    pub fn close(&mut self) -> Closed<T> {
        self.closed = true;
        Closed {
            pending: self.pending.take().map(|pending| pending.timer),
            _listeners: std::mem::take(&mut self.listeners),
            _error_handler: self.error_handler.take(),
        }
    }
}

pub(crate) trait ListenerSet: Send + Sync {
    fn remove_listener(&self, key: u64);
}

/// Handle returned by `subscribe`.
///
/// Dropping a `Subscription` does not unsubscribe; call
/// [`Subscription::unsubscribe`] explicitly.
pub struct Subscription {
    target: Weak<dyn ListenerSet>,
    key: u64,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(target: Weak<dyn ListenerSet>, key: u64) -> Self {
        Self {
            target,
            key,
            active: AtomicBool::new(true),
        }
    }

    /// Stop delivering notifications to the listener. Idempotent.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            if let Some(target) = self.target.upgrade() {
                target.remove_listener(self.key);
            }
        }
    }

    /// Returns false after [`unsubscribe`](Self::unsubscribe) has been called.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("active", &self.is_active())
            .finish()
    }
}
