//! Synchronized signals and derivation through `map`.

use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::codec::{CanonicalJson, Codec};
use crate::config::validate_debounce;
use crate::graph::{Disposable, Edges, NodeKind, SignalId};
use crate::notify::{guarded, CallbackResult, Listener, ListenerSet, Notifier, Subscription};
use crate::register::{Change, RemoteOutcome, Register, WriteOutcome, Writer};
use crate::remote::RemoteUpdate;
use crate::revision::{Revision, RevisionId, Stamp, INITIAL_REVISION};
use crate::runtime::Runtime;
use crate::scheduler::TimerId;
use crate::tracer::WriteOrigin;
use crate::SignalError;

/// A reactive register with last-writer-wins conflict resolution.
///
/// A signal holds an optional value stamped with `(revision, revision id)`.
/// Local writes through [`set`](Self::set) bump the revision; remote writes
/// through [`apply_remote`](Self::apply_remote) are accepted only if their
/// stamp is ahead of the current one. Accepted changes are delivered to
/// subscribers after the signal's debounce window, coalesced so only the
/// latest change is seen.
///
/// `Signal` is a cheap handle; clones refer to the same register.
///
/// # Example
///
/// ```
/// use synced_signal::{RemoteOutcome, Runtime};
///
/// let runtime = Runtime::new();
/// let title = runtime.signal_builder().value("draft".to_string()).revision(3).build().unwrap();
///
/// assert_eq!(title.apply_remote(2, "peer", "old".to_string()).unwrap(), RemoteOutcome::Stale);
/// assert_eq!(title.apply_remote(4, "peer", "final".to_string()).unwrap(), RemoteOutcome::Applied);
/// assert_eq!(title.get().as_deref(), Some("final"));
/// assert_eq!(title.revision(), 4);
/// ```
pub struct Signal<T> {
    pub(crate) inner: Arc<SignalInner<T>>,
}

pub(crate) struct SignalInner<T> {
    pub(crate) id: SignalId,
    pub(crate) kind: NodeKind,
    pub(crate) runtime: Runtime,
    pub(crate) codec: Arc<dyn Codec<T>>,
    pub(crate) register: Mutex<Register<T>>,
    pub(crate) notifier: Mutex<Notifier<T>>,
    /// Derivation edges this signal holds on its parents.
    pub(crate) upstream: Mutex<Vec<Subscription>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug + Clone + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let register = self.inner.register.lock();
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("value", &register.value())
            .field("stamp", register.stamp())
            .field("frozen", &register.is_frozen())
            .field("disposed", &register.is_disposed())
            .finish()
    }
}

pub(crate) fn initial_stamp(runtime: &Runtime) -> Stamp {
    Stamp {
        revision: INITIAL_REVISION,
        id: runtime.ids().fresh_id(),
    }
}

impl<T: Clone + Send + Sync + 'static> SignalInner<T> {
    pub(crate) fn create(
        runtime: &Runtime,
        kind: NodeKind,
        parents: Vec<SignalId>,
        codec: Arc<dyn Codec<T>>,
        register: Register<T>,
        debounce: Duration,
    ) -> Arc<Self> {
        let id = runtime.graph().allocate();
        let inner = Arc::new(Self {
            id,
            kind,
            runtime: runtime.clone(),
            codec,
            register: Mutex::new(register),
            notifier: Mutex::new(Notifier::new(debounce)),
            upstream: Mutex::new(Vec::new()),
        });
        let handle: Weak<SignalInner<T>> = Arc::downgrade(&inner);
        runtime.graph().insert(id, kind, parents, handle);
        runtime.tracer().on_signal_created(id, kind);
        inner
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.register.lock().is_disposed()
    }

    pub(crate) fn value(&self) -> Option<T> {
        self.register.lock().value().cloned()
    }

    /// Returns true if the value changed.
    fn write_local(self: &Arc<Self>, value: T, writer: Writer) -> Result<bool, SignalError> {
        let origin = match writer {
            Writer::Public => WriteOrigin::Local,
            Writer::Derivation => WriteOrigin::Derived,
        };
        // Scheduling happens under the register lock so that pending
        // notifications are installed in write order.
        let mut register = self.register.lock();
        match register.write_local(value, &*self.codec, self.runtime.ids(), writer)? {
            WriteOutcome::Changed(change) => {
                self.runtime
                    .tracer()
                    .on_write(self.id, origin, &change.stamp, true);
                self.schedule(change);
                Ok(true)
            }
            WriteOutcome::Unchanged => Ok(false),
        }
    }

    fn apply_remote(
        self: &Arc<Self>,
        revision: Revision,
        id: &str,
        value: T,
    ) -> Result<RemoteOutcome, SignalError> {
        let mut register = self.register.lock();
        let write = register.write_remote(revision, id, value, &*self.codec)?;
        let outcome = write.remote_outcome();
        let tracer = self.runtime.tracer();
        tracer.on_remote_resolved(self.id, &write.incoming, write.resolution);
        match write.outcome {
            WriteOutcome::Changed(change) => {
                tracer.on_write(self.id, WriteOrigin::Remote, &change.stamp, true);
                self.schedule(change);
            }
            WriteOutcome::Unchanged if outcome == RemoteOutcome::Adopted => {
                tracer.on_write(self.id, WriteOrigin::Remote, &write.incoming, false);
            }
            WriteOutcome::Unchanged => {}
        }
        Ok(outcome)
    }

    fn schedule(self: &Arc<Self>, change: Change<T>) {
        let mut notifier = self.notifier.lock();
        let delay = notifier.debounce();
        let weak = Arc::downgrade(self);
        let timer = self.runtime.schedule_timer(
            delay,
            Box::new(move |timer: TimerId| {
                if let Some(inner) = weak.upgrade() {
                    inner.flush(timer);
                }
            }),
        );
        let superseded = match notifier.replace_pending(timer, change) {
            Some(previous) => self.runtime.cancel_timer(previous),
            None => false,
        };
        drop(notifier);
        self.runtime
            .tracer()
            .on_notification_scheduled(self.id, delay, superseded);
    }

    fn flush(&self, timer: TimerId) {
        let due = self.notifier.lock().take_due(timer);
        let Some((change, listeners)) = due else {
            return;
        };
        self.runtime
            .tracer()
            .on_notify(self.id, &change.stamp, listeners.len());
        for listener in listeners {
            let result = guarded(|| {
                listener(
                    &change.value,
                    change.old.as_ref(),
                    change.stamp.revision,
                    &change.stamp.id,
                )
            });
            if let Err(err) = result {
                self.report(SignalError::listener(err));
            }
        }
    }

    /// Deliver a contained callback failure to the error handler.
    pub(crate) fn report(&self, error: SignalError) {
        self.runtime.tracer().on_callback_error(self.id, &error);
        let handler = self.notifier.lock().error_handler();
        if let Some(handler) = handler {
            let value = self.value();
            // A failing handler has nowhere left to report to.
            let _ = guarded(|| {
                handler(&error, value.as_ref());
                Ok(())
            });
        }
    }

    /// Write the result of a derivation, bypassing the freeze gate.
    pub(crate) fn recompute(self: &Arc<Self>, compute: impl FnOnce() -> anyhow::Result<T>) {
        if self.is_disposed() {
            return;
        }
        match guarded(compute) {
            Ok(value) => match self.write_local(value, Writer::Derivation) {
                Ok(_) | Err(SignalError::Disposed) => {}
                Err(err) => self.report(err),
            },
            Err(err) => self.report(SignalError::derivation(err)),
        }
    }

    pub(crate) fn add_listener(
        self: &Arc<Self>,
        listener: Listener<T>,
        edge: bool,
    ) -> Result<Subscription, SignalError> {
        let key = self
            .notifier
            .lock()
            .insert(listener, edge)
            .ok_or(SignalError::Disposed)?;
        let target: Weak<SignalInner<T>> = Arc::downgrade(self);
        Ok(Subscription::new(target, key))
    }
}

impl<T: Clone + Send + Sync + 'static> ListenerSet for SignalInner<T> {
    fn remove_listener(&self, key: u64) {
        let removed = self.notifier.lock().remove(key);
        drop(removed);
    }
}

impl<T: Clone + Send + Sync + 'static> Disposable for SignalInner<T> {
    fn dispose(&self) {
        if !self.register.lock().dispose() {
            return;
        }
        let graph = self.runtime.graph();
        // Hold the children alive until they are disposed themselves; closing
        // the notifier drops the edges that own them.
        let children: Vec<Arc<dyn Disposable>> = graph
            .children(self.id)
            .map(|edges| {
                edges
                    .iter()
                    .filter_map(|child| graph.handle(child)?.upgrade())
                    .collect()
            })
            .unwrap_or_default();

        let closed = self.notifier.lock().close();
        if let Some(timer) = closed.pending {
            self.runtime.cancel_timer(timer);
        }
        drop(closed);

        let upstream = std::mem::take(&mut *self.upstream.lock());
        for subscription in upstream {
            subscription.unsubscribe();
        }
        graph.detach(self.id);
        self.runtime.tracer().on_disposed(self.id);

        for child in children {
            child.dispose();
        }
    }
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.notifier.get_mut().pending_timer() {
            self.runtime.cancel_timer(timer);
        }
        self.runtime.graph().detach(self.id);
    }
}

impl<T: Clone + Send + Sync + 'static> Signal<T> {
    /// Identifier of this signal within its runtime.
    pub fn id(&self) -> SignalId {
        self.inner.id
    }

    /// How the signal was constructed.
    pub fn kind(&self) -> NodeKind {
        self.inner.kind
    }

    /// The runtime hosting this signal.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Current value; `None` while the signal is empty.
    ///
    /// Disposed signals still return their last value.
    pub fn get(&self) -> Option<T> {
        self.inner.value()
    }

    /// Current revision.
    pub fn revision(&self) -> Revision {
        self.inner.register.lock().stamp().revision
    }

    /// Current revision id.
    pub fn revision_id(&self) -> RevisionId {
        self.inner.register.lock().stamp().id.clone()
    }

    /// Current `(revision, revision id)` pair.
    pub fn stamp(&self) -> Stamp {
        self.inner.register.lock().stamp().clone()
    }

    /// Debounce applied to notifications scheduled from now on.
    pub fn debounce(&self) -> Duration {
        self.inner.notifier.lock().debounce()
    }

    /// Change the debounce. A pending notification keeps its deadline.
    ///
    /// Fails with [`SignalError::InvalidDebounce`] and keeps the old setting
    /// if `debounce` is not whole milliseconds within
    /// [`MAX_DEBOUNCE`](crate::MAX_DEBOUNCE).
    pub fn set_debounce(&self, debounce: Duration) -> Result<(), SignalError> {
        let debounce = validate_debounce(debounce)?;
        self.inner.notifier.lock().set_debounce(debounce);
        Ok(())
    }

    /// Returns true once [`freeze`](Self::freeze) was called, and always for
    /// derived signals.
    pub fn is_frozen(&self) -> bool {
        self.inner.register.lock().is_frozen()
    }

    /// Returns true once [`dispose`](Self::dispose) was called.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Write a value locally.
    ///
    /// A value that encodes identically to the current one is a no-op and
    /// returns `false`. Otherwise the revision is bumped, a fresh revision id
    /// is drawn, a notification is scheduled and `true` is returned.
    pub fn set(&self, value: T) -> Result<bool, SignalError> {
        self.inner.write_local(value, Writer::Public)
    }

    /// Read the current value, compute a new one and [`set`](Self::set) it.
    ///
    /// This is not a compare-and-swap: a concurrent write between the read
    /// and the write is overwritten.
    pub fn update(&self, f: impl FnOnce(Option<&T>) -> T) -> Result<bool, SignalError> {
        let current = self.get();
        self.set(f(current.as_ref()))
    }

    /// Apply a write from another replica.
    ///
    /// The update is accepted if `revision` is greater than the current
    /// revision, or equal with an `id` that sorts after the current id.
    /// Rejected updates have no effect at all.
    pub fn apply_remote(
        &self,
        revision: Revision,
        id: impl AsRef<str>,
        value: T,
    ) -> Result<RemoteOutcome, SignalError> {
        self.inner.apply_remote(revision, id.as_ref(), value)
    }

    /// [`apply_remote`](Self::apply_remote) for a transport frame.
    pub fn apply_remote_update(&self, update: RemoteUpdate<T>) -> Result<RemoteOutcome, SignalError> {
        self.inner
            .apply_remote(update.revision, &update.id, update.value)
    }

    /// The current value and stamp as a transport frame; `None` while empty.
    pub fn snapshot(&self) -> Option<RemoteUpdate<T>> {
        let register = self.inner.register.lock();
        register
            .value()
            .map(|value| RemoteUpdate::new(register.stamp(), value.clone()))
    }

    /// Register a listener called with `(value, old, revision, revision id)`
    /// for every delivered change.
    ///
    /// If the signal holds a value, the listener is first called
    /// synchronously with `old = None`. A listener returning an error or
    /// panicking never affects the writer or other listeners; the failure
    /// goes to the [`on_error`](Self::on_error) handler.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::{Arc, Mutex};
    /// use synced_signal::Runtime;
    ///
    /// let runtime = Runtime::new();
    /// let signal = runtime.signal(1).unwrap();
    /// let seen = Arc::new(Mutex::new(Vec::new()));
    ///
    /// let log = seen.clone();
    /// let subscription = signal
    ///     .subscribe(move |value, old, _revision, _id| log.lock().unwrap().push((*value, old.copied())))
    ///     .unwrap();
    ///
    /// signal.set(2).unwrap();
    /// signal.set(3).unwrap();
    /// runtime.run_due();
    /// subscription.unsubscribe();
    ///
    /// assert_eq!(*seen.lock().unwrap(), vec![(1, None), (3, Some(2))]);
    /// ```
    pub fn subscribe<F, R>(&self, listener: F) -> Result<Subscription, SignalError>
    where
        F: Fn(&T, Option<&T>, Revision, &RevisionId) -> R + Send + Sync + 'static,
        R: CallbackResult,
    {
        let listener: Listener<T> = Arc::new(
            move |value: &T, old: Option<&T>, revision: Revision, id: &RevisionId| {
                listener(value, old, revision, id).into_result()
            },
        );
        let current = {
            let register = self.inner.register.lock();
            if register.is_disposed() {
                return Err(SignalError::Disposed);
            }
            register
                .value()
                .map(|value| (value.clone(), register.stamp().clone()))
        };
        if let Some((value, stamp)) = current {
            if let Err(err) = guarded(|| listener(&value, None, stamp.revision, &stamp.id)) {
                self.inner.report(SignalError::listener(err));
            }
        }
        self.inner.add_listener(listener, false)
    }

    /// Install the error handler, replacing any previous one.
    ///
    /// The handler receives contained listener and derivation failures
    /// together with the signal's current value.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&SignalError, Option<&T>) + Send + Sync + 'static,
    {
        let previous = self.inner.notifier.lock().set_error_handler(Arc::new(handler));
        drop(previous);
    }

    /// Reject every further `set` and `apply_remote`. Permanent.
    pub fn freeze(&self) {
        self.inner.register.lock().freeze();
    }

    /// Tear the signal down, together with every signal derived from it.
    ///
    /// Cancels the pending notification, drops listeners and the error
    /// handler, and detaches the signal from the graph. Idempotent.
    pub fn dispose(&self) {
        Disposable::dispose(&*self.inner);
    }

    /// Derive a frozen signal holding `f(value)`.
    ///
    /// The derived value is computed immediately (an empty parent gives an
    /// empty derived signal) and recomputed from this signal's current value
    /// whenever one of its changes is delivered.
    pub fn map<U, F>(&self, f: F) -> Result<Signal<U>, SignalError>
    where
        U: Serialize + Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.try_map(move |value: &T| Ok::<U, Infallible>(f(value)))
    }

    /// Like [`map`](Self::map) with a fallible derivation.
    ///
    /// An error from the initial computation fails the call with
    /// [`SignalError::Derivation`]. Later errors leave the derived value
    /// unchanged and go to the derived signal's error handler.
    ///
    /// # Example
    ///
    /// ```
    /// use synced_signal::{Runtime, SignalError};
    ///
    /// let runtime = Runtime::new();
    /// let input = runtime.signal("7".to_string()).unwrap();
    /// let parsed = input.try_map(|s| s.parse::<i64>()).unwrap();
    ///
    /// let last_error = std::sync::Arc::new(std::sync::Mutex::new(None));
    /// let sink = last_error.clone();
    /// parsed.on_error(move |err, value| *sink.lock().unwrap() = Some((err.to_string(), value.copied())));
    ///
    /// input.set("seven".to_string()).unwrap();
    /// runtime.run_due();
    ///
    /// assert_eq!(parsed.get(), Some(7));
    /// let (message, value) = last_error.lock().unwrap().clone().unwrap();
    /// assert!(message.starts_with("derivation failed"));
    /// assert_eq!(value, Some(7));
    /// ```
    pub fn try_map<U, E, F>(&self, f: F) -> Result<Signal<U>, SignalError>
    where
        U: Serialize + Clone + Send + Sync + 'static,
        E: Into<anyhow::Error>,
        F: Fn(&T) -> Result<U, E> + Send + Sync + 'static,
    {
        self.derive(Arc::new(CanonicalJson), move |value: &T| {
            f(value).map_err(Into::into)
        })
    }

    fn derive<U, F>(&self, codec: Arc<dyn Codec<U>>, f: F) -> Result<Signal<U>, SignalError>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> anyhow::Result<U> + Send + Sync + 'static,
    {
        let current = {
            let register = self.inner.register.lock();
            if register.is_disposed() {
                return Err(SignalError::Disposed);
            }
            register.value().cloned()
        };
        let initial = match current {
            Some(value) => Some(guarded(|| f(&value)).map_err(SignalError::derivation)?),
            None => None,
        };

        let runtime = self.runtime();
        let register = Register::new(initial, initial_stamp(runtime), &*codec, true)?;
        let derived = SignalInner::create(
            runtime,
            NodeKind::Map,
            vec![self.id()],
            codec,
            register,
            runtime.default_debounce(),
        );

        // The delivered value may already be outdated if an earlier listener
        // wrote to the parent, so derive from the parent's current value.
        let edge: Listener<T> = {
            let derived = derived.clone();
            let parent: Weak<SignalInner<T>> = Arc::downgrade(&self.inner);
            Arc::new(
                move |_: &T, _: Option<&T>, _: Revision, _: &RevisionId| {
                    if let Some(current) = parent.upgrade().and_then(|parent| parent.value()) {
                        derived.recompute(|| f(&current));
                    }
                    Ok(())
                },
            )
        };
        let upstream = self.inner.add_listener(edge, true)?;
        derived.upstream.lock().push(upstream);
        Ok(Signal { inner: derived })
    }

    /// Signals this one is derived from.
    pub fn parents(&self) -> Edges {
        self.runtime().parents(self.id()).unwrap_or_default()
    }

    /// Signals derived from this one.
    pub fn children(&self) -> Edges {
        self.runtime().children(self.id()).unwrap_or_default()
    }

    /// Number of subscribers, not counting derivation edges.
    pub fn listener_count(&self) -> usize {
        self.inner.notifier.lock().external_count()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for a source signal, created by
/// [`Runtime::signal_builder`] or [`Runtime::signal_builder_with_codec`].
///
/// Defaults: empty, revision 1, a fresh revision id, the runtime's default
/// debounce.
pub struct SignalBuilder<T> {
    runtime: Runtime,
    codec: Arc<dyn Codec<T>>,
    value: Option<T>,
    revision: Revision,
    revision_id: Option<String>,
    debounce: Option<Duration>,
}

impl<T: Clone + Send + Sync + 'static> SignalBuilder<T> {
    pub(crate) fn new(runtime: Runtime, codec: Arc<dyn Codec<T>>) -> Self {
        Self {
            runtime,
            codec,
            value: None,
            revision: INITIAL_REVISION,
            revision_id: None,
            debounce: None,
        }
    }

    /// Initial value.
    pub fn value(mut self, value: T) -> Self {
        self.value = Some(value);
        self
    }

    /// Initial revision; must be at least 1.
    pub fn revision(mut self, revision: Revision) -> Self {
        self.revision = revision;
        self
    }

    /// Initial revision id; must not be empty.
    pub fn revision_id(mut self, id: impl Into<String>) -> Self {
        self.revision_id = Some(id.into());
        self
    }

    /// Notification debounce.
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = Some(debounce);
        self
    }

    /// Replace the equality codec.
    pub fn codec<C: Codec<T>>(mut self, codec: C) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Create the signal.
    pub fn build(self) -> Result<Signal<T>, SignalError> {
        let stamp = match self.revision_id {
            Some(id) => Stamp::new(self.revision, id)?,
            None => Stamp::new(self.revision, self.runtime.ids().fresh_id())?,
        };
        let debounce =
            validate_debounce(self.debounce.unwrap_or(self.runtime.default_debounce()))?;
        let register = Register::new(self.value, stamp, &*self.codec, false)?;
        let inner = SignalInner::create(
            &self.runtime,
            NodeKind::Source,
            Vec::new(),
            self.codec,
            register,
            debounce,
        );
        Ok(Signal { inner })
    }
}
