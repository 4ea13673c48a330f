//! Combining several signals into one sequence-valued signal.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use crate::codec::{Codec, SequenceCodec};
use crate::graph::NodeKind;
use crate::notify::{CallbackResult, Listener, Subscription};
use crate::register::Register;
use crate::revision::{Revision, RevisionId};
use crate::signal::{initial_stamp, Signal, SignalInner};
use crate::SignalError;

/// A frozen signal holding `[caller, sources…]` as a `Vec<T>`.
///
/// Dereferences to the underlying [`Signal<Vec<T>>`]; only
/// [`subscribe`](Merged::subscribe) differs, handing listeners the values
/// as a positional slice.
///
/// # Example
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use synced_signal::Runtime;
///
/// let runtime = Runtime::new();
/// let x = runtime.signal("x".to_string()).unwrap();
/// let y = runtime.signal("y".to_string()).unwrap();
/// let both = x.merge([&y]).unwrap();
/// assert_eq!(both.get(), Some(vec!["x".to_string(), "y".to_string()]));
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let log = seen.clone();
/// both.subscribe(move |values: &[String]| log.lock().unwrap().push(values.join(",")))
///     .unwrap();
///
/// x.set("X".to_string()).unwrap();
/// runtime.run_until_idle();
/// assert_eq!(*seen.lock().unwrap(), vec!["x,y", "X,y"]);
/// ```
pub struct Merged<T> {
    signal: Signal<Vec<T>>,
}

impl<T> Clone for Merged<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

impl<T: fmt::Debug + Clone + 'static> fmt::Debug for Merged<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Merged").field(&self.signal).finish()
    }
}

impl<T> Deref for Merged<T> {
    type Target = Signal<Vec<T>>;

    fn deref(&self) -> &Self::Target {
        &self.signal
    }
}

impl<T: Clone + Send + Sync + 'static> Merged<T> {
    /// Register a listener receiving the merged values as a slice, in
    /// `[caller, sources…]` order.
    ///
    /// Called immediately if every source already holds a value.
    pub fn subscribe<F, R>(&self, listener: F) -> Result<Subscription, SignalError>
    where
        F: Fn(&[T]) -> R + Send + Sync + 'static,
        R: CallbackResult,
    {
        self.signal.subscribe(
            move |values: &Vec<T>, _: Option<&Vec<T>>, _: Revision, _: &RevisionId| {
                listener(values.as_slice())
            },
        )
    }

    /// Like [`subscribe`](Merged::subscribe), also passing the merged
    /// signal's revision and revision id for each delivery.
    pub fn subscribe_stamped<F, R>(&self, listener: F) -> Result<Subscription, SignalError>
    where
        F: Fn(&[T], Revision, &RevisionId) -> R + Send + Sync + 'static,
        R: CallbackResult,
    {
        self.signal.subscribe(
            move |values: &Vec<T>, _: Option<&Vec<T>>, revision: Revision, id: &RevisionId| {
                listener(values.as_slice(), revision, id)
            },
        )
    }

    /// The underlying signal.
    pub fn as_signal(&self) -> &Signal<Vec<T>> {
        &self.signal
    }

    /// Unwrap into the underlying signal.
    pub fn into_signal(self) -> Signal<Vec<T>> {
        self.signal
    }
}

/// Current values of every source, or `None` while any is empty or gone.
fn gather<T: Clone + Send + Sync + 'static>(sources: &[Weak<SignalInner<T>>]) -> Option<Vec<T>> {
    sources
        .iter()
        .map(|source| source.upgrade()?.value())
        .collect()
}

impl<T: Clone + Send + Sync + 'static> Signal<T> {
    /// Combine this signal with `sources` into a frozen [`Merged`] signal.
    ///
    /// The merged value is `[self, sources…]` once every signal holds a value
    /// and is recomputed whenever any of them delivers a change.
    ///
    /// Fails with [`SignalError::EmptyMerge`] if `sources` is empty and with
    /// [`SignalError::NotASignal`] if a source is disposed or belongs to
    /// another runtime.
    pub fn merge<'a, I>(&self, sources: I) -> Result<Merged<T>, SignalError>
    where
        I: IntoIterator<Item = &'a Signal<T>>,
        T: 'a,
    {
        let others: Vec<Signal<T>> = sources.into_iter().cloned().collect();
        if others.is_empty() {
            return Err(SignalError::EmptyMerge);
        }
        if self.is_disposed() {
            return Err(SignalError::Disposed);
        }
        let runtime = self.runtime();
        for source in &others {
            if !runtime.same_runtime(source.runtime())
                || source.is_disposed()
                || !runtime.contains(source.id())
            {
                return Err(SignalError::NotASignal { id: source.id() });
            }
        }

        let mut all = Vec::with_capacity(others.len() + 1);
        all.push(self.clone());
        all.extend(others);

        let sources: Arc<[Weak<SignalInner<T>>]> =
            all.iter().map(|s| Arc::downgrade(&s.inner)).collect();
        let codec: Arc<dyn Codec<Vec<T>>> =
            Arc::new(SequenceCodec::new(self.inner.codec.clone()));
        let register = Register::new(gather(&sources), initial_stamp(runtime), &*codec, true)?;
        let merged = SignalInner::create(
            runtime,
            NodeKind::Merge,
            all.iter().map(Signal::id).collect(),
            codec,
            register,
            runtime.default_debounce(),
        );

        let mut subscribed = Vec::with_capacity(all.len());
        for source in &all {
            if subscribed.contains(&source.id()) {
                continue;
            }
            subscribed.push(source.id());
            let edge: Listener<T> = {
                let merged = merged.clone();
                let sources = sources.clone();
                Arc::new(
                    move |_: &T, _: Option<&T>, _: Revision, _: &RevisionId| {
                        if let Some(values) = gather(&sources) {
                            merged.recompute(|| Ok(values));
                        }
                        Ok(())
                    },
                )
            };
            let upstream = source.inner.add_listener(edge, true)?;
            merged.upstream.lock().push(upstream);
        }
        Ok(Merged {
            signal: Signal { inner: merged },
        })
    }
}
