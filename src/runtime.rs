//! Runtime hosting signals: clock, timer queue, dependency graph, id source
//! and tracer.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::codec::{CanonicalJson, Codec};
use crate::config::{validate_debounce, IdStrategy, RuntimeConfig};
use crate::graph::{Edges, Graph, NodeKind, SignalId};
use crate::revision::{IdSource, SequentialIds, UuidV7Ids};
use crate::scheduler::{Clock, ManualClock, SystemClock, Task, TimerId, TimerQueue};
use crate::signal::{Signal, SignalBuilder};
use crate::tracer::{NoopTracer, Tracer};
use crate::SignalError;

/// The host of a family of signals.
///
/// Signals can only be merged with signals of the same runtime. Debounced
/// notifications are queued here and delivered by [`Runtime::run_due`],
/// [`Runtime::run_until_idle`] or, with the `tokio` feature, the async
/// driver `Runtime::drive`.
///
/// Cloning is cheap and clones share all state.
///
/// # Example
///
/// ```
/// use synced_signal::Runtime;
///
/// let runtime = Runtime::new();
/// let count = runtime.signal(1).unwrap();
/// let doubled = count.map(|n| n * 2).unwrap();
///
/// count.set(5).unwrap();
/// runtime.run_until_idle();
/// assert_eq!(doubled.get(), Some(10));
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    clock: Arc<dyn Clock>,
    manual_clock: Option<ManualClock>,
    timers: Mutex<TimerQueue>,
    graph: Graph,
    ids: Arc<dyn IdSource>,
    tracer: Arc<dyn Tracer>,
    default_debounce: Duration,
    config: RuntimeConfig,
    #[cfg(feature = "tokio")]
    wake: tokio::sync::Notify,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("signals", &self.node_count())
            .field("pending_timers", &self.pending_timers())
            .field("default_debounce", &self.inner.default_debounce)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Create a runtime with the system clock, UUIDv7 ids, no tracer and
    /// zero default debounce.
    pub fn new() -> Self {
        Self::from_parts(
            Arc::new(SystemClock::new()),
            None,
            Arc::new(UuidV7Ids),
            Arc::new(NoopTracer),
            Duration::ZERO,
            RuntimeConfig::default(),
        )
    }

    /// Create a builder for customizing the runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    fn from_parts(
        clock: Arc<dyn Clock>,
        manual_clock: Option<ManualClock>,
        ids: Arc<dyn IdSource>,
        tracer: Arc<dyn Tracer>,
        default_debounce: Duration,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                clock,
                manual_clock,
                timers: Mutex::new(TimerQueue::new()),
                graph: Graph::new(),
                ids,
                tracer,
                default_debounce,
                config,
                #[cfg(feature = "tokio")]
                wake: tokio::sync::Notify::new(),
            }),
        }
    }

    /// The configuration the runtime was built from.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Debounce given to signals that do not set their own.
    pub fn default_debounce(&self) -> Duration {
        self.inner.default_debounce
    }

    /// Returns true if both handles refer to the same runtime.
    pub fn same_runtime(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn graph(&self) -> &Graph {
        &self.inner.graph
    }

    pub(crate) fn ids(&self) -> &dyn IdSource {
        &*self.inner.ids
    }

    pub(crate) fn tracer(&self) -> &dyn Tracer {
        &*self.inner.tracer
    }

    // ========================================================================
    // Signal construction
    // ========================================================================

    /// Create a source signal holding `value`, stamped `(1, fresh id)`.
    ///
    /// Fails with [`SignalError::Serialization`] if the value cannot be
    /// encoded.
    pub fn signal<T>(&self, value: T) -> Result<Signal<T>, SignalError>
    where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        self.signal_builder().value(value).build()
    }

    /// Create a source signal with no value yet.
    pub fn empty_signal<T>(&self) -> Result<Signal<T>, SignalError>
    where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        self.signal_builder().build()
    }

    /// Builder for a source signal compared through [`CanonicalJson`].
    pub fn signal_builder<T>(&self) -> SignalBuilder<T>
    where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        SignalBuilder::new(self.clone(), Arc::new(CanonicalJson))
    }

    /// Builder for a source signal compared through a custom codec.
    pub fn signal_builder_with_codec<T, C>(&self, codec: C) -> SignalBuilder<T>
    where
        T: Clone + Send + Sync + 'static,
        C: Codec<T>,
    {
        SignalBuilder::new(self.clone(), Arc::new(codec))
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Time on the runtime's clock.
    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    /// Deadline of the earliest pending notification.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.inner.timers.lock().next_deadline()
    }

    /// Number of notifications waiting for their debounce window to close.
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.lock().len()
    }

    pub(crate) fn schedule_timer(&self, delay: Duration, task: Task) -> TimerId {
        let deadline = self.now().saturating_add(delay);
        let id = self.inner.timers.lock().schedule(deadline, task);
        #[cfg(feature = "tokio")]
        self.inner.wake.notify_one();
        id
    }

    pub(crate) fn cancel_timer(&self, id: TimerId) -> bool {
        self.inner.timers.lock().cancel(id)
    }

    /// Deliver every notification whose deadline has passed, including ones
    /// scheduled by the listeners it runs. Returns the number delivered.
    pub fn run_due(&self) -> usize {
        let mut fired = 0;
        loop {
            let now = self.now();
            // The queue lock is released before the task runs.
            let due = self.inner.timers.lock().pop_due(now);
            let Some((id, task)) = due else {
                break;
            };
            task(id);
            fired += 1;
        }
        fired
    }

    /// Like [`run_due`](Self::run_due), and when the runtime uses a
    /// [`ManualClock`] also advances it to each pending deadline until no
    /// notification is left.
    ///
    /// With the system clock only already-due notifications are delivered.
    pub fn run_until_idle(&self) -> usize {
        let mut fired = self.run_due();
        if let Some(clock) = &self.inner.manual_clock {
            while let Some(deadline) = self.next_deadline() {
                clock.advance_to(deadline);
                fired += self.run_due();
            }
        }
        fired
    }

    #[cfg(feature = "tokio")]
    pub(crate) fn wake(&self) -> &tokio::sync::Notify {
        &self.inner.wake
    }

    // ========================================================================
    // Graph introspection
    // ========================================================================

    /// Parents of a live signal; `None` if it is not part of this runtime.
    pub fn parents(&self, id: SignalId) -> Option<Edges> {
        self.inner.graph.parents(id)
    }

    /// Signals derived from a live signal.
    pub fn children(&self, id: SignalId) -> Option<Edges> {
        self.inner.graph.children(id)
    }

    /// How a live signal was constructed.
    pub fn node_kind(&self, id: SignalId) -> Option<NodeKind> {
        self.inner.graph.kind(id)
    }

    /// Returns true if `id` is a live signal of this runtime.
    pub fn contains(&self, id: SignalId) -> bool {
        self.inner.graph.contains(id)
    }

    /// Number of live signals.
    pub fn node_count(&self) -> usize {
        self.inner.graph.len()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Runtime`] with customizable settings.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use synced_signal::{LogTracer, ManualClock, Runtime, SequentialIds};
///
/// let clock = ManualClock::new();
/// let runtime = Runtime::builder()
///     .manual_clock(clock.clone())
///     .id_source(SequentialIds::new("node-a/"))
///     .default_debounce(Duration::from_millis(20))
///     .tracer(LogTracer)
///     .build()
///     .unwrap();
///
/// let signal = runtime.signal("hello".to_string()).unwrap();
/// assert_eq!(signal.debounce(), Duration::from_millis(20));
/// ```
#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    default_debounce: Option<Duration>,
    clock: Option<Arc<dyn Clock>>,
    manual_clock: Option<ManualClock>,
    ids: Option<Arc<dyn IdSource>>,
    tracer: Option<Arc<dyn Tracer>>,
}

impl RuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a [`RuntimeConfig`]. Explicit setters take precedence.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Debounce for new signals. Validated by [`build`](Self::build).
    pub fn default_debounce(mut self, debounce: Duration) -> Self {
        self.default_debounce = Some(debounce);
        self
    }

    /// Use a custom clock.
    pub fn clock<C: Clock>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self.manual_clock = None;
        self
    }

    /// Use a manual clock; enables time travel in
    /// [`Runtime::run_until_idle`].
    pub fn manual_clock(mut self, clock: ManualClock) -> Self {
        self.clock = Some(Arc::new(clock.clone()));
        self.manual_clock = Some(clock);
        self
    }

    /// Use a custom revision id source instead of the configured strategy.
    pub fn id_source<S: IdSource>(mut self, ids: S) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    /// Install a tracer.
    pub fn tracer<T: Tracer>(mut self, tracer: T) -> Self {
        self.tracer = Some(Arc::new(tracer));
        self
    }

    /// Build the runtime with the configured settings.
    ///
    /// Fails with [`SignalError::InvalidDebounce`] if the default debounce is
    /// out of range.
    pub fn build(self) -> Result<Runtime, SignalError> {
        let default_debounce = match self.default_debounce {
            Some(debounce) => validate_debounce(debounce)?,
            None => self.config.default_debounce()?,
        };
        let ids: Arc<dyn IdSource> = match self.ids {
            Some(ids) => ids,
            None => match &self.config.ids {
                IdStrategy::Uuid => Arc::new(UuidV7Ids),
                IdStrategy::Sequential { prefix } => Arc::new(SequentialIds::new(prefix.clone())),
            },
        };
        Ok(Runtime::from_parts(
            self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            self.manual_clock,
            ids,
            self.tracer.unwrap_or_else(|| Arc::new(NoopTracer)),
            default_debounce,
            self.config,
        ))
    }
}
