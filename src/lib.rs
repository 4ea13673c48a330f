#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod codec;
mod config;
#[cfg(feature = "tokio")]
mod driver;
mod error;
mod graph;
mod merge;
mod notify;
mod register;
mod remote;
mod revision;
mod runtime;
mod scheduler;
mod signal;
pub mod tracer;

pub use codec::{equal, CanonicalJson, Codec, SequenceCodec};
pub use config::{validate_debounce, ConfigError, IdStrategy, RuntimeConfig, MAX_DEBOUNCE, MAX_DEBOUNCE_MS};
pub use error::SignalError;
pub use graph::{Edges, NodeKind, SignalId};
pub use merge::Merged;
pub use notify::{CallbackResult, Subscription};
pub use register::{Change, RemoteOutcome};
pub use remote::RemoteUpdate;
pub use revision::{
    IdSource, Resolution, Revision, RevisionId, SequentialIds, Stamp, UuidV7Ids, INITIAL_REVISION,
};
pub use runtime::{Runtime, RuntimeBuilder};
pub use scheduler::{Clock, ManualClock, SystemClock, TimerId};
pub use signal::{Signal, SignalBuilder};
pub use tracer::{LogTracer, NoopTracer, Tracer, WriteOrigin};
