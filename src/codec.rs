//! Canonical encodings used for change detection.
//!
//! Two values are "the same" for a signal iff their canonical encodings are
//! byte-identical. Values that cannot be encoded are rejected rather than
//! compared.

use std::sync::Arc;

use serde::Serialize;

use crate::SignalError;

/// Canonical encoder for values of type `T`.
pub trait Codec<T: ?Sized>: Send + Sync + 'static {
    /// Encode `value` into its canonical byte form.
    fn encode(&self, value: &T) -> Result<Vec<u8>, SignalError>;
}

/// Canonical JSON through [`serde_json::Value`].
///
/// Going through `Value` sorts object keys, so maps with equal entries encode
/// identically whatever their iteration order. Maps whose keys do not
/// serialize as strings are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalJson;

impl<T: Serialize + ?Sized> Codec<T> for CanonicalJson {
    fn encode(&self, value: &T) -> Result<Vec<u8>, SignalError> {
        let canonical = serde_json::to_value(value).map_err(SignalError::serialization)?;
        serde_json::to_vec(&canonical).map_err(SignalError::serialization)
    }
}

/// Encodes a sequence with an element codec: each element is written as a
/// little-endian `u64` length followed by its bytes.
pub struct SequenceCodec<T> {
    element: Arc<dyn Codec<T>>,
}

impl<T> SequenceCodec<T> {
    /// Wrap an element codec.
    pub fn new(element: Arc<dyn Codec<T>>) -> Self {
        Self { element }
    }
}

impl<T: 'static> Codec<Vec<T>> for SequenceCodec<T> {
    fn encode(&self, values: &Vec<T>) -> Result<Vec<u8>, SignalError> {
        let mut out = Vec::new();
        for value in values {
            let bytes = self.element.encode(value)?;
            out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
            out.extend_from_slice(&bytes);
        }
        Ok(out)
    }
}

/// Compare two values through `codec`.
///
/// # Example
/// ```
/// # use synced_signal::{equal, CanonicalJson};
/// assert!(equal(&CanonicalJson, &vec![1, 2], &vec![1, 2]).unwrap());
/// assert!(!equal(&CanonicalJson, &"1", &"2").unwrap());
/// ```
pub fn equal<T, C>(codec: &C, a: &T, b: &T) -> Result<bool, SignalError>
where
    T: ?Sized,
    C: Codec<T> + ?Sized,
{
    Ok(codec.encode(a)? == codec.encode(b)?)
}
