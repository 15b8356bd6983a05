//! Message headers and bodies, including one-shot and cached streams.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;

use crate::types::Value;

/// A re-readable, cached representation of a stream body.
///
/// Reads advance an internal cursor; [`reset`](Self::reset) rewinds it so the
/// next consumer sees the whole payload again.
pub trait StreamCache: Send + Sync + fmt::Debug {
    /// Rewinds the read cursor to the start.
    fn reset(&self);

    /// Reads up to `buf.len()` bytes from the cursor, returning the count read.
    fn read_chunk(&self, buf: &mut [u8]) -> usize;

    /// Total cached length in bytes.
    fn len(&self) -> usize;

    /// Returns `true` if nothing is cached.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The full cached payload, independent of the cursor.
    fn to_bytes(&self) -> Bytes;
}

/// One-shot readable stream body.
pub struct InputStream(Box<dyn Read + Send>);

impl InputStream {
    /// Wraps a reader.
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self(Box::new(reader))
    }

    /// Gives access to the underlying reader.
    pub fn reader(&mut self) -> &mut (dyn Read + Send) {
        self.0.as_mut()
    }
}

impl Read for InputStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl fmt::Debug for InputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InputStream(..)")
    }
}

/// The payload of a message.
#[derive(Debug, Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// A structured value.
    Value(Value),
    /// A stream that can be consumed only once.
    Stream(InputStream),
    /// A stream that was cached and can be re-read after [`StreamCache::reset`].
    Cached(Arc<dyn StreamCache>),
}

impl Body {
    /// Returns `true` for [`Body::Empty`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// Returns the cached stream, if the body is one.
    #[must_use]
    pub fn as_stream_cache(&self) -> Option<&Arc<dyn StreamCache>> {
        match self {
            Body::Cached(cache) => Some(cache),
            _ => None,
        }
    }

    /// Returns the structured value, if the body is one.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Body::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Value(value)
    }
}

/// A message: headers plus body.
#[derive(Debug, Default)]
pub struct Message {
    /// Message headers, ordered for deterministic dumps.
    pub headers: BTreeMap<String, Value>,
    /// Message payload.
    pub body: Body,
}

impl Message {
    /// Creates a message with the given body and no headers.
    #[must_use]
    pub fn with_body(body: impl Into<Body>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }
}
