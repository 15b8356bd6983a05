//! Stream caching: turns one-shot stream bodies into re-readable caches.

use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use switchyard_core::{Body, Exchange, InputStream, StreamCache};

use crate::advice::{Advice, HIGHEST};
use crate::config::StreamCachingConfig;
use crate::error::EngineError;

/// In-memory [`StreamCache`] over a `Bytes` buffer.
#[derive(Debug)]
pub struct CachedBytes {
    bytes: Bytes,
    position: AtomicUsize,
}

impl CachedBytes {
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            position: AtomicUsize::new(0),
        }
    }

    /// Current read cursor.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Acquire)
    }
}

impl StreamCache for CachedBytes {
    fn reset(&self) {
        self.position.store(0, Ordering::Release);
    }

    fn read_chunk(&self, buf: &mut [u8]) -> usize {
        let start = self.position.load(Ordering::Acquire).min(self.bytes.len());
        let n = buf.len().min(self.bytes.len() - start);
        buf[..n].copy_from_slice(&self.bytes[start..start + n]);
        self.position.store(start + n, Ordering::Release);
        n
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }
}

/// Converts a stream body into a [`StreamCache`].
pub trait StreamCachingStrategy: Send + Sync {
    /// Reads `stream` into a cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be read or is too large to cache.
    /// On error `stream` must still yield the full payload from its start.
    fn cache(&self, stream: &mut InputStream) -> anyhow::Result<Arc<dyn StreamCache>>;
}

/// Spools streams into memory, up to `max_in_memory_bytes`.
#[derive(Debug, Clone, Default)]
pub struct DefaultStreamCachingStrategy {
    config: StreamCachingConfig,
}

impl DefaultStreamCachingStrategy {
    #[must_use]
    pub fn new(config: StreamCachingConfig) -> Self {
        Self { config }
    }
}

impl StreamCachingStrategy for DefaultStreamCachingStrategy {
    fn cache(&self, stream: &mut InputStream) -> anyhow::Result<Arc<dyn StreamCache>> {
        let limit = self.config.max_in_memory_bytes;
        let mut buf = Vec::new();
        // One byte past the limit is enough to detect overflow.
        let read = Read::take(stream.reader(), (limit as u64).saturating_add(1))
            .read_to_end(&mut buf);
        if let Err(err) = read {
            unread(stream, buf);
            return Err(EngineError::from(err).into());
        }
        if buf.len() > limit {
            let size = buf.len();
            unread(stream, buf);
            return Err(EngineError::StreamTooLarge { size, limit }.into());
        }
        Ok(Arc::new(CachedBytes::new(buf)))
    }
}

/// Puts `consumed` back in front of what is left of `stream`.
fn unread(stream: &mut InputStream, consumed: Vec<u8>) {
    let rest = std::mem::replace(stream, InputStream::new(io::empty()));
    *stream = InputStream::new(Cursor::new(consumed).chain(rest));
}

/// Caches stream bodies before the step and rewinds cached bodies after it.
///
/// Runs first in the chain so every later advice sees a re-readable body.
pub struct StreamCachingAdvice {
    strategy: Arc<dyn StreamCachingStrategy>,
}

impl StreamCachingAdvice {
    #[must_use]
    pub fn new(strategy: Arc<dyn StreamCachingStrategy>) -> Self {
        Self { strategy }
    }
}

impl Advice for StreamCachingAdvice {
    type State = Option<Arc<dyn StreamCache>>;

    fn name(&self) -> &'static str {
        "stream-caching"
    }

    fn before(&self, exchange: &Exchange) -> anyhow::Result<Self::State> {
        match exchange.take_in_body() {
            Body::Cached(cache) => {
                cache.reset();
                exchange.set_in_body(Body::Cached(Arc::clone(&cache)));
                Ok(Some(cache))
            }
            Body::Stream(mut stream) => match self.strategy.cache(&mut stream) {
                Ok(cache) => {
                    exchange.set_in_body(Body::Cached(Arc::clone(&cache)));
                    Ok(Some(cache))
                }
                Err(err) => {
                    exchange.set_in_body(Body::Stream(stream));
                    Err(err)
                }
            },
            other => {
                exchange.set_in_body(other);
                Ok(None)
            }
        }
    }

    fn after(&self, exchange: &Exchange, _cached: Self::State) -> anyhow::Result<()> {
        let body = exchange.with_out(|out| out.map(|m| m.body.as_stream_cache().cloned()));
        let body = match body {
            Some(out) => out,
            None => exchange.with_in(|m| m.body.as_stream_cache().cloned()),
        };
        if let Some(cache) = body {
            cache.reset();
        }
        Ok(())
    }

    fn priority(&self) -> Option<i32> {
        Some(HIGHEST)
    }
}
