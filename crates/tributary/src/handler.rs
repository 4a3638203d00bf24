//! Stream handler trait and stream registration.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tributary_core::types::{EntryId, StreamEntry};

/// Processes the entries of one stream.
///
/// A handler is bound to a stream when the stream is registered with
/// `Consumer::listen`. Returning an error hands the entry to the retry
/// scheduler; returning `Ok` schedules its acknowledgment.
///
/// The same entry can be delivered more than once (at-least-once delivery),
/// so handlers should be idempotent.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle(&self, stream: &str, entry: &StreamEntry) -> anyhow::Result<()>;
}

/// Handler built from an async closure, see [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`StreamHandler`].
///
/// ```ignore
/// let handler = handler_fn(|stream, entry| async move {
///     println!("{} -> {}", stream, entry.id);
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(String, StreamEntry) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> StreamHandler for FnHandler<F>
where
    F: Fn(String, StreamEntry) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, stream: &str, entry: &StreamEntry) -> anyhow::Result<()> {
        (self.f)(stream.to_string(), entry.clone()).await
    }
}

/// A stream to register with `Consumer::listen`.
#[derive(Clone)]
pub struct StreamSpec {
    /// Stream name
    pub name: String,

    /// Handler bound to the stream
    pub handler: Arc<dyn StreamHandler>,

    /// Replay this consumer's pending entries after this ID (default: origin)
    pub resume_id: Option<EntryId>,
}

impl StreamSpec {
    pub fn new(name: impl Into<String>, handler: impl StreamHandler + 'static) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            resume_id: None,
        }
    }

    /// Register with an already shared handler
    pub fn with_shared_handler(name: impl Into<String>, handler: Arc<dyn StreamHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            resume_id: None,
        }
    }

    pub fn resume_from(mut self, id: EntryId) -> Self {
        self.resume_id = Some(id);
        self
    }
}

impl std::fmt::Debug for StreamSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSpec")
            .field("name", &self.name)
            .field("resume_id", &self.resume_id)
            .finish_non_exhaustive()
    }
}
