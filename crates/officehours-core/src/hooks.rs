//! Extension hooks invoked at queue lifecycle points.
//!
//! Any number of extensions can be attached to a queue. For each event every
//! extension is called concurrently; a failing or stalled extension is logged
//! and does not stop the others.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::warn;

use crate::collaborator::bounded;
use crate::model::{Helpee, Helper, QueueView};

/// Extension hook failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtensionError {
    #[error("Extension unavailable: {0}")]
    Unavailable(String),

    #[error("Extension failed: {0}")]
    Failed(String),
}

/// Capability contract for queue extensions.
///
/// Every hook defaults to a no-op so an extension only overrides the events
/// it cares about.
#[async_trait::async_trait]
pub trait QueueExtension: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn on_open(&self, _queue: &QueueView, _helper: &Helper) -> Result<(), ExtensionError> {
        Ok(())
    }

    async fn on_close(&self, _queue: &QueueView, _helper: &Helper) -> Result<(), ExtensionError> {
        Ok(())
    }

    async fn on_enqueue(
        &self,
        _queue: &QueueView,
        _helpee: &Helpee,
    ) -> Result<(), ExtensionError> {
        Ok(())
    }

    async fn on_dequeue(
        &self,
        _queue: &QueueView,
        _helpee: &Helpee,
    ) -> Result<(), ExtensionError> {
        Ok(())
    }

    async fn on_remove(&self, _queue: &QueueView, _helpee: &Helpee) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// Called after a clear with the members that were waiting.
    async fn on_remove_all(
        &self,
        _queue: &QueueView,
        _removed: &[Helpee],
    ) -> Result<(), ExtensionError> {
        Ok(())
    }

    async fn on_periodic_tick(&self, _queue: &QueueView) -> Result<(), ExtensionError> {
        Ok(())
    }

    async fn on_render_complete(
        &self,
        _queue: &QueueView,
        _full_redraw: bool,
    ) -> Result<(), ExtensionError> {
        Ok(())
    }
}

/// Shared extension handle.
pub type DynQueueExtension = Arc<dyn QueueExtension>;

/// A lifecycle event with the data its hook receives.
#[derive(Debug, Clone, Copy)]
pub enum HookEvent<'a> {
    Open(&'a Helper),
    Close(&'a Helper),
    Enqueue(&'a Helpee),
    Dequeue(&'a Helpee),
    Remove(&'a Helpee),
    RemoveAll(&'a [Helpee]),
    PeriodicTick,
    RenderComplete { full_redraw: bool },
}

impl HookEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            HookEvent::Open(_) => "open",
            HookEvent::Close(_) => "close",
            HookEvent::Enqueue(_) => "enqueue",
            HookEvent::Dequeue(_) => "dequeue",
            HookEvent::Remove(_) => "remove",
            HookEvent::RemoveAll(_) => "remove_all",
            HookEvent::PeriodicTick => "periodic_tick",
            HookEvent::RenderComplete { .. } => "render_complete",
        }
    }

    async fn deliver(
        &self,
        extension: &dyn QueueExtension,
        view: &QueueView,
    ) -> Result<(), ExtensionError> {
        match *self {
            HookEvent::Open(helper) => extension.on_open(view, helper).await,
            HookEvent::Close(helper) => extension.on_close(view, helper).await,
            HookEvent::Enqueue(helpee) => extension.on_enqueue(view, helpee).await,
            HookEvent::Dequeue(helpee) => extension.on_dequeue(view, helpee).await,
            HookEvent::Remove(helpee) => extension.on_remove(view, helpee).await,
            HookEvent::RemoveAll(removed) => extension.on_remove_all(view, removed).await,
            HookEvent::PeriodicTick => extension.on_periodic_tick(view).await,
            HookEvent::RenderComplete { full_redraw } => {
                extension.on_render_complete(view, full_redraw).await
            }
        }
    }
}

/// Fire `event` on every extension and join all calls.
///
/// Returns the number of extensions whose hook failed or timed out.
pub async fn fire_all(
    extensions: &[DynQueueExtension],
    view: &QueueView,
    event: HookEvent<'_>,
    limit: Duration,
) -> usize {
    let calls = extensions.iter().map(|extension| async move {
        match bounded(limit, event.deliver(extension.as_ref(), view)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    queue = %view.name,
                    extension = extension.name(),
                    hook = event.name(),
                    error = %e,
                    "Extension hook failed"
                );
                false
            }
        }
    });

    join_all(calls).await.into_iter().filter(|ok| !ok).count()
}
