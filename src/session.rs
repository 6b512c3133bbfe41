//! Session & popup management.
//!
//! Recorder sites love opening the document viewer in a fresh window or tab
//! instead of navigating in place. [`PopupTracker`] snapshots the set of
//! open contexts before a UI action, waits (bounded) for a newcomer after
//! it, and hands control over; if nothing new appears it checks whether the
//! current context itself navigated. Either way the pipeline ends up
//! pointed at the right page, or gets a `NotFound` it can report — never a
//! crash.
//!
//! [`SessionPool`] bounds how many browser sessions are open at once across
//! concurrent requests and guarantees deterministic teardown.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::renderer::{RenderContext, Renderer};

/// Interval between polls for a spawned context.
const SPAWN_POLL_MS: u64 = 250;

/// What happened after a UI action that might spawn a window.
pub enum SpawnOutcome {
    /// A new context appeared; control belongs to it now.
    Spawned(Box<dyn RenderContext>),
    /// No new context, but the current one navigated somewhere else.
    NavigatedInPlace,
    /// Nothing new appeared and the current context did not move.
    NotFound,
}

impl SpawnOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            SpawnOutcome::Spawned(_) => "spawned",
            SpawnOutcome::NavigatedInPlace => "navigatedInPlace",
            SpawnOutcome::NotFound => "notFound",
        }
    }
}

/// Pre-action snapshot of the browser's open contexts.
pub struct PopupTracker {
    before: HashSet<String>,
    url_before: String,
}

impl PopupTracker {
    /// Snapshot open context ids and the current URL. Call this immediately
    /// before the UI action that might spawn a window.
    pub async fn snapshot(renderer: &dyn Renderer, current: &dyn RenderContext) -> Result<Self> {
        let before: HashSet<String> = renderer.context_ids().await?.into_iter().collect();
        let url_before = current.get_url().await.unwrap_or_default();
        Ok(Self { before, url_before })
    }

    /// Wait (bounded) for a context that was not in the snapshot.
    ///
    /// Falls back to `NavigatedInPlace` when the current context's URL moved
    /// instead, and `NotFound` when neither happened within the budget.
    pub async fn await_spawned(
        &self,
        renderer: &dyn Renderer,
        current: &dyn RenderContext,
        timeout_ms: u64,
    ) -> Result<SpawnOutcome> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            let ids = renderer.context_ids().await?;
            if let Some(new_id) = ids.iter().find(|id| !self.before.contains(*id)) {
                tracing::debug!(id = %new_id, "adopting spawned context");
                let context = renderer.attach(new_id).await?;
                return Ok(SpawnOutcome::Spawned(context));
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(SPAWN_POLL_MS)).await;
        }

        let url_now = current.get_url().await.unwrap_or_default();
        if !url_now.is_empty() && url_now != self.url_before {
            tracing::debug!(from = %self.url_before, to = %url_now, "navigated in place");
            return Ok(SpawnOutcome::NavigatedInPlace);
        }

        Ok(SpawnOutcome::NotFound)
    }
}

/// A checked-out browser session. Holds its pool permit until closed.
pub struct LeasedSession {
    context: Option<Box<dyn RenderContext>>,
    _permit: OwnedSemaphorePermit,
}

impl LeasedSession {
    /// Take ownership of the context, leaving the lease to hold the permit.
    pub fn take_context(&mut self) -> Option<Box<dyn RenderContext>> {
        self.context.take()
    }

    /// Close the session's context and release the permit.
    pub async fn close(mut self) -> Result<()> {
        if let Some(context) = self.context.take() {
            context.close().await?;
        }
        Ok(())
    }
}

/// Bounded pool of concurrently open browser sessions.
///
/// The semaphore is the only cross-request shared resource; each checkout
/// owns its context exclusively.
pub struct SessionPool {
    permits: std::sync::Arc<Semaphore>,
}

impl SessionPool {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            permits: std::sync::Arc::new(Semaphore::new(max_sessions)),
        }
    }

    /// Open a new session, waiting for a permit if the pool is saturated.
    pub async fn checkout(&self, renderer: &dyn Renderer) -> Result<LeasedSession> {
        let permit = std::sync::Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| anyhow::anyhow!("session pool closed"))?;
        let context = renderer.new_context().await?;
        Ok(LeasedSession {
            context: Some(context),
            _permit: permit,
        })
    }

    /// Permits currently available.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
