//! Help queue state machine.
//!
//! A [`HelpQueue`] holds the waiting line, the helpers serving it and the
//! members subscribed to open notices. Every operation runs under the
//! queue's lock, so two operations on one queue never interleave, while
//! different queues proceed independently.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backup::{HelpeeBackup, QueueBackup};
use crate::collaborator::{Collaborators, RenderError, bounded, notify_all};
use crate::config::CoreConfig;
use crate::error::QueueError;
use crate::hooks::{DynQueueExtension, HookEvent, fire_all};
use crate::model::{AutoClearPolicy, Helpee, Helper, Member, PrincipalId, QueueView};

/// Tracing target for queue operations.
pub const QUEUE_TARGET: &str = "officehours::queue";

/// Mutable queue data, only touched under the queue lock.
#[derive(Debug, Default)]
struct QueueState {
    helpers: HashMap<PrincipalId, Helper>,
    waiting: VecDeque<Helpee>,
    subscribers: BTreeSet<PrincipalId>,
    auto_clear: AutoClearPolicy,
    /// When the last helper left
    closed_at: Option<DateTime<Utc>>,
}

impl QueueState {
    /// A queue is open exactly while it has helpers.
    fn is_open(&self) -> bool {
        !self.helpers.is_empty()
    }

    fn is_waiting(&self, id: &PrincipalId) -> bool {
        self.waiting.iter().any(|h| h.id() == id)
    }

    fn view(&self, name: &str) -> QueueView {
        let mut helpers: Vec<&Helper> = self.helpers.values().collect();
        helpers.sort_by_key(|h| h.help_start);
        QueueView {
            name: name.to_string(),
            is_open: self.is_open(),
            helpers: helpers
                .into_iter()
                .map(|h| h.member.display_name.clone())
                .collect(),
            requesters: self
                .waiting
                .iter()
                .map(|h| h.member.display_name.clone())
                .collect(),
        }
    }

    fn auto_clear_due(&self, now: DateTime<Utc>) -> bool {
        match (self.auto_clear.threshold(), self.closed_at) {
            (Some(threshold), Some(closed_at)) => {
                !self.is_open() && !self.waiting.is_empty() && now - closed_at >= threshold
            }
            _ => false,
        }
    }
}

/// One topic's waiting line.
pub struct HelpQueue {
    name: String,
    state: Mutex<QueueState>,
    extensions: Vec<DynQueueExtension>,
    collaborators: Collaborators,
    config: CoreConfig,
    ticker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl HelpQueue {
    /// Create a closed, empty queue.
    pub fn new(name: impl Into<String>, collaborators: Collaborators, config: CoreConfig) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            extensions: Vec::new(),
            collaborators,
            config,
            ticker: parking_lot::Mutex::new(None),
        }
    }

    /// Attach extensions, invoked in order for every lifecycle event.
    pub fn with_extensions(mut self, extensions: Vec<DynQueueExtension>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Rebuild the line and subscribers from a backup.
    ///
    /// `resolve` maps a stored principal to a current member; entries it
    /// cannot resolve are dropped.
    pub fn with_backup<F>(mut self, backup: &QueueBackup, resolve: F) -> Self
    where
        F: Fn(&PrincipalId) -> Option<Member>,
    {
        let state = self.state.get_mut();
        let mut dropped = 0usize;
        for entry in &backup.waiting {
            match resolve(&entry.principal_id) {
                Some(member) if !state.is_waiting(&member.id) => state.waiting.push_back(Helpee {
                    member,
                    wait_start: entry.wait_start,
                    up_next: entry.up_next,
                }),
                _ => dropped += 1,
            }
        }
        state.subscribers = backup
            .subscribers
            .iter()
            .filter(|id| resolve(*id).is_some())
            .cloned()
            .collect();
        // A restored queue starts closed; count its closed time from now.
        state.closed_at = Some(Utc::now());
        debug!(
            target: QUEUE_TARGET,
            queue = %self.name,
            restored = state.waiting.len(),
            dropped,
            "Queue restored from backup"
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn limit(&self) -> Duration {
        self.config.collaborator_timeout()
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Start a help session for `helper`, opening the queue.
    ///
    /// With `notify`, every subscriber gets a one-shot open notice.
    pub async fn open_session(&self, helper: Member, notify: bool) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if state.helpers.contains_key(&helper.id) {
            return Err(QueueError::AlreadyHelping {
                queue: self.name.clone(),
            });
        }

        // A helper never waits in the line they serve.
        let left_line = match state.waiting.iter().position(|h| h.id() == &helper.id) {
            Some(pos) => state.waiting.remove(pos),
            None => None,
        };

        let record = Helper::new(helper);
        state.helpers.insert(record.id().clone(), record.clone());
        state.closed_at = None;
        let view = state.view(&self.name);

        info!(
            target: QUEUE_TARGET,
            queue = %self.name,
            helper = %record.id(),
            helpers = state.helpers.len(),
            "Help session opened"
        );

        let recipients: Vec<PrincipalId> = if notify {
            state.subscribers.iter().cloned().collect()
        } else {
            Vec::new()
        };
        let message = format!("Queue {} is now open.", self.name);
        tokio::join!(
            notify_all(
                self.collaborators.notifier.as_ref(),
                recipients,
                &message,
                self.limit()
            ),
            fire_all(&self.extensions, &view, HookEvent::Open(&record), self.limit()),
            async {
                if let Some(helpee) = &left_line {
                    fire_all(&self.extensions, &view, HookEvent::Remove(helpee), self.limit())
                        .await;
                }
            },
        );

        self.render(&view).await;
        Ok(())
    }

    /// End `helper_id`'s session and return the finished record.
    pub async fn close_session(&self, helper_id: &PrincipalId) -> Result<Helper, QueueError> {
        let mut state = self.state.lock().await;
        if !state.is_open() {
            return Err(QueueError::QueueClosed {
                queue: self.name.clone(),
            });
        }
        let mut record = state
            .helpers
            .remove(helper_id)
            .ok_or_else(|| QueueError::NotAHelper {
                queue: self.name.clone(),
            })?;

        let now = Utc::now();
        record.help_end = Some(now);
        if !state.is_open() {
            state.closed_at = Some(now);
        }
        let view = state.view(&self.name);

        info!(
            target: QUEUE_TARGET,
            queue = %self.name,
            helper = %helper_id,
            helped = record.helped_members.len(),
            still_open = view.is_open,
            "Help session closed"
        );

        fire_all(&self.extensions, &view, HookEvent::Close(&record), self.limit()).await;
        self.render(&view).await;
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Waiting line
    // ------------------------------------------------------------------

    /// Append `member` to the line.
    pub async fn enqueue(&self, member: Member) -> Result<Helpee, QueueError> {
        let mut state = self.state.lock().await;
        if !state.is_open() {
            return Err(QueueError::QueueClosed {
                queue: self.name.clone(),
            });
        }
        if state.is_waiting(&member.id) {
            return Err(QueueError::AlreadyQueued {
                queue: self.name.clone(),
            });
        }
        if state.helpers.contains_key(&member.id) {
            return Err(QueueError::IsHelper {
                queue: self.name.clone(),
            });
        }

        let helpee = Helpee::new(member, state.waiting.is_empty());
        state.waiting.push_back(helpee.clone());
        let view = state.view(&self.name);

        debug!(
            target: QUEUE_TARGET,
            queue = %self.name,
            member = %helpee.id(),
            position = state.waiting.len(),
            "Member enqueued"
        );

        let helpers: Vec<PrincipalId> = state.helpers.keys().cloned().collect();
        let message = format!(
            "{} has joined queue {}.",
            helpee.member.display_name, self.name
        );
        tokio::join!(
            notify_all(
                self.collaborators.notifier.as_ref(),
                helpers,
                &message,
                self.limit()
            ),
            fire_all(&self.extensions, &view, HookEvent::Enqueue(&helpee), self.limit()),
        );

        self.render(&view).await;
        Ok(helpee)
    }

    /// Remove the head of the line on behalf of `helper_id`.
    pub async fn dequeue_next(&self, helper_id: &PrincipalId) -> Result<Helpee, QueueError> {
        let mut state = self.state.lock().await;
        if !state.is_open() {
            return Err(QueueError::QueueClosed {
                queue: self.name.clone(),
            });
        }
        if state.waiting.is_empty() {
            return Err(QueueError::EmptyQueue {
                queue: self.name.clone(),
            });
        }
        if !state.helpers.contains_key(helper_id) {
            return Err(QueueError::NotAHelper {
                queue: self.name.clone(),
            });
        }

        let Some(helpee) = state.waiting.pop_front() else {
            return Err(QueueError::EmptyQueue {
                queue: self.name.clone(),
            });
        };
        if let Some(helper) = state.helpers.get_mut(helper_id) {
            helper.helped_members.push(helpee.member.clone());
        }
        let view = state.view(&self.name);

        debug!(
            target: QUEUE_TARGET,
            queue = %self.name,
            helper = %helper_id,
            member = %helpee.id(),
            "Member dequeued"
        );

        fire_all(&self.extensions, &view, HookEvent::Dequeue(&helpee), self.limit()).await;
        self.render(&view).await;
        Ok(helpee)
    }

    /// Remove `member_id` from wherever they are in the line.
    pub async fn remove_requester(&self, member_id: &PrincipalId) -> Result<Helpee, QueueError> {
        let mut state = self.state.lock().await;
        let pos = state
            .waiting
            .iter()
            .position(|h| h.id() == member_id)
            .ok_or_else(|| QueueError::NotInQueue {
                queue: self.name.clone(),
            })?;
        let Some(helpee) = state.waiting.remove(pos) else {
            return Err(QueueError::NotInQueue {
                queue: self.name.clone(),
            });
        };
        let view = state.view(&self.name);

        debug!(target: QUEUE_TARGET, queue = %self.name, member = %member_id, "Member removed");

        fire_all(&self.extensions, &view, HookEvent::Remove(&helpee), self.limit()).await;
        self.render(&view).await;
        Ok(helpee)
    }

    /// Empty the line. Returns the members that were waiting.
    pub async fn clear(&self) -> Vec<Helpee> {
        let mut state = self.state.lock().await;
        self.clear_locked(&mut state).await
    }

    async fn clear_locked(&self, state: &mut QueueState) -> Vec<Helpee> {
        let removed: Vec<Helpee> = state.waiting.drain(..).collect();
        let view = state.view(&self.name);

        info!(
            target: QUEUE_TARGET,
            queue = %self.name,
            removed = removed.len(),
            "Queue cleared"
        );

        fire_all(&self.extensions, &view, HookEvent::RemoveAll(&removed), self.limit()).await;
        self.render(&view).await;
        removed
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    pub async fn subscribe(&self, member_id: PrincipalId) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if !state.subscribers.insert(member_id) {
            return Err(QueueError::AlreadySubscribed {
                queue: self.name.clone(),
            });
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, member_id: &PrincipalId) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if !state.subscribers.remove(member_id) {
            return Err(QueueError::NotSubscribed {
                queue: self.name.clone(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Ask the renderer to redraw `view`.
    ///
    /// A structural failure discards the surface and redraws it in full.
    async fn render(&self, view: &QueueView) {
        let limit = self.limit();
        let renderer = self.collaborators.renderer.as_ref();

        let full_redraw = match tokio::time::timeout(limit, renderer.render_queue(view, false)).await
        {
            Ok(Ok(())) => false,
            Ok(Err(RenderError::Structural(reason))) => {
                warn!(
                    target: QUEUE_TARGET,
                    queue = %self.name,
                    reason = %reason,
                    "Render surface corrupt, redrawing in full"
                );
                if let Err(e) = bounded(limit, renderer.render_queue(view, true)).await {
                    error!(target: QUEUE_TARGET, queue = %self.name, error = %e, "Full redraw failed");
                    return;
                }
                true
            }
            Ok(Err(e)) => {
                warn!(target: QUEUE_TARGET, queue = %self.name, error = %e, "Render failed");
                return;
            }
            Err(_) => {
                warn!(target: QUEUE_TARGET, queue = %self.name, ?limit, "Render timed out");
                return;
            }
        };

        fire_all(
            &self.extensions,
            view,
            HookEvent::RenderComplete { full_redraw },
            limit,
        )
        .await;
    }

    /// Discard the rendered surface and draw it again from scratch.
    pub async fn reset_surface(&self) {
        let state = self.state.lock().await;
        let view = state.view(&self.name);
        let limit = self.limit();
        match bounded(limit, self.collaborators.renderer.render_queue(&view, true)).await {
            Ok(()) => {
                fire_all(
                    &self.extensions,
                    &view,
                    HookEvent::RenderComplete { full_redraw: true },
                    limit,
                )
                .await;
            }
            Err(e) => {
                error!(target: QUEUE_TARGET, queue = %self.name, error = %e, "Full redraw failed");
            }
        }
    }

    /// Redraw from the current state.
    pub async fn refresh(&self) {
        let state = self.state.lock().await;
        let view = state.view(&self.name);
        self.render(&view).await;
    }

    // ------------------------------------------------------------------
    // Background tick
    // ------------------------------------------------------------------

    pub async fn set_auto_clear(&self, policy: AutoClearPolicy) {
        self.state.lock().await.auto_clear = policy;
    }

    /// Run one background tick: auto-clear if due, then the periodic hooks.
    ///
    /// Returns true if the line was auto-cleared.
    pub async fn periodic_tick(&self) -> bool {
        let mut state = self.state.lock().await;
        let cleared = if state.auto_clear_due(Utc::now()) {
            info!(target: QUEUE_TARGET, queue = %self.name, policy = %state.auto_clear, "Auto-clearing queue");
            self.clear_locked(&mut state).await;
            true
        } else {
            false
        };
        let view = state.view(&self.name);
        fire_all(&self.extensions, &view, HookEvent::PeriodicTick, self.limit()).await;
        cleared
    }

    /// Spawn the recurring tick. The task holds a weak handle and stops on
    /// its own once the queue is dropped.
    pub fn start_ticker(self: &Arc<Self>) {
        let queue = Arc::downgrade(self);
        let period = self.config.tick_period();
        let jitter = self.config.tick_jitter();

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(next_tick_delay(period, jitter)).await;
                let Some(queue) = queue.upgrade() else {
                    break;
                };
                queue.periodic_tick().await;
            }
        });

        if let Some(previous) = self.ticker.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancel the background tick.
    pub fn dispose(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
            debug!(target: QUEUE_TARGET, queue = %self.name, "Queue ticker cancelled");
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.is_open()
    }

    /// Number of waiting members.
    pub async fn len(&self) -> usize {
        self.state.lock().await.waiting.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.waiting.is_empty()
    }

    /// Waiting members, head first.
    pub async fn waiting(&self) -> Vec<Helpee> {
        self.state.lock().await.waiting.iter().cloned().collect()
    }

    /// Active helpers, longest-serving first.
    pub async fn helpers(&self) -> Vec<Helper> {
        let state = self.state.lock().await;
        let mut helpers: Vec<Helper> = state.helpers.values().cloned().collect();
        helpers.sort_by_key(|h| h.help_start);
        helpers
    }

    pub async fn helper(&self, helper_id: &PrincipalId) -> Option<Helper> {
        self.state.lock().await.helpers.get(helper_id).cloned()
    }

    pub async fn subscribers(&self) -> Vec<PrincipalId> {
        self.state.lock().await.subscribers.iter().cloned().collect()
    }

    /// 1-based place in line.
    pub async fn position_of(&self, member_id: &PrincipalId) -> Option<usize> {
        let state = self.state.lock().await;
        state
            .waiting
            .iter()
            .position(|h| h.id() == member_id)
            .map(|pos| pos + 1)
    }

    pub async fn view(&self) -> QueueView {
        self.state.lock().await.view(&self.name)
    }

    pub async fn backup(&self) -> QueueBackup {
        let state = self.state.lock().await;
        QueueBackup {
            name: self.name.clone(),
            waiting: state
                .waiting
                .iter()
                .map(|h| HelpeeBackup {
                    principal_id: h.id().clone(),
                    wait_start: h.wait_start,
                    up_next: h.up_next,
                })
                .collect(),
            subscribers: state.subscribers.iter().cloned().collect(),
        }
    }
}

impl Drop for HelpQueue {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for HelpQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelpQueue")
            .field("name", &self.name)
            .field("extensions", &self.extensions.len())
            .finish_non_exhaustive()
    }
}

/// Period plus random jitter, saturating instead of overflowing.
fn next_tick_delay(period: Duration, jitter: Duration) -> Duration {
    period.saturating_add(jitter_delay(jitter))
}

/// Random delay in `[0, max]`.
fn jitter_delay(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> HelpQueue {
        HelpQueue::new("Lab", Collaborators::detached(), CoreConfig::default())
    }

    #[test]
    fn test_jitter_bounds() {
        assert_eq!(jitter_delay(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(jitter_delay(Duration::from_secs(2)) <= Duration::from_secs(2));
        }
    }

    #[test]
    fn test_tick_delay_saturates() {
        let delay = next_tick_delay(Duration::MAX, Duration::from_secs(600));
        assert_eq!(delay, Duration::MAX);

        let delay = next_tick_delay(Duration::from_secs(10), Duration::ZERO);
        assert_eq!(delay, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_open_removes_helper_from_line() {
        let q = queue();
        let staff = Member::new("h1", "Helper One");
        let other = Member::new("h2", "Helper Two");
        q.open_session(staff.clone(), false).await.unwrap();
        q.enqueue(other.clone()).await.unwrap();

        q.open_session(other.clone(), false).await.unwrap();

        assert!(q.is_empty().await);
        assert_eq!(q.helpers().await.len(), 2);
    }

    #[tokio::test]
    async fn test_auto_clear_due() {
        let mut state = QueueState::default();
        state.waiting.push_back(Helpee::new(Member::new("s1", "S"), true));
        state.auto_clear = AutoClearPolicy::AfterHours(1);
        let now = Utc::now();

        state.closed_at = Some(now - chrono::Duration::minutes(30));
        assert!(!state.auto_clear_due(now));

        state.closed_at = Some(now - chrono::Duration::hours(2));
        assert!(state.auto_clear_due(now));

        state.auto_clear = AutoClearPolicy::Disabled;
        assert!(!state.auto_clear_due(now));
    }

    #[tokio::test]
    async fn test_ticker_dispose() {
        let q = Arc::new(queue());
        q.start_ticker();
        assert!(q.is_ticking());
        q.dispose();
        assert!(!q.is_ticking());
    }
}
