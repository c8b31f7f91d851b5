//! Server aggregate: one organizational unit's queues and members.
//!
//! The server owns its queues by topic name, resolves members and their
//! roles for authorization, and runs the operations that span queues
//! (opening every scoped queue, closing all sessions, announcements).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backup::QueueBackup;
use crate::collaborator::{Collaborators, FanoutReport, LogEvent, bounded, notify_all};
use crate::config::CoreConfig;
use crate::error::{Result, ServerError};
use crate::hooks::DynQueueExtension;
use crate::model::{AutoClearPolicy, Helpee, Helper, Member, PrincipalId, ServerId};
use crate::queue::HelpQueue;

/// Per-server settings changed through administrative commands.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSettings {
    /// Sent to everyone a helper served once their session closes
    pub after_session_message: Option<String>,
    pub auto_clear: AutoClearPolicy,
    /// Where log events go; `None` drops them
    pub log_target: Option<String>,
}

/// A helper's sessions across the server's queues.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveHelper {
    pub member: Member,
    /// Earliest session start
    pub help_start: DateTime<Utc>,
    pub queues: Vec<String>,
}

/// One organizational unit.
pub struct Server {
    id: ServerId,
    name: String,
    members: RwLock<HashMap<PrincipalId, Member>>,
    queues: RwLock<BTreeMap<String, Arc<HelpQueue>>>,
    settings: RwLock<ServerSettings>,
    queue_extensions: Vec<DynQueueExtension>,
    collaborators: Collaborators,
    config: CoreConfig,
}

impl Server {
    pub fn new(
        id: impl Into<ServerId>,
        name: impl Into<String>,
        collaborators: Collaborators,
        config: CoreConfig,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            members: RwLock::new(HashMap::new()),
            queues: RwLock::new(BTreeMap::new()),
            settings: RwLock::new(ServerSettings::default()),
            queue_extensions: Vec::new(),
            collaborators,
            config,
        }
    }

    /// Extensions attached to every queue this server creates.
    pub fn with_queue_extension(mut self, extension: DynQueueExtension) -> Self {
        self.queue_extensions.push(extension);
        self
    }

    pub fn id(&self) -> &ServerId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Membership and roles
    // ------------------------------------------------------------------

    /// Insert or replace a member.
    pub fn upsert_member(&self, member: Member) {
        self.members.write().insert(member.id.clone(), member);
    }

    pub fn remove_member(&self, member_id: &PrincipalId) -> Option<Member> {
        self.members.write().remove(member_id)
    }

    pub fn member(&self, member_id: &PrincipalId) -> Option<Member> {
        self.members.read().get(member_id).cloned()
    }

    fn require_member(&self, member_id: &PrincipalId) -> Result<Member> {
        self.member(member_id)
            .ok_or_else(|| ServerError::NotMember(member_id.clone()))
    }

    /// Role names held by `member_id`; empty for non-members.
    pub fn roles_of(&self, member_id: &PrincipalId) -> BTreeSet<String> {
        self.members
            .read()
            .get(member_id)
            .map(|m| m.roles.clone())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Queues
    // ------------------------------------------------------------------

    fn build_queue(&self, name: &str) -> HelpQueue {
        HelpQueue::new(name, self.collaborators.clone(), self.config.clone())
            .with_extensions(self.queue_extensions.clone())
    }

    async fn install_queue(&self, queue: HelpQueue) -> Result<Arc<HelpQueue>> {
        let queue = Arc::new(queue);
        {
            let mut queues = self.queues.write();
            if queues.contains_key(queue.name()) {
                return Err(ServerError::QueueExists(queue.name().to_string()));
            }
            queues.insert(queue.name().to_string(), queue.clone());
        }

        let policy = self.settings.read().auto_clear;
        queue.set_auto_clear(policy).await;
        queue.start_ticker();
        queue.refresh().await;

        info!(server = %self.name, queue = %queue.name(), "Queue created");
        Ok(queue)
    }

    /// Create an empty queue named `name`.
    pub async fn create_queue(&self, name: &str) -> Result<Arc<HelpQueue>> {
        if self.queues.read().contains_key(name) {
            return Err(ServerError::QueueExists(name.to_string()));
        }
        self.install_queue(self.build_queue(name)).await
    }

    /// Create a queue from a backup, keeping only current members.
    pub async fn restore_queue(&self, backup: &QueueBackup) -> Result<Arc<HelpQueue>> {
        if self.queues.read().contains_key(&backup.name) {
            return Err(ServerError::QueueExists(backup.name.clone()));
        }
        let queue = self
            .build_queue(&backup.name)
            .with_backup(backup, |id| self.member(id));
        self.install_queue(queue).await
    }

    /// Remove a queue and cancel its ticker.
    pub fn delete_queue(&self, name: &str) -> Result<()> {
        let queue = self
            .queues
            .write()
            .remove(name)
            .ok_or_else(|| ServerError::QueueNotFound(name.to_string()))?;
        queue.dispose();
        info!(server = %self.name, queue = %name, "Queue deleted");
        Ok(())
    }

    pub fn queue(&self, name: &str) -> Result<Arc<HelpQueue>> {
        self.queues
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ServerError::QueueNotFound(name.to_string()))
    }

    /// All queues, ordered by name.
    pub fn queues(&self) -> Vec<Arc<HelpQueue>> {
        self.queues.read().values().cloned().collect()
    }

    /// Queues whose topic name matches one of `member_id`'s roles.
    pub fn scoped_queues(&self, member_id: &PrincipalId) -> Vec<Arc<HelpQueue>> {
        let roles = self.roles_of(member_id);
        self.queues
            .read()
            .iter()
            .filter(|(name, _)| roles.contains(name.as_str()))
            .map(|(_, queue)| queue.clone())
            .collect()
    }

    /// Queues `member_id` is currently helping.
    pub async fn helping_queues(&self, member_id: &PrincipalId) -> Vec<Arc<HelpQueue>> {
        let mut helping = Vec::new();
        for queue in self.queues() {
            if queue.helper(member_id).await.is_some() {
                helping.push(queue);
            }
        }
        helping
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub async fn open_session(&self, queue: &str, helper_id: &PrincipalId, notify: bool) -> Result<()> {
        let member = self.require_member(helper_id)?;
        self.queue(queue)?.open_session(member, notify).await?;
        Ok(())
    }

    /// Open every scoped queue the helper is not already helping.
    ///
    /// Returns the names of the queues opened.
    pub async fn open_all_sessions(&self, helper_id: &PrincipalId, notify: bool) -> Result<Vec<String>> {
        let member = self.require_member(helper_id)?;
        let scoped = self.scoped_queues(helper_id);
        if scoped.is_empty() {
            return Err(ServerError::NoScopedQueues);
        }

        let mut opened = Vec::new();
        for queue in scoped {
            if queue.helper(helper_id).await.is_some() {
                continue;
            }
            queue.open_session(member.clone(), notify).await?;
            opened.push(queue.name().to_string());
        }
        Ok(opened)
    }

    /// Close one session and send the after-session message.
    pub async fn close_session(&self, queue: &str, helper_id: &PrincipalId) -> Result<Helper> {
        let record = self.queue(queue)?.close_session(helper_id).await?;
        self.send_after_session_message(&record).await;
        Ok(record)
    }

    /// Close every session `helper_id` holds.
    pub async fn close_all_sessions(&self, helper_id: &PrincipalId) -> Result<Vec<Helper>> {
        let helping = self.helping_queues(helper_id).await;
        if helping.is_empty() {
            return Err(ServerError::NotHelping);
        }

        let mut closed = Vec::with_capacity(helping.len());
        for queue in helping {
            let record = queue.close_session(helper_id).await?;
            self.send_after_session_message(&record).await;
            closed.push(record);
        }
        Ok(closed)
    }

    async fn send_after_session_message(&self, record: &Helper) -> FanoutReport {
        let Some(message) = self.settings.read().after_session_message.clone() else {
            return FanoutReport::default();
        };
        let recipients: Vec<PrincipalId> =
            record.helped_members.iter().map(|m| m.id.clone()).collect();
        notify_all(
            self.collaborators.notifier.as_ref(),
            recipients,
            &message,
            self.config.collaborator_timeout(),
        )
        .await
    }

    /// Helpers with at least one open session, by principal.
    pub async fn active_helpers(&self) -> Vec<ActiveHelper> {
        let mut by_member: BTreeMap<PrincipalId, ActiveHelper> = BTreeMap::new();
        for queue in self.queues() {
            for helper in queue.helpers().await {
                by_member
                    .entry(helper.id().clone())
                    .and_modify(|active| {
                        active.help_start = active.help_start.min(helper.help_start);
                        active.queues.push(queue.name().to_string());
                    })
                    .or_insert_with(|| ActiveHelper {
                        member: helper.member.clone(),
                        help_start: helper.help_start,
                        queues: vec![queue.name().to_string()],
                    });
            }
        }
        by_member.into_values().collect()
    }

    // ------------------------------------------------------------------
    // Waiting line
    // ------------------------------------------------------------------

    pub async fn enqueue(&self, queue: &str, member_id: &PrincipalId) -> Result<Helpee> {
        let member = self.require_member(member_id)?;
        Ok(self.queue(queue)?.enqueue(member).await?)
    }

    pub async fn leave(&self, queue: &str, member_id: &PrincipalId) -> Result<Helpee> {
        Ok(self.queue(queue)?.remove_requester(member_id).await?)
    }

    /// Dequeue for `helper_id` from the named queue, or, with no name, from
    /// whichever helped queue has the longest-waiting head.
    pub async fn dequeue(&self, queue: Option<&str>, helper_id: &PrincipalId) -> Result<Helpee> {
        if let Some(name) = queue {
            return Ok(self.queue(name)?.dequeue_next(helper_id).await?);
        }

        let helping = self.helping_queues(helper_id).await;
        if helping.is_empty() {
            return Err(ServerError::NotHelping);
        }

        let mut oldest: Option<(DateTime<Utc>, Arc<HelpQueue>)> = None;
        for queue in helping {
            if let Some(head) = queue.waiting().await.into_iter().next() {
                if oldest.as_ref().is_none_or(|(start, _)| head.wait_start < *start) {
                    oldest = Some((head.wait_start, queue));
                }
            }
        }
        let (_, queue) = oldest.ok_or(ServerError::NothingToDequeue)?;
        Ok(queue.dequeue_next(helper_id).await?)
    }

    /// Send `message` to everyone waiting in the queues `helper_id` helps.
    pub async fn announce(&self, helper_id: &PrincipalId, message: &str) -> Result<FanoutReport> {
        let helping = self.helping_queues(helper_id).await;
        if helping.is_empty() {
            return Err(ServerError::NotHelping);
        }

        let mut recipients = BTreeSet::new();
        for queue in helping {
            recipients.extend(queue.waiting().await.into_iter().map(|h| h.member.id));
        }
        Ok(notify_all(
            self.collaborators.notifier.as_ref(),
            recipients,
            message,
            self.config.collaborator_timeout(),
        )
        .await)
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub fn settings(&self) -> ServerSettings {
        self.settings.read().clone()
    }

    pub fn set_after_session_message(&self, message: Option<String>) {
        let message = message.filter(|m| !m.trim().is_empty());
        self.settings.write().after_session_message = message;
    }

    /// Store the policy and push it to every queue.
    pub async fn set_auto_clear(&self, policy: AutoClearPolicy) {
        self.settings.write().auto_clear = policy;
        for queue in self.queues() {
            queue.set_auto_clear(policy).await;
        }
        info!(server = %self.name, policy = %policy, "Auto-clear policy updated");
    }

    pub fn set_log_target(&self, target: Option<String>) {
        self.settings.write().log_target = target;
    }

    /// Record `event` at the configured log target, if any.
    ///
    /// Sink failures are traced and otherwise ignored.
    pub async fn log(&self, event: LogEvent) {
        if let Some(write) = self.spawn_log(event) {
            if let Err(e) = write.await {
                warn!(server = %self.name, error = %e, "Log write task failed");
            }
        }
    }

    /// Write `event` to the log sink in a background task.
    ///
    /// The target is read now. Returns `None` when no target is set.
    pub fn spawn_log(&self, event: LogEvent) -> Option<JoinHandle<()>> {
        let Some(target) = self.settings.read().log_target.clone() else {
            debug!(server = %self.name, message = %event.message, "No log target set");
            return None;
        };
        let sink = self.collaborators.log_sink.clone();
        let limit = self.config.collaborator_timeout();
        let server = self.name.clone();

        Some(tokio::spawn(async move {
            if let Err(e) = bounded(limit, sink.record(&target, &event)).await {
                warn!(server = %server, target = %target, error = %e, "Log sink failed");
            }
        }))
    }

    // ------------------------------------------------------------------
    // Backup
    // ------------------------------------------------------------------

    pub async fn backup(&self) -> Vec<QueueBackup> {
        let mut backups = Vec::new();
        for queue in self.queues() {
            backups.push(queue.backup().await);
        }
        backups
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        for queue in self.queues.get_mut().values() {
            queue.dispose();
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
