//! Queue data structures.
//!
//! Defines members, requesters, helpers and the render snapshot of a queue.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Principal identifier (a member of an organizational unit).
pub type PrincipalId = String;

/// Organizational unit identifier.
pub type ServerId = String;

/// A principal known to a server, with its role names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    /// Principal ID
    pub id: PrincipalId,
    /// Name shown in queue views
    pub display_name: String,
    /// Role names held in the unit
    pub roles: BTreeSet<String>,
}

impl Member {
    /// Create a member with no roles.
    pub fn new(id: impl Into<PrincipalId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            roles: BTreeSet::new(),
        }
    }

    /// Add a role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Check for a single role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// True if any of `roles` is held. An empty requirement is always met.
    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.is_empty() || roles.iter().any(|r| self.roles.contains(r.as_ref()))
    }
}

/// A principal waiting in a queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Helpee {
    pub member: Member,
    pub wait_start: DateTime<Utc>,
    /// Head of the line when inserted. Display only, never re-validated.
    pub up_next: bool,
}

impl Helpee {
    pub fn new(member: Member, up_next: bool) -> Self {
        Self {
            member,
            wait_start: Utc::now(),
            up_next,
        }
    }

    pub fn id(&self) -> &PrincipalId {
        &self.member.id
    }
}

/// A principal serving a queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Helper {
    pub member: Member,
    pub help_start: DateTime<Utc>,
    pub help_end: Option<DateTime<Utc>>,
    /// Members dequeued by this helper during the session, in order
    pub helped_members: Vec<Member>,
}

impl Helper {
    pub fn new(member: Member) -> Self {
        Self {
            member,
            help_start: Utc::now(),
            help_end: None,
            helped_members: Vec::new(),
        }
    }

    pub fn id(&self) -> &PrincipalId {
        &self.member.id
    }

    /// Session length, once the session has ended.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.help_end.map(|end| end - self.help_start)
    }
}

/// Snapshot handed to the renderer and to extension hooks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueView {
    pub name: String,
    pub is_open: bool,
    /// Helper display names, longest-serving first
    pub helpers: Vec<String>,
    /// Requester display names, head of the line first
    pub requesters: Vec<String>,
}

/// When a closed queue's line is cleared automatically.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AutoClearPolicy {
    #[default]
    Disabled,
    /// Clear once the queue has been closed this many hours
    AfterHours(u32),
}

impl AutoClearPolicy {
    pub fn threshold(&self) -> Option<chrono::Duration> {
        match self {
            AutoClearPolicy::Disabled => None,
            AutoClearPolicy::AfterHours(hours) => Some(chrono::Duration::hours(i64::from(*hours))),
        }
    }
}

impl std::fmt::Display for AutoClearPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AutoClearPolicy::Disabled => write!(f, "disabled"),
            AutoClearPolicy::AfterHours(hours) => write!(f, "after {} hours", hours),
        }
    }
}
