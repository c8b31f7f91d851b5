//! Inbound interaction requests and the reply handle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use officehours_core::{PrincipalId, ServerId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{CommandError, ReplyError};

/// The four kinds of interaction the dispatcher routes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InteractionKind {
    /// Slash-style command
    Command,
    /// Button press
    Button,
    /// Select-menu choice
    Menu,
    /// Form (modal) submission
    Modal,
}

impl InteractionKind {
    pub const ALL: [InteractionKind; 4] = [
        InteractionKind::Command,
        InteractionKind::Button,
        InteractionKind::Menu,
        InteractionKind::Modal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Command => "command",
            InteractionKind::Button => "button",
            InteractionKind::Menu => "menu",
            InteractionKind::Modal => "modal",
        }
    }
}

impl std::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One inbound interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRequest {
    /// Unique request ID
    pub id: String,
    pub kind: InteractionKind,
    /// Command, button, menu or form identifier
    pub name: String,
    /// Organizational unit the request came from, if any
    pub server_id: Option<ServerId>,
    pub requester: PrincipalId,
    /// Queue whose channel the request was issued in
    pub channel_queue: Option<String>,
    /// Named arguments
    pub options: BTreeMap<String, String>,
    pub received_at: DateTime<Utc>,
}

impl InteractionRequest {
    pub fn new(kind: InteractionKind, name: impl Into<String>, requester: impl Into<PrincipalId>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            name: name.into(),
            server_id: None,
            requester: requester.into(),
            channel_queue: None,
            options: BTreeMap::new(),
            received_at: Utc::now(),
        }
    }

    pub fn command(name: impl Into<String>, requester: impl Into<PrincipalId>) -> Self {
        Self::new(InteractionKind::Command, name, requester)
    }

    pub fn button(name: impl Into<String>, requester: impl Into<PrincipalId>) -> Self {
        Self::new(InteractionKind::Button, name, requester)
    }

    pub fn modal(name: impl Into<String>, requester: impl Into<PrincipalId>) -> Self {
        Self::new(InteractionKind::Modal, name, requester)
    }

    /// Set the originating server.
    pub fn in_server(mut self, server_id: impl Into<ServerId>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    /// Set the queue channel the request was issued in.
    pub fn in_queue_channel(mut self, queue: impl Into<String>) -> Self {
        self.channel_queue = Some(queue.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn require_option(&self, key: &str) -> Result<&str, CommandError> {
        self.option(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| CommandError::missing_option(key))
    }

    /// Boolean option; absent means `default`.
    pub fn flag(&self, key: &str, default: bool) -> Result<bool, CommandError> {
        match self.option(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| {
                CommandError::parse(format!("Option `{}` must be true or false.", key))
            }),
        }
    }

    /// Queue named by the `queue` option, else the channel's queue.
    pub fn target_queue(&self) -> Result<&str, CommandError> {
        self.option("queue")
            .or(self.channel_queue.as_deref())
            .ok_or_else(|| {
                CommandError::parse("Name a queue or use this command inside a queue channel.")
            })
    }
}

/// Final reply to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Success(String),
    Error(String),
    /// Ask the requester to fill in the named form
    Form(String),
}

/// Reply handle for one request, provided by the transport.
#[async_trait::async_trait]
pub trait Responder: Send + Sync {
    /// Send the neutral placeholder shown while the request runs.
    async fn defer(&self, placeholder: &str) -> Result<(), ReplyError>;

    /// Send the final reply, replacing the placeholder if one was sent.
    async fn reply(&self, reply: Reply) -> Result<(), ReplyError>;
}
