//! Error types for command dispatch.
//!
//! Every failure a request can hit is a [`CommandError`]; the dispatcher turns
//! it into exactly one error reply.

use officehours_core::{QueueError, ServerError, ServerId};

use crate::request::InteractionKind;

/// Coarse classification of a [`CommandError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    State,
    Authorization,
    NotImplemented,
    UnknownOrigin,
    Internal,
}

/// Errors surfaced while dispatching a request.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Request shape does not fit the command (missing option, wrong channel).
    #[error("{0}")]
    Parse(String),

    /// Queue or server precondition failed.
    #[error(transparent)]
    State(#[from] ServerError),

    #[error("You need one of these roles to use `{command}`: {}", .required.join(", "))]
    Authorization {
        command: String,
        required: Vec<String>,
    },

    #[error("`{0}` is not implemented.")]
    NotImplemented(String),

    #[error("This request did not come from a known server.")]
    UnknownOrigin(Option<ServerId>),

    /// Failure returned by an extension-contributed handler.
    #[error(transparent)]
    Extension(#[from] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CommandError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn missing_option(name: &str) -> Self {
        Self::Parse(format!("Missing required option `{}`.", name))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(_) => ErrorKind::Parse,
            Self::State(_) => ErrorKind::State,
            Self::Authorization { .. } => ErrorKind::Authorization,
            Self::NotImplemented(_) => ErrorKind::NotImplemented,
            Self::UnknownOrigin(_) => ErrorKind::UnknownOrigin,
            Self::Extension(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<QueueError> for CommandError {
    fn from(error: QueueError) -> Self {
        Self::State(ServerError::Queue(error))
    }
}

/// Transport failed to deliver a reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Reply failed: {0}")]
pub struct ReplyError(pub String);

/// Startup-time defects in the composed handler tables.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComposeError {
    #[error("{kind} route `{id}` is registered by both {first} and {second}")]
    DuplicateRoute {
        kind: InteractionKind,
        id: String,
        first: String,
        second: String,
    },

    #[error("{source_name} skips the placeholder for unknown {kind} route `{id}`")]
    DanglingSkip {
        kind: InteractionKind,
        id: String,
        source_name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_message_lists_roles() {
        let err = CommandError::Authorization {
            command: "queue_add".to_string(),
            required: vec!["Bot Admin".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "You need one of these roles to use `queue_add`: Bot Admin"
        );
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[test]
    fn test_queue_error_is_state() {
        let err: CommandError = QueueError::EmptyQueue {
            queue: "Lab".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::State);
        assert!(err.to_string().contains("Lab"));
    }

    #[test]
    fn test_duplicate_route_message() {
        let err = ComposeError::DuplicateRoute {
            kind: InteractionKind::Button,
            id: "join".to_string(),
            first: "builtin".to_string(),
            second: "calendar".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "button route `join` is registered by both builtin and calendar"
        );
    }
}
