//! Error types for queue and server operations.
//!
//! Every queue error carries the queue name so the message shown to the
//! requester says which queue refused the action.

use crate::model::PrincipalId;

/// Precondition violations raised by the queue state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("You are already helping in queue {queue}.")]
    AlreadyHelping { queue: String },

    #[error("You are not a helper for queue {queue}.")]
    NotAHelper { queue: String },

    #[error("Queue {queue} is closed.")]
    QueueClosed { queue: String },

    #[error("You are already in queue {queue}.")]
    AlreadyQueued { queue: String },

    #[error("You cannot join queue {queue} while helping it.")]
    IsHelper { queue: String },

    #[error("There is no one left in queue {queue}.")]
    EmptyQueue { queue: String },

    #[error("That member is not in queue {queue}.")]
    NotInQueue { queue: String },

    #[error("You are already subscribed to queue {queue}.")]
    AlreadySubscribed { queue: String },

    #[error("You are not subscribed to queue {queue}.")]
    NotSubscribed { queue: String },
}

impl QueueError {
    /// Name of the queue that raised the error.
    pub fn queue(&self) -> &str {
        match self {
            QueueError::AlreadyHelping { queue }
            | QueueError::NotAHelper { queue }
            | QueueError::QueueClosed { queue }
            | QueueError::AlreadyQueued { queue }
            | QueueError::IsHelper { queue }
            | QueueError::EmptyQueue { queue }
            | QueueError::NotInQueue { queue }
            | QueueError::AlreadySubscribed { queue }
            | QueueError::NotSubscribed { queue } => queue,
        }
    }
}

/// Errors raised by the server aggregate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServerError {
    #[error("Queue {0} already exists.")]
    QueueExists(String),

    #[error("Queue {0} does not exist.")]
    QueueNotFound(String),

    #[error("Member {0} is not part of this server.")]
    NotMember(PrincipalId),

    #[error("You are not helping any queue.")]
    NotHelping,

    #[error("You do not have a role for any queue.")]
    NoScopedQueues,

    #[error("There is no one waiting in any of your queues.")]
    NothingToDequeue,

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Result type for server operations.
pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_error_names_queue() {
        let err = QueueError::EmptyQueue {
            queue: "CS 101".to_string(),
        };
        assert_eq!(err.queue(), "CS 101");
        assert!(err.to_string().contains("CS 101"));
    }

    #[test]
    fn test_server_error_wraps_queue_error() {
        let err: ServerError = QueueError::QueueClosed {
            queue: "Lab".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "Queue Lab is closed.");
    }
}
