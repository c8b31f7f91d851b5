//! Core types for office-hours queues.
//!
//! Provides:
//! - Help queues with helper sessions, a FIFO waiting line and subscriptions
//! - Extension hooks fired at queue lifecycle points
//! - The server aggregate that owns a unit's queues and members
//! - Collaborator contracts for rendering, notification and logging

pub mod backup;
pub mod collaborator;
pub mod config;
pub mod error;
pub mod hooks;
pub mod model;
pub mod queue;
pub mod server;

// Re-exports
pub use backup::{HelpeeBackup, QueueBackup};

pub use collaborator::{
    CollaboratorFailure, Collaborators, DeliveryError, Detached, FanoutReport, LogEvent,
    LogLevel, LogSink, Notifier, RenderError, Renderer,
};

pub use config::{ConfigError, CoreConfig};

pub use error::{QueueError, ServerError};

pub use hooks::{DynQueueExtension, ExtensionError, HookEvent, QueueExtension};

pub use model::{
    AutoClearPolicy, Helpee, Helper, Member, PrincipalId, QueueView, ServerId,
};

pub use queue::HelpQueue;

pub use server::{ActiveHelper, Server, ServerSettings};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::collaborator::{Collaborators, LogEvent, LogSink, Notifier, Renderer};
    pub use crate::config::{CoreConfig, roles};
    pub use crate::error::{QueueError, Result, ServerError};
    pub use crate::hooks::{DynQueueExtension, QueueExtension};
    pub use crate::model::{AutoClearPolicy, Helpee, Helper, Member, PrincipalId, QueueView};
    pub use crate::queue::HelpQueue;
    pub use crate::server::Server;
}
