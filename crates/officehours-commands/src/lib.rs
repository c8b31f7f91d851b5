//! Command dispatch for office-hours servers.
//!
//! Provides:
//! - Interaction requests and the transport reply handle
//! - Route tables with per-route role requirements
//! - Composition of built-in and extension handler tables
//! - The built-in administrative, helper and member commands
//! - The dispatcher that turns each request into exactly one reply

pub mod composer;
pub mod dispatcher;
pub mod errors;
pub mod handlers;
pub mod request;
pub mod route;

// Re-exports
pub use composer::{BUILTIN_SOURCE, ComposedHandlers, compose};

pub use dispatcher::{DispatchOutcome, Dispatcher, RequestStage, ServerRegistry};

pub use errors::{CommandError, ComposeError, ErrorKind, ReplyError};

pub use handlers::{BuiltinCommand, builtin_handlers};

pub use request::{InteractionKind, InteractionRequest, Reply, Responder};

pub use route::{
    CommandHandler, DynCommandHandler, DynInteractionExtension, HandlerContext, HandlerSet,
    InteractionExtension, Route, RouteTable,
};
