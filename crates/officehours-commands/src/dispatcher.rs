//! Request dispatch.
//!
//! The dispatcher validates where a request came from, acknowledges it,
//! routes it through the composed handler tables, checks the requester's
//! roles and runs the handler. Every request ends in exactly one reply:
//! the handler's own, a success message, or an error message. Log sink
//! writes are spawned and never awaited.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use officehours_core::collaborator::bounded;
use officehours_core::config::dispatch::UNKNOWN_ORIGIN;
use officehours_core::{CoreConfig, LogEvent, Member, Server, ServerId};
use tracing::{debug, error, info, warn};

use crate::composer::ComposedHandlers;
use crate::errors::{CommandError, ErrorKind};
use crate::request::{InteractionRequest, Reply, Responder};
use crate::route::HandlerContext;

/// Tracing target for dispatch events.
pub const DISPATCH_TARGET: &str = "officehours::dispatch";

/// Servers the dispatcher accepts requests from, keyed by id.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: DashMap<ServerId, Arc<Server>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `server`, returning any server it replaced.
    pub fn register(&self, server: Arc<Server>) -> Option<Arc<Server>> {
        info!(target: DISPATCH_TARGET, server = %server.name(), id = %server.id(), "Server registered");
        self.servers.insert(server.id().clone(), server)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Server>> {
        self.servers.remove(id).map(|(_, server)| server)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Server>> {
        self.servers.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.servers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Stage a request reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Received,
    OriginValidated,
    Routed,
    Authorized,
    Executed,
    Replied,
    Failed,
}

/// Result of dispatching one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub request_id: String,
    /// `Replied` on success, otherwise `Failed`
    pub stage: RequestStage,
    pub error: Option<ErrorKind>,
    /// Reply the dispatcher sent; `None` when the handler replied itself
    pub reply: Option<Reply>,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        self.stage == RequestStage::Replied
    }
}

/// Routes requests to handlers. Construct once and hand to the transport.
pub struct Dispatcher {
    registry: Arc<ServerRegistry>,
    handlers: ComposedHandlers,
    config: CoreConfig,
}

impl Dispatcher {
    pub fn new(registry: Arc<ServerRegistry>, handlers: ComposedHandlers) -> Self {
        Self {
            registry,
            handlers,
            config: CoreConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn handlers(&self) -> &ComposedHandlers {
        &self.handlers
    }

    /// Dispatch one request and send its reply through `responder`.
    pub async fn dispatch(
        &self,
        request: InteractionRequest,
        responder: &dyn Responder,
    ) -> DispatchOutcome {
        debug!(
            target: DISPATCH_TARGET,
            request_id = %request.id,
            kind = %request.kind,
            name = %request.name,
            stage = ?RequestStage::Received,
            "Request received"
        );

        let Some(server) = request
            .server_id
            .as_deref()
            .and_then(|id| self.registry.get(id))
        else {
            let err = CommandError::UnknownOrigin(request.server_id.clone());
            warn!(
                target: DISPATCH_TARGET,
                context = UNKNOWN_ORIGIN,
                request_id = %request.id,
                server_id = ?request.server_id,
                name = %request.name,
                "Request from unknown origin"
            );
            return self.fail(&request, responder, err).await;
        };

        let requester = server
            .member(&request.requester)
            .unwrap_or_else(|| Member::new(request.requester.clone(), request.requester.clone()));
        debug!(target: DISPATCH_TARGET, request_id = %request.id, stage = ?RequestStage::OriginValidated, "Stage reached");

        // Sink writes run in the background and never delay the reply.
        log_raw_request(&server, &request);
        let skip_placeholder = self.handlers.skips_placeholder(request.kind, &request.name);
        self.acknowledge(&request, responder, skip_placeholder).await;

        let Some(route) = self.handlers.route(request.kind, &request.name) else {
            let err = CommandError::NotImplemented(request.name.clone());
            return self.fail(&request, responder, err).await;
        };
        debug!(target: DISPATCH_TARGET, request_id = %request.id, stage = ?RequestStage::Routed, "Stage reached");

        if !route.authorizes(&requester) {
            let err = CommandError::Authorization {
                command: route.id.clone(),
                required: route.required_roles.clone(),
            };
            return self.fail(&request, responder, err).await;
        }
        debug!(target: DISPATCH_TARGET, request_id = %request.id, stage = ?RequestStage::Authorized, "Stage reached");

        let ctx = HandlerContext {
            server: &server,
            request: &request,
            requester: &requester,
            responder,
        };
        let result = match AssertUnwindSafe(route.handler.handle(&ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(CommandError::Internal(format!(
                "handler for `{}` panicked",
                route.id
            ))),
        };
        debug!(target: DISPATCH_TARGET, request_id = %request.id, stage = ?RequestStage::Executed, "Stage reached");

        match result {
            Ok(Some(message)) => {
                let reply = Reply::Success(message);
                self.send_reply(&request, responder, reply.clone()).await;
                DispatchOutcome {
                    request_id: request.id,
                    stage: RequestStage::Replied,
                    error: None,
                    reply: Some(reply),
                }
            }
            Ok(None) => DispatchOutcome {
                request_id: request.id,
                stage: RequestStage::Replied,
                error: None,
                reply: None,
            },
            Err(err) => {
                error!(
                    target: DISPATCH_TARGET,
                    request_id = %request.id,
                    server = %server.name(),
                    name = %request.name,
                    error = %err,
                    "Handler failed"
                );
                server.spawn_log(LogEvent::error(
                    server.name(),
                    format!("`{}` failed for {}: {}", request.name, request.requester, err),
                ));
                self.fail(&request, responder, err).await
            }
        }
    }

    async fn acknowledge(
        &self,
        request: &InteractionRequest,
        responder: &dyn Responder,
        skip_placeholder: bool,
    ) {
        if skip_placeholder {
            return;
        }
        let limit = self.config.collaborator_timeout();
        if let Err(e) = bounded(limit, responder.defer(&self.config.placeholder)).await {
            warn!(target: DISPATCH_TARGET, request_id = %request.id, error = %e, "Placeholder not sent");
        }
    }

    async fn send_reply(&self, request: &InteractionRequest, responder: &dyn Responder, reply: Reply) {
        let limit = self.config.collaborator_timeout();
        if let Err(e) = bounded(limit, responder.reply(reply)).await {
            warn!(target: DISPATCH_TARGET, request_id = %request.id, error = %e, "Reply not delivered");
        }
    }

    async fn fail(
        &self,
        request: &InteractionRequest,
        responder: &dyn Responder,
        err: CommandError,
    ) -> DispatchOutcome {
        debug!(
            target: DISPATCH_TARGET,
            request_id = %request.id,
            stage = ?RequestStage::Failed,
            kind = ?err.kind(),
            error = %err,
            "Request failed"
        );
        let reply = Reply::Error(err.to_string());
        self.send_reply(request, responder, reply.clone()).await;
        DispatchOutcome {
            request_id: request.id.clone(),
            stage: RequestStage::Failed,
            error: Some(err.kind()),
            reply: Some(reply),
        }
    }
}

fn log_raw_request(server: &Server, request: &InteractionRequest) {
    let data = serde_json::to_value(request).unwrap_or(serde_json::Value::Null);
    let event = LogEvent::info(
        server.name(),
        format!("{} `{}` from {}", request.kind, request.name, request.requester),
    )
    .with_data(data);
    server.spawn_log(event);
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("servers", &self.registry.len())
            .finish_non_exhaustive()
    }
}
