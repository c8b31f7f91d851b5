//! Test doubles and a ready-made dispatcher.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use officehours_commands::{
    DynInteractionExtension, Dispatcher, InteractionRequest, Reply, ReplyError, Responder,
    ServerRegistry, builtin_handlers, compose,
};
use officehours_core::config::roles;
use officehours_core::{
    Collaborators, CoreConfig, DeliveryError, Detached, LogEvent, LogSink, Member, Server,
};

pub const SERVER_ID: &str = "guild-1";

/// Responder that records the placeholder and every reply.
#[derive(Default)]
pub struct RecordingResponder {
    pub deferred: Mutex<Vec<String>>,
    pub replies: Mutex<Vec<Reply>>,
}

impl RecordingResponder {
    pub fn reply_count(&self) -> usize {
        self.replies.lock().len()
    }

    pub fn last_reply(&self) -> Option<Reply> {
        self.replies.lock().last().cloned()
    }
}

#[async_trait::async_trait]
impl Responder for RecordingResponder {
    async fn defer(&self, placeholder: &str) -> Result<(), ReplyError> {
        self.deferred.lock().push(placeholder.to_string());
        Ok(())
    }

    async fn reply(&self, reply: Reply) -> Result<(), ReplyError> {
        self.replies.lock().push(reply);
        Ok(())
    }
}

/// Log sink that records events, fails every call when `broken` is set and
/// never answers when `stalled` is set.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<LogEvent>>,
    pub broken: AtomicBool,
    pub stalled: AtomicBool,
}

#[async_trait::async_trait]
impl LogSink for RecordingSink {
    async fn record(&self, target: &str, event: &LogEvent) -> Result<(), DeliveryError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(DeliveryError::new(target, "channel deleted"));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

pub struct World {
    pub server: Arc<Server>,
    pub registry: Arc<ServerRegistry>,
    pub dispatcher: Dispatcher,
    pub sink: Arc<RecordingSink>,
}

impl World {
    pub async fn new() -> Self {
        Self::with_extensions(&[]).await
    }

    /// Server with an admin, a staff helper scoped to "CS 101", two verified
    /// students, one queue and a log target.
    pub async fn with_extensions(extensions: &[DynInteractionExtension]) -> Self {
        init_tracing();
        let sink = Arc::new(RecordingSink::default());
        let detached = Arc::new(Detached);
        let collaborators = Collaborators::new(detached.clone(), detached, sink.clone());
        let server = Arc::new(Server::new(
            SERVER_ID,
            "CS Department",
            collaborators,
            CoreConfig::default(),
        ));

        server.upsert_member(Member::new("admin", "Admin").with_role(roles::BOT_ADMIN));
        server.upsert_member(
            Member::new("ta", "Teaching Assistant")
                .with_role(roles::STAFF)
                .with_role("CS 101"),
        );
        for id in ["s1", "s2"] {
            server.upsert_member(Member::new(id, format!("Student {}", id)).with_role(roles::VERIFIED));
        }
        server.upsert_member(Member::new("guest", "Guest"));

        server.create_queue("CS 101").await.unwrap();
        server.set_log_target(Some("log-channel".to_string()));

        let registry = Arc::new(ServerRegistry::new());
        registry.register(server.clone());
        let handlers = compose(builtin_handlers(), extensions).unwrap();
        let dispatcher = Dispatcher::new(registry.clone(), handlers);

        Self {
            server,
            registry,
            dispatcher,
            sink,
        }
    }

    pub async fn run(&self, request: InteractionRequest) -> (officehours_commands::DispatchOutcome, RecordingResponder) {
        let responder = RecordingResponder::default();
        let outcome = self.dispatcher.dispatch(request, &responder).await;
        (outcome, responder)
    }

    /// Let spawned log writes reach the sink.
    pub async fn settle(&self) {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

pub fn command(name: &str, requester: &str) -> InteractionRequest {
    InteractionRequest::command(name, requester).in_server(SERVER_ID)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
