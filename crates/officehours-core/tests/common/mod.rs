//! Recording collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use officehours_core::{
    Collaborators, CoreConfig, DeliveryError, DynQueueExtension, ExtensionError, Helpee, Helper, HelpQueue,
    LogEvent, LogSink, Member, Notifier, PrincipalId, QueueExtension, QueueView, RenderError,
    Renderer,
};

/// Renderer that records every call and can fail structurally.
#[derive(Default)]
pub struct RecordingRenderer {
    pub calls: Mutex<Vec<(QueueView, bool)>>,
    /// Number of upcoming incremental renders that fail structurally
    pub structural_failures: AtomicUsize,
}

impl RecordingRenderer {
    pub fn fail_next_structurally(&self, times: usize) {
        self.structural_failures.store(times, Ordering::SeqCst);
    }

    pub fn full_redraws(&self) -> usize {
        self.calls.lock().iter().filter(|(_, full)| *full).count()
    }

    pub fn last_view(&self) -> Option<QueueView> {
        self.calls.lock().last().map(|(view, _)| view.clone())
    }
}

#[async_trait::async_trait]
impl Renderer for RecordingRenderer {
    async fn render_queue(&self, view: &QueueView, full: bool) -> Result<(), RenderError> {
        self.calls.lock().push((view.clone(), full));
        if !full
            && self
                .structural_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(RenderError::Structural("message missing".to_string()));
        }
        Ok(())
    }
}

/// Notifier that records deliveries and rejects a chosen recipient.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(PrincipalId, String)>>,
    pub reject: Mutex<Option<PrincipalId>>,
}

impl RecordingNotifier {
    pub fn recipients(&self) -> Vec<PrincipalId> {
        let mut recipients: Vec<_> = self.sent.lock().iter().map(|(p, _)| p.clone()).collect();
        recipients.sort();
        recipients
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_principal(
        &self,
        principal: &PrincipalId,
        message: &str,
    ) -> Result<(), DeliveryError> {
        if self.reject.lock().as_ref() == Some(principal) {
            return Err(DeliveryError::new(principal.clone(), "dms closed"));
        }
        self.sent.lock().push((principal.clone(), message.to_string()));
        Ok(())
    }
}

/// Log sink that records events per target.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(String, LogEvent)>>,
}

#[async_trait::async_trait]
impl LogSink for RecordingSink {
    async fn record(&self, target: &str, event: &LogEvent) -> Result<(), DeliveryError> {
        self.events.lock().push((target.to_string(), event.clone()));
        Ok(())
    }
}

/// Extension that records the hooks it sees.
#[derive(Default)]
pub struct RecordingExtension {
    pub events: Mutex<Vec<String>>,
}

impl RecordingExtension {
    pub fn seen(&self, hook: &str) -> usize {
        self.events.lock().iter().filter(|e| e.as_str() == hook).count()
    }
}

#[async_trait::async_trait]
impl QueueExtension for RecordingExtension {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_open(&self, _q: &QueueView, _h: &Helper) -> Result<(), ExtensionError> {
        self.events.lock().push("open".to_string());
        Ok(())
    }

    async fn on_close(&self, _q: &QueueView, _h: &Helper) -> Result<(), ExtensionError> {
        self.events.lock().push("close".to_string());
        Ok(())
    }

    async fn on_enqueue(&self, _q: &QueueView, _h: &Helpee) -> Result<(), ExtensionError> {
        self.events.lock().push("enqueue".to_string());
        Ok(())
    }

    async fn on_dequeue(&self, _q: &QueueView, _h: &Helpee) -> Result<(), ExtensionError> {
        self.events.lock().push("dequeue".to_string());
        Ok(())
    }

    async fn on_remove(&self, _q: &QueueView, _h: &Helpee) -> Result<(), ExtensionError> {
        self.events.lock().push("remove".to_string());
        Ok(())
    }

    async fn on_remove_all(&self, _q: &QueueView, _r: &[Helpee]) -> Result<(), ExtensionError> {
        self.events.lock().push("remove_all".to_string());
        Ok(())
    }

    async fn on_periodic_tick(&self, _q: &QueueView) -> Result<(), ExtensionError> {
        self.events.lock().push("tick".to_string());
        Ok(())
    }

    async fn on_render_complete(&self, _q: &QueueView, full: bool) -> Result<(), ExtensionError> {
        let name = if full { "render_full" } else { "render" };
        self.events.lock().push(name.to_string());
        Ok(())
    }
}

/// Extension whose every hook fails.
pub struct BrokenExtension;

#[async_trait::async_trait]
impl QueueExtension for BrokenExtension {
    fn name(&self) -> &str {
        "broken"
    }

    async fn on_open(&self, _q: &QueueView, _h: &Helper) -> Result<(), ExtensionError> {
        Err(ExtensionError::Unavailable("calendar down".to_string()))
    }

    async fn on_enqueue(&self, _q: &QueueView, _h: &Helpee) -> Result<(), ExtensionError> {
        Err(ExtensionError::Failed("sheet locked".to_string()))
    }
}

/// All the doubles wired together.
pub struct Harness {
    pub renderer: Arc<RecordingRenderer>,
    pub notifier: Arc<RecordingNotifier>,
    pub sink: Arc<RecordingSink>,
    pub extension: Arc<RecordingExtension>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        Self {
            renderer: Arc::new(RecordingRenderer::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            sink: Arc::new(RecordingSink::default()),
            extension: Arc::new(RecordingExtension::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(
            self.renderer.clone(),
            self.notifier.clone(),
            self.sink.clone(),
        )
    }

    pub fn queue(&self, name: &str) -> HelpQueue {
        let extension: DynQueueExtension = self.extension.clone();
        HelpQueue::new(name, self.collaborators(), CoreConfig::default())
            .with_extensions(vec![extension])
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn member(id: &str) -> Member {
    Member::new(id, format!("Member {}", id))
}
