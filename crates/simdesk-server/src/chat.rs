use std::collections::HashSet;
use std::sync::Arc;

use simdesk_core::ids::SessionId;
use simdesk_core::Matcher;
use simdesk_telemetry::MetricsRecorder;
use tokio::sync::mpsc;

use crate::client::{BroadcastReport, SessionRegistry};

/// Inbound chat transport events, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    Connected(SessionId),
    Message { from: SessionId, text: String },
    Disconnected(SessionId),
}

/// Broadcast assistant: every event fans out to all open sessions.
pub struct ChatAssistant {
    matcher: Matcher,
    registry: Arc<SessionRegistry>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl ChatAssistant {
    pub fn new(matcher: Matcher, registry: Arc<SessionRegistry>) -> Self {
        Self {
            matcher,
            registry,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Welcome text goes to every open session, not only the new one.
    pub fn on_connect(&self, session: &SessionId) -> BroadcastReport {
        tracing::info!(session_id = %session, "Chat session connected");
        self.update_session_gauge();
        let report = self.registry.broadcast(&self.matcher.config().welcome);
        self.record(report);
        report
    }

    /// Echo the raw text to everyone, then the computed reply. Both
    /// broadcasts complete in order, so each session's queue holds the
    /// echo ahead of the reply. A session that missed the echo gets no
    /// reply either.
    pub fn on_message(&self, from: &SessionId, text: &str) -> (BroadcastReport, BroadcastReport) {
        tracing::debug!(session_id = %from, len = text.len(), "Chat message received");
        if let Some(m) = &self.metrics {
            m.counter_inc("chat.messages", &[], 1);
        }

        let mut missed = HashSet::new();
        let echo = self.registry.broadcast_sequenced(text, &mut missed);
        let reply = self.registry.broadcast_sequenced(&self.matcher.reply(text), &mut missed);
        self.record(echo);
        self.record(reply);
        (echo, reply)
    }

    pub fn on_disconnect(&self, session: &SessionId) {
        self.registry.unregister(session);
        self.update_session_gauge();
        tracing::info!(session_id = %session, "Chat session disconnected");
    }

    pub fn handle(&self, event: ChatEvent) {
        match event {
            ChatEvent::Connected(id) => {
                self.on_connect(&id);
            }
            ChatEvent::Message { from, text } => {
                self.on_message(&from, &text);
            }
            ChatEvent::Disconnected(id) => self.on_disconnect(&id),
        }
    }

    fn record(&self, report: BroadcastReport) {
        if let Some(m) = &self.metrics {
            m.counter_inc("chat.broadcast.delivered", &[], report.delivered as u64);
            m.counter_inc("chat.broadcast.skipped", &[], report.skipped as u64);
        }
    }

    fn update_session_gauge(&self) {
        if let Some(m) = &self.metrics {
            m.gauge_set("chat.sessions", &[], self.registry.open_count() as f64);
        }
    }
}

/// Single worker for all chat events. Sends never await a peer, so one
/// slow session cannot stall the loop.
pub async fn run_assistant(mut rx: mpsc::Receiver<ChatEvent>, assistant: Arc<ChatAssistant>) {
    while let Some(event) = rx.recv().await {
        assistant.handle(event);
    }
    tracing::info!("Chat event channel closed");
}
