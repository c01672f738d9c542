//! Presentation seam. The engine issues render/update/remove instructions;
//! whatever UI sits behind the trait decides what they look like.

use serde::Serialize;
use valezap_types::Message;

/// Opaque handle to something a sink has rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderHandle(u64);

impl RenderHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

pub trait PresentationSink: Send {
    fn render(&mut self, message: &Message) -> RenderHandle;

    fn update(&mut self, handle: RenderHandle, message: &Message);

    fn remove(&mut self, handle: RenderHandle);

    fn set_status(&mut self, status: &str);
}

/// Connection status shown next to the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Connecting,
    Online,
    Sending,
    Reconnecting,
}

impl SyncStatus {
    pub fn label(self) -> &'static str {
        match self {
            SyncStatus::Connecting => "Connecting...",
            SyncStatus::Online => "Online",
            SyncStatus::Sending => "Sending...",
            SyncStatus::Reconnecting => "Reconnecting...",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedRow {
    pub handle: RenderHandle,
    pub message: Message,
}

/// In-memory sink. Keeps rows in render order; used headless and in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Vec<RenderedRow>,
    next_handle: u64,
    statuses: Vec<String>,
    renders: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[RenderedRow] {
        &self.rows
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.rows.iter().map(|r| &r.message)
    }

    pub fn texts(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.message.text.as_str()).collect()
    }

    /// Total `render` calls, including rows later removed.
    pub fn render_count(&self) -> usize {
        self.renders
    }

    pub fn status_history(&self) -> &[String] {
        &self.statuses
    }
}

impl PresentationSink for MemorySink {
    fn render(&mut self, message: &Message) -> RenderHandle {
        self.next_handle += 1;
        self.renders += 1;
        let handle = RenderHandle::new(self.next_handle);
        self.rows.push(RenderedRow {
            handle,
            message: message.clone(),
        });
        handle
    }

    fn update(&mut self, handle: RenderHandle, message: &Message) {
        if let Some(row) = self.rows.iter_mut().find(|r| r.handle == handle) {
            row.message = message.clone();
        }
    }

    fn remove(&mut self, handle: RenderHandle) {
        self.rows.retain(|r| r.handle != handle);
    }

    fn set_status(&mut self, status: &str) {
        self.statuses.push(status.to_string());
    }
}
