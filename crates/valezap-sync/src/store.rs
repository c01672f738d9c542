//! Reconciliation store: the single authority on whether an inbound message is
//! rendered, merged into an optimistic placeholder, or dropped.
//!
//! Owns the rendered key set and the FIFO of pending entries for exactly one
//! conversation. Every sink instruction for message rows goes through here.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, warn};
use uuid::Uuid;
use valezap_observability::redact_text;
use valezap_types::{ConversationKey, DedupKey, LifecycleState, Message, Origin};

use crate::sink::{PresentationSink, RenderHandle};

/// Returned by [`ReconciliationStore::submit_optimistic`]; hand it back to
/// [`ReconciliationStore::rollback`] if the send fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingHandle {
    temp_id: String,
    render: RenderHandle,
}

impl PendingHandle {
    pub fn temp_id(&self) -> &str {
        &self.temp_id
    }

    pub fn render_handle(&self) -> RenderHandle {
        self.render
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestAction {
    /// A pending placeholder was upgraded in place.
    Merged(RenderHandle),
    Rendered(RenderHandle),
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    AlreadyRendered,
    EmptyText,
    ForeignConversation,
}

#[derive(Debug)]
struct PendingEntry {
    temp_id: String,
    key: DedupKey,
    handle: RenderHandle,
    message: Message,
}

impl PendingEntry {
    fn matches(&self, message: &Message) -> bool {
        self.message.conversation == message.conversation
            && self.message.trimmed_text() == message.trimmed_text()
    }
}

#[derive(Debug)]
pub struct ReconciliationStore {
    conversation: ConversationKey,
    rendered: HashSet<DedupKey>,
    pending: VecDeque<PendingEntry>,
}

impl ReconciliationStore {
    pub fn new(conversation: ConversationKey) -> Self {
        Self {
            conversation,
            rendered: HashSet::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn conversation(&self) -> &ConversationKey {
        &self.conversation
    }

    pub fn is_rendered(&self, key: &DedupKey) -> bool {
        self.rendered.contains(key)
    }

    pub fn rendered_len(&self) -> usize {
        self.rendered.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, handle: &PendingHandle) -> bool {
        self.pending.iter().any(|e| e.temp_id == handle.temp_id)
    }

    /// Render a locally typed message before the network confirms it.
    /// Returns `None` (and renders nothing) when its key is already on screen.
    pub fn submit_optimistic(
        &mut self,
        message: Message,
        sink: &mut dyn PresentationSink,
    ) -> Option<PendingHandle> {
        if !message.has_content() {
            return None;
        }
        if message.conversation != self.conversation {
            warn!(
                "optimistic submit for foreign conversation {} ignored",
                message.conversation
            );
            return None;
        }

        let key = message.dedup_key();
        if self.rendered.contains(&key) {
            debug!(
                "optimistic submit skipped, key already rendered: {}",
                redact_text(&message.text)
            );
            return None;
        }

        let handle = sink.render(&message);
        self.rendered.insert(key.clone());
        let temp_id = Uuid::new_v4().to_string();
        self.pending.push_back(PendingEntry {
            temp_id: temp_id.clone(),
            key,
            handle,
            message,
        });

        Some(PendingHandle {
            temp_id,
            render: handle,
        })
    }

    /// Decide what to do with a message from history, a send response, or the
    /// live stream.
    pub fn ingest(&mut self, message: Message, sink: &mut dyn PresentationSink) -> IngestAction {
        if !message.has_content() {
            return IngestAction::Ignored(IgnoreReason::EmptyText);
        }
        if message.conversation != self.conversation {
            debug!(
                "dropping message for foreign conversation {}",
                message.conversation
            );
            return IngestAction::Ignored(IgnoreReason::ForeignConversation);
        }

        let key = message.dedup_key();

        // A known server id is final even if identical text is pending again.
        if key.is_id() && self.rendered.contains(&key) {
            return IngestAction::Ignored(IgnoreReason::AlreadyRendered);
        }

        if message.origin == Origin::User {
            if let Some(pos) = self.pending.iter().position(|e| e.matches(&message)) {
                return self.merge(pos, message, key, sink);
            }
        }

        if self.rendered.contains(&key) {
            return IngestAction::Ignored(IgnoreReason::AlreadyRendered);
        }

        let handle = sink.render(&message);
        self.rendered.insert(key);
        IngestAction::Rendered(handle)
    }

    fn merge(
        &mut self,
        pos: usize,
        mut message: Message,
        key: DedupKey,
        sink: &mut dyn PresentationSink,
    ) -> IngestAction {
        let Some(entry) = self.pending.remove(pos) else {
            return IngestAction::Ignored(IgnoreReason::AlreadyRendered);
        };

        self.rendered.remove(&entry.key);
        self.rendered.insert(key);

        message.state = LifecycleState::Confirmed;
        if message.timestamp.is_none() {
            message.timestamp = entry.message.timestamp;
        }
        sink.update(entry.handle, &message);
        debug!(
            "merged pending {} into confirmed id {}",
            entry.temp_id,
            message.id.as_deref().unwrap_or("-")
        );
        IngestAction::Merged(entry.handle)
    }

    /// Retract a placeholder whose send failed and free its key for a retry.
    /// Returns `false` if the entry was already resolved by a merge.
    pub fn rollback(&mut self, handle: &PendingHandle, sink: &mut dyn PresentationSink) -> bool {
        let Some(pos) = self
            .pending
            .iter()
            .position(|e| e.temp_id == handle.temp_id)
        else {
            return false;
        };
        let Some(entry) = self.pending.remove(pos) else {
            return false;
        };
        self.rendered.remove(&entry.key);
        sink.remove(entry.handle);
        true
    }
}
