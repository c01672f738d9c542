//! One conversation's state: store, gate, sink and status, mutated from a
//! single owner. Nothing here awaits; the session runner feeds I/O results in.

use serde::Serialize;
use tracing::{debug, info, warn};
use valezap_observability::redact_text;
use valezap_types::{ConversationKey, Message, Origin};

use crate::error::SyncError;
use crate::gate::{GateState, SendGate};
use crate::sink::{PresentationSink, SyncStatus};
use crate::store::{IngestAction, PendingHandle, ReconciliationStore};
use crate::transport::SendOutcome;

/// An accepted submission the caller must now put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSend {
    pub pending: PendingHandle,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConversationSnapshot {
    pub gate: GateState,
    pub status: SyncStatus,
    pub rendered_keys: usize,
    pub pending: usize,
    pub sends_in_flight: usize,
}

pub struct Conversation<S: PresentationSink> {
    key: ConversationKey,
    store: ReconciliationStore,
    gate: SendGate,
    sink: S,
    failure_notice: String,
    status: SyncStatus,
    sends_in_flight: usize,
    stream_opened_once: bool,
    stream_down: bool,
}

impl<S: PresentationSink> Conversation<S> {
    pub fn new(key: ConversationKey, mut sink: S, failure_notice: impl Into<String>) -> Self {
        let status = SyncStatus::Connecting;
        sink.set_status(status.label());
        Self {
            store: ReconciliationStore::new(key.clone()),
            key,
            gate: SendGate::new(),
            sink,
            failure_notice: failure_notice.into(),
            status,
            sends_in_flight: 0,
            stream_opened_once: false,
            stream_down: false,
        }
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn store(&self) -> &ReconciliationStore {
        &self.store
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            gate: self.gate.state(),
            status: self.status,
            rendered_keys: self.store.rendered_len(),
            pending: self.store.pending_len(),
            sends_in_flight: self.sends_in_flight,
        }
    }

    /// Gate check plus optimistic render. `None` means rejected with nothing
    /// rendered and nothing to send.
    pub fn try_send(&mut self, text: &str) -> Option<OutboundSend> {
        let text = self.gate.try_enter(text)?.to_string();
        let Some(message) = Message::pending_user(self.key.clone(), &text) else {
            self.gate.release();
            return None;
        };

        match self.store.submit_optimistic(message, &mut self.sink) {
            Some(pending) => {
                self.gate.assign_turn(pending.temp_id());
                self.sends_in_flight += 1;
                self.refresh_status();
                info!("send accepted {}", redact_text(&text));
                Some(OutboundSend { pending, text })
            }
            None => {
                self.gate.release();
                debug!("send refused, identical message already on screen");
                None
            }
        }
    }

    /// Route a message from any channel through the store. A newly rendered
    /// assistant message ends the current turn.
    pub fn ingest(&mut self, message: Message) -> IngestAction {
        let origin = message.origin;
        let action = self.store.ingest(message, &mut self.sink);
        if matches!(action, IngestAction::Rendered(_)) && origin == Origin::Assistant {
            self.gate.release();
        }
        action
    }

    /// Ingest a history page in order. Returns how many rows it produced.
    pub fn load_history(&mut self, messages: Vec<Message>) -> usize {
        messages
            .into_iter()
            .map(|m| self.ingest(m))
            .filter(|a| !matches!(a, IngestAction::Ignored(_)))
            .count()
    }

    pub fn on_send_succeeded(&mut self, pending: &PendingHandle, outcome: SendOutcome) {
        self.finish_send();
        if let Some(record) = outcome.record {
            self.ingest(record);
        }
        if let Some(reply) = outcome.reply {
            self.ingest(reply);
        }
        if self.store.is_pending(pending) {
            debug!(
                "send {} settled without a matching record; waiting for the stream",
                pending.temp_id()
            );
        }
    }

    /// Roll back the placeholder, unlatch the gate if this send still holds
    /// it, and show the failure notice. If a merge already confirmed the
    /// message, nothing is retracted. Returns whether the notice was shown.
    pub fn on_send_failed(&mut self, pending: &PendingHandle, error: &SyncError) -> bool {
        self.finish_send();
        self.gate.release_turn(pending.temp_id());
        if !self.store.rollback(pending, &mut self.sink) {
            warn!(
                "send {} failed after it was confirmed: {error}",
                pending.temp_id()
            );
            return false;
        }
        warn!("send {} rolled back: {error}", pending.temp_id());
        let notice = Message::local_notice(self.key.clone(), &self.failure_notice);
        self.ingest(notice);
        true
    }

    /// Returns `true` if this open follows an outage, i.e. a reconnect.
    pub fn stream_opened(&mut self) -> bool {
        let reconnect = self.stream_opened_once || self.stream_down;
        self.stream_opened_once = true;
        self.stream_down = false;
        self.refresh_status();
        reconnect
    }

    pub fn stream_lost(&mut self) {
        self.stream_down = true;
        self.refresh_status();
    }

    fn finish_send(&mut self) {
        self.sends_in_flight = self.sends_in_flight.saturating_sub(1);
        self.refresh_status();
    }

    fn compute_status(&self) -> SyncStatus {
        if self.stream_down {
            SyncStatus::Reconnecting
        } else if self.sends_in_flight > 0 {
            SyncStatus::Sending
        } else if !self.stream_opened_once {
            SyncStatus::Connecting
        } else {
            SyncStatus::Online
        }
    }

    fn refresh_status(&mut self) {
        let next = self.compute_status();
        if next != self.status {
            self.status = next;
            self.sink.set_status(next.label());
        }
    }
}
