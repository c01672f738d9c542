//! Session runner: the single task that owns a [`Conversation`].
//!
//! User commands, live-stream signals and finished network calls all arrive
//! on channels and are applied one at a time, so store and gate state never
//! need a lock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, Level};
use valezap_observability::{emit_event, ObservabilityEvent, ProcessKind};
use valezap_types::{ConversationKey, Message};

use crate::config::ClientConfig;
use crate::conversation::{Conversation, ConversationSnapshot};
use crate::error::SyncError;
use crate::sink::PresentationSink;
use crate::store::PendingHandle;
use crate::stream::{LiveSubscription, StreamSignal};
use crate::transport::{ChatTransport, SendOutcome};

const COMMAND_BUFFER: usize = 32;
const SIGNAL_BUFFER: usize = 64;

#[derive(Debug)]
pub enum SessionCommand {
    /// Reply is `true` when the text was accepted and a send started.
    Submit {
        text: String,
        reply: oneshot::Sender<bool>,
    },
    Snapshot(oneshot::Sender<ConversationSnapshot>),
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub reconnect_delay: Duration,
    pub resync_on_reconnect: bool,
    pub process: ProcessKind,
}

impl SessionOptions {
    pub fn from_config(config: &ClientConfig, process: ProcessKind) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay,
            resync_on_reconnect: config.resync_on_reconnect,
            process,
        }
    }
}

/// Cloneable front door to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(commands: mpsc::Sender<SessionCommand>) -> Self {
        Self { commands }
    }

    /// `false` if the gate rejected the text or the session is gone.
    pub async fn submit(&self, text: impl Into<String>) -> bool {
        let (reply, rx) = oneshot::channel();
        let cmd = SessionCommand::Submit {
            text: text.into(),
            reply,
        };
        if self.commands.send(cmd).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn snapshot(&self) -> Option<ConversationSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(SessionCommand::Snapshot(tx)).await.ok()?;
        rx.await.ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
    }
}

enum Settled {
    Send {
        pending: PendingHandle,
        result: Result<SendOutcome, SyncError>,
    },
    Resync(Result<Vec<Message>, SyncError>),
}

pub struct SessionRunner<S: PresentationSink> {
    conversation: Conversation<S>,
    transport: Arc<dyn ChatTransport>,
    options: SessionOptions,
    settled_tx: mpsc::UnboundedSender<Settled>,
    settled_rx: mpsc::UnboundedReceiver<Settled>,
}

impl<S: PresentationSink + 'static> SessionRunner<S> {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        conversation: Conversation<S>,
        options: SessionOptions,
    ) -> Self {
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();
        Self {
            conversation,
            transport,
            options,
            settled_tx,
            settled_rx,
        }
    }

    /// Load history, open the live stream, then serve until `Shutdown` or
    /// until every command sender is dropped. Returns the final state.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) -> Conversation<S> {
        let history = self.transport.fetch_history(self.conversation.key()).await;
        self.apply_history(history, false);

        let (signal_tx, mut signals) = mpsc::channel(SIGNAL_BUFFER);
        let subscription = LiveSubscription::spawn(
            self.transport.clone(),
            self.conversation.key().clone(),
            self.options.reconnect_delay,
            signal_tx,
        );

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(SessionCommand::Submit { text, reply }) => {
                        let accepted = self.submit(&text);
                        let _ = reply.send(accepted);
                    }
                    Some(SessionCommand::Snapshot(tx)) => {
                        let _ = tx.send(self.conversation.snapshot());
                    }
                    Some(SessionCommand::Shutdown) | None => break,
                },
                Some(signal) = signals.recv() => self.on_stream_signal(signal),
                Some(settled) = self.settled_rx.recv() => self.on_settled(settled),
            }
        }

        subscription.close().await;
        debug!("session {} stopped", self.conversation.key());
        self.conversation
    }

    fn submit(&mut self, text: &str) -> bool {
        let Some(outbound) = self.conversation.try_send(text) else {
            return false;
        };
        let transport = self.transport.clone();
        let key = self.conversation.key().clone();
        let settled_tx = self.settled_tx.clone();
        tokio::spawn(async move {
            let result = transport.send(&key, &outbound.text).await;
            let _ = settled_tx.send(Settled::Send {
                pending: outbound.pending,
                result,
            });
        });
        true
    }

    fn on_stream_signal(&mut self, signal: StreamSignal) {
        match signal {
            StreamSignal::Opened => {
                let reconnect = self.conversation.stream_opened();
                self.emit(Level::INFO, "stream.opened", None, None, None);
                if reconnect && self.options.resync_on_reconnect {
                    self.spawn_resync();
                }
            }
            StreamSignal::Message(message) => {
                let id = message.id.clone();
                let action = self.conversation.ingest(message);
                debug!(
                    "stream message {} -> {action:?}",
                    id.as_deref().unwrap_or("-")
                );
            }
            StreamSignal::Lost(reason) => {
                self.conversation.stream_lost();
                self.emit(
                    Level::WARN,
                    "stream.lost",
                    None,
                    Some("STREAM_FAILURE"),
                    Some(&reason),
                );
            }
        }
    }

    fn spawn_resync(&self) {
        let transport = self.transport.clone();
        let key = self.conversation.key().clone();
        let settled_tx = self.settled_tx.clone();
        tokio::spawn(async move {
            let result = transport.fetch_history(&key).await;
            let _ = settled_tx.send(Settled::Resync(result));
        });
    }

    fn on_settled(&mut self, settled: Settled) {
        match settled {
            Settled::Send {
                pending,
                result: Ok(outcome),
            } => {
                let record_id = outcome.record.as_ref().and_then(|m| m.id.clone());
                self.conversation.on_send_succeeded(&pending, outcome);
                debug!(
                    "send {} confirmed as {}",
                    pending.temp_id(),
                    record_id.as_deref().unwrap_or("-")
                );
            }
            Settled::Send {
                pending,
                result: Err(e),
            } => {
                self.emit(
                    Level::WARN,
                    "send.failed",
                    Some(pending.temp_id()),
                    Some(e.code()),
                    Some(&e.to_string()),
                );
                if self.conversation.on_send_failed(&pending, &e) {
                    self.emit(
                        Level::INFO,
                        "send.rolled_back",
                        Some(pending.temp_id()),
                        None,
                        None,
                    );
                }
            }
            Settled::Resync(result) => self.apply_history(result, true),
        }
    }

    fn apply_history(&mut self, result: Result<Vec<Message>, SyncError>, resync: bool) {
        match result {
            Ok(messages) => {
                let fetched = messages.len();
                let added = self.conversation.load_history(messages);
                info!("history: {added} new of {fetched} fetched (resync={resync})");
                let detail = format!("fetched={fetched} rendered={added} resync={resync}");
                self.emit(Level::INFO, "history.loaded", None, None, Some(&detail));
            }
            Err(e) => {
                self.emit(
                    Level::WARN,
                    "history.failed",
                    None,
                    Some(e.code()),
                    Some(&e.to_string()),
                );
            }
        }
    }

    fn emit(
        &self,
        level: Level,
        event: &str,
        message_id: Option<&str>,
        error_code: Option<&str>,
        detail: Option<&str>,
    ) {
        let status = self.conversation.status().label();
        emit_event(
            level,
            self.options.process,
            session_event(
                self.conversation.key(),
                status,
                event,
                message_id,
                error_code,
                detail,
            ),
        );
    }
}

fn session_event<'a>(
    key: &'a ConversationKey,
    status: &'a str,
    event: &'a str,
    message_id: Option<&'a str>,
    error_code: Option<&'a str>,
    detail: Option<&'a str>,
) -> ObservabilityEvent<'a> {
    ObservabilityEvent {
        event,
        component: "session",
        session_id: Some(&key.session_id),
        player_id: Some(&key.player_id),
        message_id,
        status: Some(status),
        error_code,
        detail,
    }
}

/// Spawn a runner on the current runtime.
pub fn spawn_session<S>(
    transport: Arc<dyn ChatTransport>,
    conversation: Conversation<S>,
    options: SessionOptions,
) -> (SessionHandle, JoinHandle<Conversation<S>>)
where
    S: PresentationSink + 'static,
{
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let runner = SessionRunner::new(transport, conversation, options);
    let task = tokio::spawn(runner.run(rx));
    (SessionHandle::new(tx), task)
}

/// Fetch history once into `conversation` without opening the live stream.
pub async fn load_history_once<S: PresentationSink>(
    transport: &dyn ChatTransport,
    conversation: &mut Conversation<S>,
) -> Result<usize, SyncError> {
    let messages = transport.fetch_history(conversation.key()).await?;
    let added = conversation.load_history(messages);
    Ok(added)
}
