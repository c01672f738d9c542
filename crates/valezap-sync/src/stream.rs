//! Live subscription supervisor.
//!
//! Keeps exactly one event stream open per conversation. When the stream
//! errors or closes it is dropped, and a new one is opened after a fixed delay
//! that never grows. Everything is reported to the owner over a channel.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use valezap_types::{ConversationKey, Message};

use crate::transport::ChatTransport;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    Opened,
    Message(Message),
    /// The stream failed or could not be opened; a retry is scheduled.
    Lost(String),
}

/// Handle to a running supervisor. Dropping it closes the stream.
#[derive(Debug)]
pub struct LiveSubscription {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LiveSubscription {
    pub fn spawn(
        transport: Arc<dyn ChatTransport>,
        conversation: ConversationKey,
        reconnect_delay: Duration,
        signals: mpsc::Sender<StreamSignal>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(
            transport,
            conversation,
            reconnect_delay,
            signals,
            cancel.clone(),
        ));
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Stop the supervisor and wait for it to release the stream.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn supervise(
    transport: Arc<dyn ChatTransport>,
    conversation: ConversationKey,
    reconnect_delay: Duration,
    signals: mpsc::Sender<StreamSignal>,
    cancel: CancellationToken,
) {
    loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            opened = transport.open_stream(&conversation) => opened,
        };

        let reason = match opened {
            Ok(mut stream) => {
                info!("live stream opened for {conversation}");
                if signals.send(StreamSignal::Opened).await.is_err() {
                    return;
                }
                loop {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => return,
                        item = stream.next() => item,
                    };
                    match item {
                        Some(Ok(message)) => {
                            if signals.send(StreamSignal::Message(message)).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => break e.to_string(),
                        None => break "event stream ended".to_string(),
                    }
                }
                // `stream` is dropped here, before the retry below.
            }
            Err(e) => e.to_string(),
        };

        warn!(
            "live stream for {conversation} lost: {reason}; retrying in {}ms",
            reconnect_delay.as_millis()
        );
        if signals.send(StreamSignal::Lost(reason)).await.is_err() {
            return;
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
        debug!("reopening live stream for {conversation}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::transport::{MessageStream, SendOutcome};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use valezap_types::Origin;

    type Script = Result<Vec<Result<Message, SyncError>>, SyncError>;

    /// Each `open_stream` pops the next script; an exhausted script pends.
    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Script>>,
        opens: AtomicUsize,
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn fetch_history(&self, _: &ConversationKey) -> Result<Vec<Message>, SyncError> {
            Ok(Vec::new())
        }

        async fn send(&self, _: &ConversationKey, _: &str) -> Result<SendOutcome, SyncError> {
            Ok(SendOutcome::default())
        }

        async fn open_stream(&self, _: &ConversationKey) -> Result<MessageStream, SyncError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let next = self.scripts.lock().unwrap().pop_front();
            let stream: MessageStream = match next {
                Some(Ok(items)) => Box::pin(futures_util::stream::iter(items)),
                Some(Err(e)) => return Err(e),
                None => Box::pin(futures_util::stream::pending::<Result<Message, SyncError>>()),
            };
            Ok(stream)
        }
    }

    fn conv() -> ConversationKey {
        ConversationKey::new("s1", "p1")
    }

    fn msg(id: &str) -> Message {
        Message::confirmed(id, conv(), "hi", Origin::Assistant)
    }

    #[tokio::test]
    async fn reconnects_after_failures_with_fixed_delay() {
        let transport = Arc::new(ScriptedTransport {
            scripts: Mutex::new(VecDeque::from(vec![
                Err(SyncError::Stream("refused".into())),
                Ok(vec![Ok(msg("m1")), Err(SyncError::Stream("reset".into()))]),
            ])),
            opens: AtomicUsize::new(0),
        });
        let (tx, mut rx) = mpsc::channel(16);
        let sub = LiveSubscription::spawn(
            transport.clone(),
            conv(),
            Duration::from_millis(10),
            tx,
        );

        let mut seen = Vec::new();
        while seen.len() < 5 {
            seen.push(rx.recv().await.unwrap());
        }
        assert!(matches!(seen[0], StreamSignal::Lost(_)));
        assert_eq!(seen[1], StreamSignal::Opened);
        assert_eq!(seen[2], StreamSignal::Message(msg("m1")));
        assert!(matches!(seen[3], StreamSignal::Lost(_)));
        assert_eq!(seen[4], StreamSignal::Opened);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 3);

        sub.close().await;
    }

    #[tokio::test]
    async fn close_stops_reopening() {
        let transport = Arc::new(ScriptedTransport {
            scripts: Mutex::new(VecDeque::new()),
            opens: AtomicUsize::new(0),
        });
        let (tx, mut rx) = mpsc::channel(4);
        let sub = LiveSubscription::spawn(transport.clone(), conv(), Duration::from_millis(5), tx);
        assert_eq!(rx.recv().await, Some(StreamSignal::Opened));

        sub.close().await;
        assert_eq!(rx.recv().await, None);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
    }
}
