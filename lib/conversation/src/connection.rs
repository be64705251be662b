//! Live client connections and their protocol loops.
//!
//! Each connection runs two loops. The inbound loop reads frames from the
//! transport and hands user messages to the [`MessageService`]; the outbound
//! loop drains the connection's mailbox onto the transport and keeps the
//! link alive. Either loop that hits a terminal condition unregisters the
//! connection; the other notices (closed mailbox or Closing/Closed state)
//! and exits on its own.
//!
//! The loops are generic over a [`Stream`] and a [`Sink`] of [`Frame`]s so
//! any framed transport can drive them.

use crate::error::ConversationError;
use crate::hub::Hub;
use crate::message::MessageType;
use crate::service::MessageService;
use courier_core::{ConnectionId, ConversationId, UserId};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, instrument, warn};

/// Idle period after which the outbound loop sends a ping.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(54);

/// Default capacity of a connection's outbound mailbox.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Upper bound on queued items coalesced into one write.
const MAX_BATCH: usize = 64;

/// How long a closing transport gets to accept the close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Sending half of a connection's mailbox. Held only by the hub.
pub type MailboxSender = mpsc::Sender<Arc<str>>;

/// Receiving half of a connection's mailbox. Held by the outbound loop.
pub type MailboxReceiver = mpsc::Receiver<Arc<str>>;

/// Lifecycle of a connection. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Upgraded but not yet registered.
    Connecting,
    /// Registered and receiving fan-out.
    Active,
    /// A loop hit a terminal condition; teardown in progress.
    Closing,
    /// Removed from the hub; mailbox closed.
    Closed,
}

impl ConnectionState {
    /// Returns true once teardown has begun.
    #[must_use]
    pub fn is_terminating(self) -> bool {
        self >= Self::Closing
    }
}

/// A live client connection.
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    conversation_id: Option<ConversationId>,
    state: watch::Sender<ConnectionState>,
}

impl Connection {
    /// Creates a connection and its bounded mailbox.
    #[must_use]
    pub fn open(
        user_id: UserId,
        conversation_id: Option<ConversationId>,
        mailbox_capacity: usize,
    ) -> (Arc<Self>, MailboxSender, MailboxReceiver) {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let connection = Arc::new(Self {
            id: ConnectionId::new(),
            user_id,
            conversation_id,
            state,
        });
        (connection, tx, rx)
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The user this connection belongs to.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Conversation bound at upgrade time, if any.
    #[must_use]
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribes to lifecycle changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Moves to `next` if it is later than the current state.
    ///
    /// Returns true if the state changed.
    pub fn transition(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        })
    }
}

/// A transport frame, independent of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete text frame.
    Text(String),
    /// Liveness check.
    Ping,
    /// Liveness answer.
    Pong,
    /// Close request.
    Close,
}

/// Envelope of a client-to-server frame.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    /// Frame kind; only `"message"` is acted on.
    #[serde(rename = "type")]
    pub kind: String,
    /// Message text.
    #[serde(default)]
    pub content: String,
    /// Channel the client is writing from.
    #[serde(default)]
    pub channel_id: String,
}

/// Reads frames until the transport ends or the connection starts closing.
///
/// Malformed frames are logged and skipped. On exit the connection is
/// unregistered.
#[instrument(skip_all, fields(connection_id = %connection.id(), user_id = %connection.user_id()))]
pub async fn run_inbound<S, E>(
    connection: Arc<Connection>,
    mut frames: S,
    hub: Hub,
    service: Arc<MessageService>,
) where
    S: Stream<Item = Result<Frame, E>> + Unpin + Send,
    E: Display,
{
    let mut state = connection.subscribe_state();

    loop {
        let frame = tokio::select! {
            frame = frames.next() => frame,
            () = wait_until_terminating(&mut state) => {
                debug!("connection closing, inbound loop exits");
                break;
            }
        };

        match frame {
            None => {
                debug!("transport ended");
                break;
            }
            Some(Err(e)) => {
                let error = ConversationError::Connection {
                    reason: e.to_string(),
                };
                debug!(%error, "transport read failed");
                break;
            }
            Some(Ok(Frame::Close)) => {
                debug!("client sent close frame");
                break;
            }
            Some(Ok(Frame::Ping | Frame::Pong)) => {}
            Some(Ok(Frame::Text(text))) => handle_text(&connection, &service, &text).await,
        }
    }

    connection.transition(ConnectionState::Closing);
    hub.unregister(&connection).await;
}

async fn wait_until_terminating(state: &mut watch::Receiver<ConnectionState>) {
    loop {
        if state.borrow_and_update().is_terminating() {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

async fn handle_text(connection: &Connection, service: &MessageService, text: &str) {
    let envelope: InboundEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "discarding malformed frame");
            return;
        }
    };

    if envelope.kind != "message" {
        debug!(kind = %envelope.kind, "ignoring frame");
        return;
    }

    let Some(conversation_id) = connection.conversation_id() else {
        warn!("message frame on a connection without a conversation, discarded");
        return;
    };

    if let Err(report) = service
        .process_inbound_message(conversation_id, MessageType::Text, &envelope.content)
        .await
    {
        warn!(
            conversation_id = %conversation_id,
            channel_id = %envelope.channel_id,
            error = %report,
            "inbound message failed"
        );
    }
}

/// Drains the mailbox onto the transport until either side fails or the
/// connection is torn down.
///
/// Items already queued behind the first are coalesced into a single
/// newline-delimited text frame. After `keepalive` without outbound traffic
/// a ping is sent. Teardown interrupts a pending write and discards whatever
/// is still queued. On exit the connection is unregistered and the sink is
/// sent a close frame and closed, bounded by a short timeout.
#[instrument(skip_all, fields(connection_id = %connection.id(), user_id = %connection.user_id()))]
pub async fn run_outbound<K>(
    connection: Arc<Connection>,
    mut mailbox: MailboxReceiver,
    mut sink: K,
    hub: Hub,
    keepalive: Duration,
) where
    K: Sink<Frame> + Unpin + Send,
    K::Error: Display,
{
    let mut state = connection.subscribe_state();
    let mut idle = tokio::time::interval_at(Instant::now() + keepalive, keepalive);
    idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            biased;
            () = wait_until_terminating(&mut state) => {
                debug!("connection torn down, outbound loop exits");
                break;
            }
            item = mailbox.recv() => match item {
                Some(first) => Frame::Text(coalesce(&first, &mut mailbox)),
                None => {
                    debug!("mailbox closed");
                    break;
                }
            },
            _ = idle.tick() => Frame::Ping,
        };

        let is_traffic = matches!(frame, Frame::Text(_));
        let written = tokio::select! {
            result = sink.send(frame) => result,
            () = wait_until_terminating(&mut state) => {
                debug!("connection torn down during a write");
                break;
            }
        };
        if let Err(e) = written {
            let error = ConversationError::Connection {
                reason: e.to_string(),
            };
            debug!(%error, "transport write failed");
            break;
        }
        if is_traffic {
            idle.reset();
        }
    }

    connection.transition(ConnectionState::Closing);
    hub.unregister(&connection).await;
    drop(mailbox);

    let farewell = async {
        let _ = sink.send(Frame::Close).await;
        let _ = sink.close().await;
    };
    if tokio::time::timeout(CLOSE_TIMEOUT, farewell).await.is_err() {
        debug!("transport did not close in time, abandoned");
    }
}

fn coalesce(first: &str, mailbox: &mut MailboxReceiver) -> String {
    let mut batch = String::from(first);
    for _ in 1..MAX_BATCH {
        let Ok(next) = mailbox.try_recv() else {
            break;
        };
        batch.push('\n');
        batch.push_str(&next);
    }
    batch
}
