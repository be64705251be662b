//! The delivery hub.
//!
//! A single coordinator task owns the registry of live connections and does
//! all registration, unregistration and fan-out, in the order requests
//! arrive. Nothing else touches the registry, so it needs no lock. Producers
//! talk to the coordinator through a cloneable [`Hub`] handle.

use crate::connection::{Connection, ConnectionState, MailboxSender};
use crate::message::Message;
use courier_core::{ConnectionId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Default depth of the hub's request queue.
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

enum HubCommand {
    Register {
        connection: Arc<Connection>,
        mailbox: MailboxSender,
        done: oneshot::Sender<bool>,
    },
    Unregister {
        connection: Arc<Connection>,
        done: oneshot::Sender<()>,
    },
    SendToUser {
        user_id: UserId,
        payload: Arc<str>,
    },
    Broadcast {
        payload: Arc<str>,
    },
    OnlineUsers(oneshot::Sender<Vec<UserId>>),
    ConnectionCount(oneshot::Sender<usize>),
}

/// Handle to the hub coordinator.
///
/// Cheap to clone. The coordinator stops once every handle is dropped.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Starts a coordinator and returns a handle to it.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(command_buffer: usize) -> Self {
        let (commands, rx) = mpsc::channel(command_buffer.max(1));
        tokio::spawn(Coordinator::default().run(rx));
        Self { commands }
    }

    /// Adds a connection to its user's set and marks it active.
    ///
    /// Returns once the coordinator has applied the registration: true if
    /// the connection is live, false if it was already closing. Registering
    /// the same connection twice keeps the first registration.
    pub async fn register(&self, connection: Arc<Connection>, mailbox: MailboxSender) -> bool {
        let (done, applied) = oneshot::channel();
        self.submit(HubCommand::Register {
            connection,
            mailbox,
            done,
        })
        .await;
        applied.await.unwrap_or(false)
    }

    /// Removes a connection and closes its mailbox. No-op if already gone.
    ///
    /// Returns once the connection is `Closed`.
    pub async fn unregister(&self, connection: &Arc<Connection>) {
        let (done, applied) = oneshot::channel();
        self.submit(HubCommand::Unregister {
            connection: connection.clone(),
            done,
        })
        .await;
        if applied.await.is_err() {
            connection.transition(ConnectionState::Closed);
        }
    }

    /// Queues `message` on every live connection of `user_id`.
    ///
    /// A user with no connections is skipped silently.
    pub async fn send_to_user(&self, user_id: &UserId, message: &Message) {
        let Some(payload) = encode(message) else {
            return;
        };
        self.submit(HubCommand::SendToUser {
            user_id: user_id.clone(),
            payload,
        })
        .await;
    }

    /// Queues `message` on every live connection of every user.
    pub async fn broadcast_all(&self, message: &Message) {
        let Some(payload) = encode(message) else {
            return;
        };
        self.submit(HubCommand::Broadcast { payload }).await;
    }

    /// Users with at least one live connection.
    pub async fn online_users(&self) -> Vec<UserId> {
        let (reply, rx) = oneshot::channel();
        self.submit(HubCommand::OnlineUsers(reply)).await;
        rx.await.unwrap_or_default()
    }

    /// Total number of live connections.
    pub async fn connection_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.submit(HubCommand::ConnectionCount(reply)).await;
        rx.await.unwrap_or_default()
    }

    async fn submit(&self, command: HubCommand) {
        if self.commands.send(command).await.is_err() {
            warn!("hub coordinator stopped, request dropped");
        }
    }
}

fn encode(message: &Message) -> Option<Arc<str>> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!(message_id = %message.id, error = %e, "failed to encode message for delivery");
            None
        }
    }
}

struct Registration {
    connection: Arc<Connection>,
    mailbox: MailboxSender,
}

type ConnectionSet = HashMap<ConnectionId, Registration>;

#[derive(Default)]
struct Coordinator {
    registry: HashMap<UserId, ConnectionSet>,
}

impl Coordinator {
    async fn run(mut self, mut commands: mpsc::Receiver<HubCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                HubCommand::Register {
                    connection,
                    mailbox,
                    done,
                } => {
                    let _ = done.send(self.register(connection, mailbox));
                }
                HubCommand::Unregister { connection, done } => {
                    self.unregister(&connection);
                    let _ = done.send(());
                }
                HubCommand::SendToUser { user_id, payload } => {
                    let emptied = match self.registry.get_mut(&user_id) {
                        Some(set) => {
                            fan_out(set, &payload);
                            set.is_empty()
                        }
                        None => {
                            debug!(user_id = %user_id, "no live connections, message dropped");
                            false
                        }
                    };
                    if emptied {
                        self.registry.remove(&user_id);
                    }
                }
                HubCommand::Broadcast { payload } => {
                    self.registry.retain(|_, set| {
                        fan_out(set, &payload);
                        !set.is_empty()
                    });
                }
                HubCommand::OnlineUsers(reply) => {
                    let _ = reply.send(self.registry.keys().cloned().collect());
                }
                HubCommand::ConnectionCount(reply) => {
                    let _ = reply.send(self.registry.values().map(HashMap::len).sum());
                }
            }
        }
        debug!("hub coordinator stopped");
    }

    fn register(&mut self, connection: Arc<Connection>, mailbox: MailboxSender) -> bool {
        if connection.state().is_terminating() {
            debug!(connection_id = %connection.id(), "connection closed before registration");
            connection.transition(ConnectionState::Closed);
            return false;
        }

        let set = self.registry.entry(connection.user_id().clone()).or_default();
        if set.contains_key(&connection.id()) {
            return true;
        }

        connection.transition(ConnectionState::Active);
        info!(
            connection_id = %connection.id(),
            user_id = %connection.user_id(),
            "client connected"
        );
        set.insert(
            connection.id(),
            Registration {
                connection,
                mailbox,
            },
        );
        true
    }

    fn unregister(&mut self, connection: &Connection) {
        let user_id = connection.user_id();
        let removed = match self.registry.get_mut(user_id) {
            Some(set) => {
                let removed = set.remove(&connection.id()).is_some();
                if set.is_empty() {
                    self.registry.remove(user_id);
                }
                removed
            }
            None => false,
        };

        connection.transition(ConnectionState::Closed);
        if removed {
            info!(
                connection_id = %connection.id(),
                user_id = %user_id,
                "client disconnected"
            );
        }
    }
}

/// Offers `payload` to every connection in `set`, tearing down any whose
/// mailbox is full or closed. Never waits on a mailbox.
fn fan_out(set: &mut ConnectionSet, payload: &Arc<str>) {
    set.retain(|_, registration| match registration.mailbox.try_send(payload.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            let connection = &registration.connection;
            warn!(
                connection_id = %connection.id(),
                user_id = %connection.user_id(),
                "mailbox full, disconnecting slow client"
            );
            connection.transition(ConnectionState::Closing);
            connection.transition(ConnectionState::Closed);
            false
        }
        Err(TrySendError::Closed(_)) => {
            registration.connection.transition(ConnectionState::Closed);
            false
        }
    });
}
