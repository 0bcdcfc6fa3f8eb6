//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bus abstraction and the in-process bus backend."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use onql_common::BusConfig;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::subject::subject_matches;
use crate::{Result, SdkError};

/// Message delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Concrete subject the message was published on.
    pub subject: String,
    pub payload: Bytes,
    /// Address a direct reply should be published to, if the sender expects one.
    pub reply: Option<String>,
}

/// Stream of inbound messages. Dropping it ends the subscription.
pub type Subscription = BoxStream<'static, Inbound>;

/// Capabilities the SDK needs from a message bus connection.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish `payload` on `subject` and await a single reply.
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Bytes>;
    /// Fire-and-forget publish.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;
    /// Subscribe to a subject pattern.
    async fn subscribe(&self, subject: &str) -> Result<Subscription>;
    /// Flush pending writes and release the connection. Later calls on the
    /// same handle fail with [`SdkError::Closed`]; closing twice is a no-op.
    async fn close(&self) -> Result<()>;
    /// Human-readable backend name for logging.
    fn name(&self) -> &'static str;
}

/// Establishes [`Bus`] connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &BusConfig) -> Result<Arc<dyn Bus>>;
}

struct Route {
    connection: u64,
    pattern: String,
    sender: mpsc::UnboundedSender<Inbound>,
}

#[derive(Default)]
struct Hub {
    routes: RwLock<Vec<Route>>,
    next_connection: AtomicU64,
    open_connections: AtomicUsize,
    refuse_connections: AtomicBool,
}

impl Hub {
    fn route(&self, connection: u64, pattern: &str) -> mpsc::UnboundedReceiver<Inbound> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.routes.write().push(Route {
            connection,
            pattern: pattern.to_owned(),
            sender,
        });
        receiver
    }

    /// Deliver to every live matching route and return how many accepted it.
    fn deliver(&self, message: Inbound) -> usize {
        let mut delivered = 0;
        let mut stale = false;
        {
            let routes = self.routes.read();
            for route in routes.iter() {
                if !subject_matches(&route.pattern, &message.subject) {
                    continue;
                }
                if route.sender.send(message.clone()).is_ok() {
                    delivered += 1;
                } else {
                    stale = true;
                }
            }
        }
        if stale {
            self.prune_closed();
        }
        delivered
    }

    fn prune_closed(&self) {
        self.routes.write().retain(|route| !route.sender.is_closed());
    }

    fn drop_connection(&self, connection: u64) {
        self.routes
            .write()
            .retain(|route| route.connection != connection);
    }
}

/// In-process bus shared by every connection created from it.
///
/// Implements NATS subject semantics (`*` and `>` wildcards, inbox-based
/// request/reply, "no responders" when nobody listens) without a server.
#[derive(Clone, Default)]
pub struct LocalBus {
    hub: Arc<Hub>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection to the bus.
    pub fn connection(&self) -> Result<LocalConnection> {
        if self.hub.refuse_connections.load(Ordering::SeqCst) {
            return Err(SdkError::Connection {
                endpoint: "local".into(),
                reason: "local bus is refusing connections".into(),
            });
        }
        let id = self.hub.next_connection.fetch_add(1, Ordering::Relaxed);
        self.hub.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(LocalConnection {
            id,
            hub: self.hub.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Make subsequent connection attempts fail, e.g. to exercise startup errors.
    pub fn refuse_connections(&self, refuse: bool) {
        self.hub.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Number of connections that have not been closed.
    pub fn open_connections(&self) -> usize {
        self.hub.open_connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for LocalBus {
    async fn connect(&self, _config: &BusConfig) -> Result<Arc<dyn Bus>> {
        Ok(Arc::new(self.connection()?))
    }
}

/// One client connection to a [`LocalBus`].
pub struct LocalConnection {
    id: u64,
    hub: Arc<Hub>,
    closed: AtomicBool,
}

impl LocalConnection {
    fn release(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.hub.drop_connection(self.id);
            self.hub.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(SdkError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        self.release();
    }
}

fn receiver_stream(receiver: mpsc::UnboundedReceiver<Inbound>) -> Subscription {
    stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|message| (message, receiver))
    })
    .boxed()
}

#[async_trait]
impl Bus for LocalConnection {
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Bytes> {
        self.ensure_open()?;
        let inbox = format!("_INBOX.{}", Uuid::new_v4().simple());
        let mut replies = self.hub.route(self.id, &inbox);

        let delivered = self.hub.deliver(Inbound {
            subject: subject.to_owned(),
            payload,
            reply: Some(inbox),
        });
        if delivered == 0 {
            drop(replies);
            self.hub.prune_closed();
            return Err(SdkError::NoResponders {
                subject: subject.to_owned(),
            });
        }

        let outcome = tokio::time::timeout(timeout, replies.recv()).await;
        drop(replies);
        self.hub.prune_closed();
        match outcome {
            Ok(Some(reply)) => Ok(reply.payload),
            Ok(None) => Err(SdkError::Closed),
            Err(_) => Err(SdkError::Timeout {
                subject: subject.to_owned(),
            }),
        }
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.hub.deliver(Inbound {
            subject: subject.to_owned(),
            payload,
            reply: None,
        });
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription> {
        self.ensure_open()?;
        Ok(receiver_stream(self.hub.route(self.id, subject)))
    }

    async fn close(&self) -> Result<()> {
        self.release();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
