//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bus client facade for ONQL modules."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! The [`Sdk`] facade: request/reply, broadcast responses, subscriptions and
//! lifecycle hooks for one module on the bus.
//!
//! ```no_run
//! use onql_common::SdkConfig;
//! use onql_sdk::{Message, Response, Sdk};
//!
//! # async fn run() -> onql_sdk::Result<()> {
//! let sdk = Sdk::new(SdkConfig::default());
//! sdk.on_active(|| tracing::info!("module active"));
//! sdk.initialize("billing").await?;
//! sdk.subscribe("onql.billing", |msg: Message| Response::ok(format!("handled {}", msg.command)))
//!     .await?;
//! let reply = sdk.request("onql.store", &Message::new("ping", "")).await?;
//! assert!(reply.is_ok());
//! sdk.wait().await;
//! sdk.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use onql_common::SdkConfig;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::lifecycle::{LifecycleEvent, LifecycleHooks};
use crate::logging::{log_message, log_response, MessageDirection, SdkMetrics};
use crate::nats::NatsConnector;
use crate::subject::{validate_pattern, validate_subject, Subjects};
use crate::transport::{Bus, Connector, Inbound, Subscription};
use crate::types::{decode, encode, Message, Response};
use crate::{Result, SdkError};

/// Synchronous request handler invoked once per inbound message.
pub type Handler = Arc<dyn Fn(Message) -> Response + Send + Sync>;

/// Identifies a subscription registered through [`Sdk::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Why [`Sdk::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The facade was not initialized when the wait started.
    NotInitialized,
    /// [`Sdk::shutdown`] was called.
    Shutdown,
    /// The caller's cancellation token fired.
    Cancelled,
    /// SIGINT or SIGTERM was received.
    Signal,
}

struct SubscriptionTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SubscriptionTask {
    /// Cancel the worker and wait until it has dropped its bus subscription.
    async fn stop(self, subject: &str) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            if err.is_panic() {
                warn!(subject, "subscription task panicked while stopping");
            }
        }
    }
}

struct Session {
    bus: Arc<dyn Bus>,
    subjects: Subjects,
    cancel: CancellationToken,
    subscriptions: Mutex<HashMap<SubscriptionId, SubscriptionTask>>,
}

impl Session {
    fn new(bus: Arc<dyn Bus>, subjects: Subjects) -> Self {
        Self {
            bus,
            subjects,
            cancel: CancellationToken::new(),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    async fn close(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = self
            .subscriptions
            .lock()
            .drain()
            .map(|(_, task)| task)
            .collect();
        for task in tasks {
            task.stop(self.subjects.base()).await;
        }
        if let Err(err) = self.bus.close().await {
            warn!(subject = self.subjects.base(), backend = self.bus.name(), error = %err, "failed to close bus connection");
        }
        info!(subject = self.subjects.base(), backend = self.bus.name(), "bus session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Bus client facade for one module.
///
/// Starts uninitialized; [`Sdk::initialize`] connects and
/// [`Sdk::shutdown`] disconnects. Every operation that needs the connection
/// fails with [`SdkError::NotInitialized`] outside that window.
pub struct Sdk {
    config: SdkConfig,
    connector: Arc<dyn Connector>,
    hooks: LifecycleHooks,
    session: RwLock<Option<Arc<Session>>>,
    running: watch::Sender<bool>,
    metrics: Option<Arc<SdkMetrics>>,
    next_subscription: AtomicU64,
}

impl Sdk {
    /// Create a facade that connects to NATS at `config.bus.url`.
    pub fn new(config: SdkConfig) -> Self {
        Self::with_connector(config, Arc::new(NatsConnector))
    }

    /// Create a facade that connects through a custom [`Connector`].
    pub fn with_connector(config: SdkConfig, connector: Arc<dyn Connector>) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            config,
            connector,
            hooks: LifecycleHooks::new(),
            session: RwLock::new(None),
            running,
            metrics: None,
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Attach Prometheus metrics.
    pub fn with_metrics(mut self, metrics: Arc<SdkMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.session.read().is_some()
    }

    /// Subjects owned by the current session.
    pub fn subjects(&self) -> Option<Subjects> {
        self.session
            .read()
            .as_ref()
            .map(|session| session.subjects.clone())
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.session.read().clone().ok_or(SdkError::NotInitialized)
    }

    /// Connect to the bus as module `<namespace>.<suffix>` and run the
    /// `install` then `active` hooks.
    ///
    /// Calling this again replaces the session: the new connection is opened
    /// first, then the previous one is closed along with its subscriptions.
    pub async fn initialize(&self, suffix: &str) -> Result<()> {
        let subjects = Subjects::new(&self.config.namespace, suffix)?;
        let bus = self.connector.connect(&self.config.bus).await?;
        info!(
            subject = subjects.base(),
            backend = bus.name(),
            endpoint = %self.config.bus.url,
            "sdk initialized"
        );

        let previous = self
            .session
            .write()
            .replace(Arc::new(Session::new(bus, subjects)));
        if let Some(previous) = previous {
            debug!(subject = previous.subjects.base(), "closing replaced session");
            previous.close().await;
        }
        self.running.send_replace(true);

        self.hooks.fire(LifecycleEvent::Install);
        self.hooks.fire(LifecycleEvent::Active);
        Ok(())
    }

    /// Send `message` to `subject` and await the reply.
    pub async fn request(&self, subject: &str, message: &Message) -> Result<Response> {
        let session = self.session()?;
        validate_subject(subject)?;
        log_message(MessageDirection::Outbound, subject, message);
        if let Some(metrics) = &self.metrics {
            metrics.observe_request();
        }

        let started = Instant::now();
        let result = async {
            let payload = encode(message)?;
            let reply = session
                .bus
                .request(subject, payload, self.config.bus.request_timeout)
                .await?;
            decode::<Response>(&reply)
        }
        .await;

        match &result {
            Ok(response) => {
                debug!(subject, status = %response.status, "reply received");
                if let Some(metrics) = &self.metrics {
                    metrics.observe_latency(started.elapsed());
                }
            }
            Err(err) => {
                debug!(subject, command = %message.command, error = %err, "request failed");
                if let Some(metrics) = &self.metrics {
                    metrics.observe_request_failure();
                }
            }
        }
        result
    }

    /// Broadcast `response` on `<module>.response`.
    ///
    /// This does not reply to the sender of `original`; use a subscription
    /// handler for point-to-point replies. Failures are logged, not returned.
    pub async fn respond(&self, original: &Message, response: &Response) {
        let session = match self.session() {
            Ok(session) => session,
            Err(err) => {
                error!(command = %original.command, error = %err, "failed to respond");
                return;
            }
        };

        let subject = session.subjects.response();
        let outcome = match encode(response) {
            Ok(payload) => session.bus.publish(&subject, payload).await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(()) => {
                log_response(&subject, response);
                if let Some(metrics) = &self.metrics {
                    metrics.observe_response_published();
                }
            }
            Err(err) => {
                error!(%subject, command = %original.command, error = %err, "failed to respond");
            }
        }
    }

    /// Answer every request arriving on `subject` with `handler`.
    ///
    /// The reply goes to the reply address carried by each inbound message.
    /// Handlers run on the subscription's task and should not block for long.
    pub async fn subscribe<F>(&self, subject: &str, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(Message) -> Response + Send + Sync + 'static,
    {
        let session = self.session()?;
        validate_pattern(subject)?;
        let stream = session.bus.subscribe(subject).await?;

        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let worker = SubscriptionWorker {
            pattern: subject.to_owned(),
            bus: session.bus.clone(),
            handler: Arc::new(handler),
            metrics: self.metrics.clone(),
        };
        let cancel = session.cancel.child_token();
        let handle = tokio::spawn(worker.run(stream, cancel.clone()));
        session
            .subscriptions
            .lock()
            .insert(id, SubscriptionTask { cancel, handle });
        info!(subject, %id, "subscription registered");
        Ok(id)
    }

    /// Stop a subscription. Returns `false` if it was not active.
    ///
    /// Once this returns the bus no longer routes messages to the
    /// subscription. A request already being handled is answered first.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Ok(session) = self.session() else {
            return false;
        };
        let task = session.subscriptions.lock().remove(&id);
        match task {
            Some(task) => {
                task.stop(session.subjects.base()).await;
                info!(%id, "subscription removed");
                true
            }
            None => false,
        }
    }

    pub fn on_install<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.set(LifecycleEvent::Install, hook);
    }

    pub fn on_uninstall<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.set(LifecycleEvent::Uninstall, hook);
    }

    pub fn on_delete<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.set(LifecycleEvent::Delete, hook);
    }

    pub fn on_active<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.set(LifecycleEvent::Active, hook);
    }

    /// Run the hook registered for `event`, as requested by the module's
    /// lifecycle manager. Returns whether a hook was registered.
    pub fn fire(&self, event: LifecycleEvent) -> bool {
        self.hooks.fire(event)
    }

    pub fn hooks(&self) -> &LifecycleHooks {
        &self.hooks
    }

    /// Block until [`Sdk::shutdown`] is called or a termination signal arrives.
    pub async fn wait(&self) -> WaitOutcome {
        self.wait_with(CancellationToken::new()).await
    }

    /// Like [`Sdk::wait`], additionally returning when `cancel` fires.
    pub async fn wait_with(&self, cancel: CancellationToken) -> WaitOutcome {
        let mut running = self.running.subscribe();
        if !*running.borrow_and_update() {
            return WaitOutcome::NotInitialized;
        }
        let stopped = async move {
            while *running.borrow_and_update() {
                if running.changed().await.is_err() {
                    break;
                }
            }
        };
        tokio::select! {
            _ = stopped => WaitOutcome::Shutdown,
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
            _ = shutdown_signal() => WaitOutcome::Signal,
        }
    }

    /// Close the connection and every subscription, then release waiters.
    /// Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let session = self.session.write().take();
        if let Some(session) = session {
            session.close().await;
        }
        self.running.send_replace(false);
    }
}

struct SubscriptionWorker {
    pattern: String,
    bus: Arc<dyn Bus>,
    handler: Handler,
    metrics: Option<Arc<SdkMetrics>>,
}

impl SubscriptionWorker {
    async fn run(self, mut stream: Subscription, cancel: CancellationToken) {
        loop {
            let inbound = tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(inbound) => inbound,
                    None => break,
                },
            };
            self.serve(inbound).await;
        }
        debug!(subject = %self.pattern, "subscription stopped");
    }

    async fn serve(&self, inbound: Inbound) {
        let response = match decode::<Message>(&inbound.payload) {
            Ok(message) => {
                log_message(MessageDirection::Inbound, &inbound.subject, &message);
                self.invoke(message)
            }
            Err(err) => {
                warn!(subject = %inbound.subject, error = %err, "dropping malformed request");
                if let Some(metrics) = &self.metrics {
                    metrics.observe_decode_failure();
                }
                Response::error(format!("malformed request: {}", err))
            }
        };

        let Some(reply_to) = inbound.reply else {
            debug!(subject = %inbound.subject, "inbound message has no reply address");
            return;
        };
        let outcome = match encode(&response) {
            Ok(payload) => self.bus.publish(&reply_to, payload).await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(()) => {
                log_response(&reply_to, &response);
                if let Some(metrics) = &self.metrics {
                    metrics.observe_reply_sent();
                }
            }
            Err(err) => {
                warn!(subject = %inbound.subject, reply_to = %reply_to, error = %err, "failed to send reply");
            }
        }
    }

    fn invoke(&self, message: Message) -> Response {
        let command = message.command.clone();
        match std::panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(message))) {
            Ok(response) => response,
            Err(_) => {
                error!(subject = %self.pattern, %command, "subscription handler panicked");
                Response::error(format!("handler for '{}' panicked", command))
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "unable to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
