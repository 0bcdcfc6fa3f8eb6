//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "NATS bus backend."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_nats::client::RequestErrorKind;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use onql_common::BusConfig;
use tracing::{debug, info};

use crate::transport::{Bus, Connector, Inbound, Subscription};
use crate::{Result, SdkError};

/// Connects to a NATS server using the `async-nats` client.
#[derive(Debug, Clone, Copy, Default)]
pub struct NatsConnector;

#[async_trait]
impl Connector for NatsConnector {
    async fn connect(&self, config: &BusConfig) -> Result<Arc<dyn Bus>> {
        let mut options = async_nats::ConnectOptions::new()
            .connection_timeout(config.connect_timeout)
            .request_timeout(Some(config.request_timeout));
        if let Some(name) = &config.connection_name {
            options = options.name(name.as_str());
        }

        let client = options
            .connect(config.url.as_str())
            .await
            .map_err(|err| SdkError::Connection {
                endpoint: config.url.clone(),
                reason: err.to_string(),
            })?;
        info!(endpoint = %config.url, "connected to nats");
        Ok(Arc::new(NatsBus::new(client)))
    }
}

/// [`Bus`] implementation over an `async_nats::Client`.
///
/// After [`Bus::close`] every call on this handle, and on its clones, fails
/// with [`SdkError::Closed`]. The underlying connection is released once the
/// bus and every subscription stream created from it have been dropped.
#[derive(Debug, Clone)]
pub struct NatsBus {
    client: async_nats::Client,
    closed: Arc<AtomicBool>,
}

impl NatsBus {
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            client,
            closed: Arc::new(AtomicBool::new(false)),
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

#[async_trait]
impl Bus for NatsBus {
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Bytes> {
        self.ensure_open()?;
        let pending = self.client.request(subject.to_owned(), payload);
        match tokio::time::timeout(timeout, pending).await {
            Ok(Ok(reply)) => Ok(reply.payload),
            Ok(Err(err)) => Err(match err.kind() {
                RequestErrorKind::TimedOut => SdkError::Timeout {
                    subject: subject.to_owned(),
                },
                RequestErrorKind::NoResponders => SdkError::NoResponders {
                    subject: subject.to_owned(),
                },
                _ => SdkError::Transport(err.to_string()),
            }),
            Err(_) => Err(SdkError::Timeout {
                subject: subject.to_owned(),
            }),
        }
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.client
            .publish(subject.to_owned(), payload)
            .await
            .map_err(|err| SdkError::Transport(err.to_string()))
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription> {
        self.ensure_open()?;
        let subscriber = self
            .client
            .subscribe(subject.to_owned())
            .await
            .map_err(|err| SdkError::Transport(err.to_string()))?;
        debug!(subject, "nats subscription registered");
        Ok(subscriber
            .map(|message| Inbound {
                subject: message.subject.to_string(),
                payload: message.payload,
                reply: message.reply.map(|reply| reply.to_string()),
            })
            .boxed())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.client
            .flush()
            .await
            .map_err(|err| SdkError::Transport(err.to_string()))
    }

    fn name(&self) -> &'static str {
        "nats"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn offline_bus() -> NatsBus {
        // Nothing listens on port 1; the client keeps retrying in the background.
        let client = async_nats::ConnectOptions::new()
            .retry_on_initial_connect()
            .connect("nats://127.0.0.1:1")
            .await
            .expect("lazy client");
        NatsBus::new(client)
    }

    #[tokio::test]
    async fn closed_bus_rejects_further_calls() {
        let bus = offline_bus().await;
        let clone = bus.clone();
        let _ = tokio::time::timeout(Duration::from_millis(100), bus.close()).await;

        assert!(matches!(
            bus.publish("onql.store", Bytes::new()).await,
            Err(SdkError::Closed)
        ));
        assert!(matches!(
            clone
                .request("onql.store", Bytes::new(), Duration::from_millis(50))
                .await,
            Err(SdkError::Closed)
        ));
        assert!(matches!(
            clone.subscribe("onql.>").await,
            Err(SdkError::Closed)
        ));
        assert!(bus.close().await.is_ok());
    }
}
