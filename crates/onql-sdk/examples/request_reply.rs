//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "example"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Two modules exchanging a request over the in-process bus."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use onql_common::SdkConfig;
use onql_sdk::{LocalBus, Message, Response, Sdk};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let bus = LocalBus::new();

    // Module "store" answers requests on its own subject.
    let store = Sdk::with_connector(SdkConfig::default(), Arc::new(bus.clone()));
    store.on_active(|| println!("store active"));
    store.initialize("store").await?;
    store
        .subscribe("onql.store", |message: Message| {
            Response::ok(format!("stored {}", message.args)).with_data(message.command)
        })
        .await?;

    // Module "billing" calls it.
    let billing = Sdk::with_connector(SdkConfig::default(), Arc::new(bus.clone()));
    billing.initialize("billing").await?;
    let reply = billing
        .request(
            "onql.store",
            &Message::new("put", "invoice-42").with_meta("tenant", "acme"),
        )
        .await?;
    println!(
        "billing received status={} message={} data={:?}",
        reply.status, reply.message, reply.data
    );

    billing.shutdown().await;
    store.shutdown().await;
    Ok(())
}
