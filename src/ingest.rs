//! Ingest Listener (§4.8): a long-running consumer of Option-82 relay
//! reports pushed over a message bus. `handle_message` is transport-
//! independent and unit-tested directly; `run` subscribes over `async-nats`
//! core pub/sub (fire-and-forget, no JetStream persistence — §6 "[ADDED]
//! Transport framing").

use std::sync::Arc;

use futures::StreamExt;
use serde::Deserialize;

use crate::domain::store::DeviceStore;

#[derive(Debug, Deserialize)]
struct Option82Message {
    upstream_switch_mac: Option<String>,
    upstream_port_info: Option<String>,
    downstream_switch_mac: Option<String>,
}

pub struct IngestListener {
    store: Arc<dyn DeviceStore>,
}

impl IngestListener {
    pub fn new(store: Arc<dyn DeviceStore>) -> Arc<Self> {
        Arc::new(Self { store })
    }

    /// Parse and apply one raw message body. Missing fields are logged and
    /// dropped (§4.8); all three strings are lowercased by `update_info`.
    pub async fn handle_message(&self, payload: &[u8]) {
        let message: Option82Message = match serde_json::from_slice(payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "ingest: malformed option82 message, dropping");
                return;
            }
        };

        let (usm, usp, dsm) = match (
            message.upstream_switch_mac,
            message.upstream_port_info,
            message.downstream_switch_mac,
        ) {
            (Some(usm), Some(usp), Some(dsm)) => (usm, usp, dsm),
            _ => {
                tracing::warn!("ingest: incomplete option82 message, dropping");
                return;
            }
        };

        if let Err(e) = self.store.update_info(&usm, &usp, &dsm).await {
            tracing::error!(error = %e, "ingest: failed to update option82 association");
        }
    }

    /// Connect to `nats_url` and consume `subject` until the connection
    /// drops or the process exits.
    pub async fn run(self: Arc<Self>, nats_url: &str, subject: &str) -> Result<(), async_nats::Error> {
        let client = async_nats::connect(nats_url).await?;
        let mut subscriber = client.subscribe(subject.to_string()).await?;
        tracing::info!(nats_url, subject, "ingest listener subscribed");
        while let Some(message) = subscriber.next().await {
            self.handle_message(&message.payload).await;
        }
        Ok(())
    }
}
