//! Bootstrap File Server (§4.7): serves the bootstrap configuration on
//! first contact and the ephemeral `adopt/<token>` blobs used mid-adoption.
//!
//! `handle_request` is transport-independent and unit-tested directly; the
//! TCP loop below is a thin newline-delimited-JSON adapter standing in for
//! real TFTP opcode framing (§6 "[ADDED] Transport framing" — TFTP wire
//! framing itself is out of scope per §1).

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use crate::adopters::Adopter;
use crate::domain::device::DeviceState;
use crate::domain::driver::{BootstrapParams, DriverRegistry};
use crate::domain::ephemeral::EphemeralStore;
use crate::domain::store::DeviceStore;
use crate::domain::task::DeviceInitializationTask;
use crate::domain::Commander;
use crate::hooks::ready_hooks;

/// The two well-known bootstrap filenames (§4.7, §6) — identical behavior.
const BOOTSTRAP_FILENAMES: [&str; 2] = ["network-confg", "switch-confg"];

pub struct BootstrapFileServer {
    store: Arc<dyn DeviceStore>,
    commander: Arc<Commander>,
    driver_registry: Arc<DriverRegistry>,
    ephemeral_store: Arc<EphemeralStore>,
    bootstrap_params: BootstrapParams,
    default_device_class: String,
    adopter: Option<Arc<dyn Adopter>>,
}

impl BootstrapFileServer {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        commander: Arc<Commander>,
        driver_registry: Arc<DriverRegistry>,
        ephemeral_store: Arc<EphemeralStore>,
        bootstrap_params: BootstrapParams,
        default_device_class: String,
        adopter: Option<Arc<dyn Adopter>>,
    ) -> Self {
        Self {
            store,
            commander,
            driver_registry,
            ephemeral_store,
            bootstrap_params,
            default_device_class,
            adopter,
        }
    }

    /// Deterministic peer alias: `lc-<two-hex-digits>` from the low-order
    /// byte of the peer's IPv4 address (§4.7, §8 boundary behaviors).
    pub fn peer_alias(peer: Ipv4Addr) -> String {
        format!("lc-{:02x}", peer.octets()[3])
    }

    /// Serve `filename` requested by `peer` (dotted-quad IPv4 string).
    /// Never propagates errors — enqueue failures are absorbed so the TFTP
    /// response is never broken by them (§7).
    pub async fn handle_request(&self, filename: &str, peer: &str) -> String {
        if BOOTSTRAP_FILENAMES.contains(&filename) {
            return self.handle_bootstrap(peer).await;
        }
        if let Some(token) = filename.strip_prefix("adopt/") {
            return self.ephemeral_store.get(token).await.unwrap_or_default();
        }
        tracing::debug!(filename, peer, "bootstrap: unrecognized filename, ignoring");
        String::new()
    }

    async fn handle_bootstrap(&self, peer: &str) -> String {
        let Ok(peer_addr) = peer.parse::<Ipv4Addr>() else {
            tracing::warn!(peer, "bootstrap: peer address is not IPv4");
            return String::new();
        };
        let alias = Self::peer_alias(peer_addr);

        let device = match self
            .store
            .find_by_identifier_not_in_state(&alias, DeviceState::Configured)
            .await
        {
            Some(d) => d,
            None => {
                self.store
                    .create_new(alias.clone(), peer.to_string(), self.default_device_class.clone())
                    .await
            }
        };

        let driver = match self.driver_registry.get(&device.device_class) {
            Some(d) => d,
            None => {
                tracing::error!(device = %device.identifier, class = %device.device_class, "bootstrap: no driver registered for device class");
                return String::new();
            }
        };

        let rendered = match driver.emit_base_config(&device, &self.bootstrap_params) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(device = %device.identifier, error = %e, "bootstrap: failed to emit base config");
                String::new()
            }
        };

        let task = Arc::new(DeviceInitializationTask {
            device_id: device.id,
            driver,
            bootstrap: self.bootstrap_params.clone(),
            hooks: ready_hooks(self.adopter.clone()),
        });
        if let Err(e) = self.commander.enqueue(&device, task).await {
            tracing::warn!(device = %device.identifier, error = %e, "bootstrap: enqueue failed, serving config anyway");
        }

        rendered
    }

    /// Run the newline-delimited-JSON TCP listener until the process exits.
    pub async fn serve(self: Arc<Self>, bind: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(bind).await?;
        tracing::info!(bind, "bootstrap file server listening");
        loop {
            let (socket, _) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.serve_connection(socket).await {
                    tracing::debug!(error = %e, "bootstrap: connection error");
                }
            });
        }
    }

    async fn serve_connection(&self, socket: tokio::net::TcpStream) -> std::io::Result<()> {
        let (reader, mut writer) = socket.into_split();
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let reply = match serde_json::from_str::<BootstrapRequest>(&line) {
                Ok(req) => {
                    let payload = self.handle_request(&req.filename, &req.peer).await;
                    BootstrapReply { payload }
                }
                Err(e) => BootstrapReply {
                    payload: format!("bad request: {e}"),
                },
            };
            let mut out = serde_json::to_vec(&reply).unwrap_or_default();
            out.push(b'\n');
            writer.write_all(&out).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct BootstrapRequest {
    filename: String,
    peer: String,
}

#[derive(Debug, Serialize)]
struct BootstrapReply {
    payload: String,
}
