//! CDP Adopter: resolves identity via `Driver::neighbor_info` plus an
//! external inventory lookup (§4.6). Grounded on `lib/cdp_adopter.py` in the
//! original implementation: neighbor dumps are split on `------` blocks,
//! `Device ID:` and `Interface: ..., Port ID (outgoing port): ...` are
//! extracted with regexes, and each remote device/interface pair is resolved
//! against the inventory's `interface` endpoint by matching `name` or
//! `description` against the remote interface and pulling a `liscain:<name>`
//! token out of `alias`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;

use crate::adopters::{adopt_with_identity, Adopter};
use crate::domain::device::Device;
use crate::domain::driver::{Driver, DriverRegistry};
use crate::domain::ephemeral::EphemeralStore;
use crate::domain::Commander;

/// A single interface record as returned by the external inventory's
/// `/interface?device_fqdn=...` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceRecord {
    pub name: Option<String>,
    pub description: Option<String>,
    pub alias: Option<String>,
}

/// Boundary to the external inventory HTTP service (`autoconf_cdp_jaspy_api`,
/// §6). A trait so the CDP resolution algorithm is unit-testable without a
/// live inventory server.
#[async_trait::async_trait]
pub trait InventoryClient: Send + Sync {
    async fn lookup_interfaces(&self, device_fqdn: &str) -> Vec<InterfaceRecord>;
}

/// `reqwest`-backed `InventoryClient` against a real `jaspy`-shaped API.
pub struct ReqwestInventoryClient {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestInventoryClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl InventoryClient for ReqwestInventoryClient {
    async fn lookup_interfaces(&self, device_fqdn: &str) -> Vec<InterfaceRecord> {
        let url = format!("{}/interface", self.base_url.trim_end_matches('/'));
        match self
            .client
            .get(&url)
            .query(&[("device_fqdn", device_fqdn)])
            .send()
            .await
        {
            Ok(resp) => resp.json::<Vec<InterfaceRecord>>().await.unwrap_or_default(),
            Err(e) => {
                tracing::error!(error = %e, device_fqdn, "cdp: inventory lookup failed");
                Vec::new()
            }
        }
    }
}

fn remote_device_regex() -> Regex {
    Regex::new(r"(?m)^Device ID: (?P<remote_device>.+?)$").unwrap()
}

fn remote_interface_regex() -> Regex {
    Regex::new(r"(?m)^Interface: (?P<local_interface>[^,]+),.*Port ID \(outgoing port\): (?P<remote_interface>.+)$").unwrap()
}

/// Parse a vendor-agnostic `neighbor_info(verbose=true)` dump into
/// `(remote_device, remote_interface)` pairs, one per `------`-delimited
/// block that contains a `Device ID:` line.
fn parse_neighbors(dump: &str) -> Vec<(String, String)> {
    let remote_device_re = remote_device_regex();
    let remote_interface_re = remote_interface_regex();
    dump.split("------")
        .filter(|block| block.contains("Device ID"))
        .filter_map(|block| {
            let block = block.trim_matches('-');
            let remote_device = remote_device_re.captures(block)?.name("remote_device")?.as_str().to_string();
            let remote_interface = remote_interface_re
                .captures(block)?
                .name("remote_interface")?
                .as_str()
                .trim()
                .to_string();
            Some((remote_device, remote_interface))
        })
        .collect()
}

/// Pull the `<name>` out of a `liscain:<name>` token in `alias`, if any.
fn liscain_alias(alias: &str) -> Option<String> {
    alias
        .split_whitespace()
        .find_map(|part| part.strip_prefix("liscain:").map(|name| name.to_string()))
}

pub struct CdpAdopter {
    commander: Arc<Commander>,
    driver_registry: Arc<DriverRegistry>,
    ephemeral_store: Arc<EphemeralStore>,
    inventory: Arc<dyn InventoryClient>,
    autoconf_path: PathBuf,
    whitelist: Option<Vec<String>>,
}

impl CdpAdopter {
    pub fn new(
        commander: Arc<Commander>,
        driver_registry: Arc<DriverRegistry>,
        ephemeral_store: Arc<EphemeralStore>,
        inventory: Arc<dyn InventoryClient>,
        autoconf_path: PathBuf,
        whitelist: Option<Vec<String>>,
    ) -> Self {
        Self {
            commander,
            driver_registry,
            ephemeral_store,
            inventory,
            autoconf_path,
            whitelist,
        }
    }

    async fn resolve_identity(&self, device: &Device, driver: &Arc<dyn Driver>) -> Option<String> {
        let dump = driver.neighbor_info(device);
        if dump == "unknown" {
            tracing::error!(device = %device.identifier, "cdp: neighbor_info transport failure");
            return None;
        }

        let mut candidates = HashSet::new();
        for (remote_device, remote_interface) in parse_neighbors(&dump) {
            tracing::info!(device = %device.identifier, remote_device = %remote_device, remote_interface = %remote_interface, "cdp: reverse lookup");
            for record in self.inventory.lookup_interfaces(&remote_device).await {
                let interface_matches = record.name.as_deref() == Some(remote_interface.as_str())
                    || record.description.as_deref() == Some(remote_interface.as_str());
                if !interface_matches {
                    continue;
                }
                if let Some(alias) = record.alias.as_deref().and_then(liscain_alias) {
                    candidates.insert(alias);
                }
            }
        }

        match candidates.len() {
            1 => {
                let identity = candidates.into_iter().next().unwrap();
                tracing::info!(device = %device.identifier, identity = %identity, "cdp: reverse switch CDP neighbors resolved");
                Some(identity)
            }
            0 => {
                tracing::error!(device = %device.identifier, "cdp: unable to find reverse switch CDP neighbors");
                None
            }
            _ => {
                tracing::error!(device = %device.identifier, candidates = ?candidates, "cdp: more than one result for reverse switch CDP neighbors");
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl Adopter for CdpAdopter {
    async fn autoadopt(&self, device: &Device) {
        let driver = match self.driver_registry.get(&device.device_class) {
            Some(d) => d,
            None => {
                tracing::error!(device = %device.identifier, class = %device.device_class, "cdp: no driver registered for device class");
                return;
            }
        };

        let Some(identity) = self.resolve_identity(device, &driver).await else {
            return;
        };

        adopt_with_identity(
            &self.commander,
            &self.driver_registry,
            &self.ephemeral_store,
            &self.autoconf_path,
            &self.whitelist,
            device,
            identity,
        )
        .await;
    }
}
