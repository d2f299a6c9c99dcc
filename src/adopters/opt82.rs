//! Opt82 Adopter: resolves identity from a recorded Option-82 relay
//! association (§4.6). Grounded on `lib/option82.py`'s `autoadopt` in the
//! original implementation — including the fix for that module's bug, noted
//! in §9, where one variant tested `association is None` against the wrong
//! binding and always found nothing.

use std::path::PathBuf;
use std::sync::Arc;

use crate::adopters::{adopt_with_identity, Adopter};
use crate::domain::device::Device;
use crate::domain::driver::DriverRegistry;
use crate::domain::ephemeral::EphemeralStore;
use crate::domain::store::DeviceStore;
use crate::domain::Commander;

pub struct Opt82Adopter {
    store: Arc<dyn DeviceStore>,
    commander: Arc<Commander>,
    driver_registry: Arc<DriverRegistry>,
    ephemeral_store: Arc<EphemeralStore>,
    autoconf_path: PathBuf,
    whitelist: Option<Vec<String>>,
}

impl Opt82Adopter {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        commander: Arc<Commander>,
        driver_registry: Arc<DriverRegistry>,
        ephemeral_store: Arc<EphemeralStore>,
        autoconf_path: PathBuf,
        whitelist: Option<Vec<String>>,
    ) -> Self {
        Self {
            store,
            commander,
            driver_registry,
            ephemeral_store,
            autoconf_path,
            whitelist,
        }
    }
}

#[async_trait::async_trait]
impl Adopter for Opt82Adopter {
    async fn autoadopt(&self, device: &Device) {
        let association = match self
            .store
            .find_association_by_downstream_mac(device.mac_address.as_str())
            .await
        {
            Some(a) => a,
            None => {
                tracing::info!(device = %device.identifier, address = %device.address, "opt82: could not find association");
                return;
            }
        };

        let identity = match association.downstream_switch_name {
            Some(name) => name,
            None => {
                tracing::info!(device = %device.identifier, "opt82: association has no downstream_switch_name");
                return;
            }
        };

        tracing::info!(device = %device.identifier, identity = %identity, "opt82: trying autoadopt");
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
