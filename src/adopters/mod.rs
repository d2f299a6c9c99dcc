//! Adopters: given a READY device, resolve the intended identity and
//! configuration, then enqueue a `DeviceConfigurationTask` (§4.6).
//!
//! Two variants ship, selected by `autoconf_mode`: [`opt82`] correlates via
//! DHCP Option-82 relay associations, [`cdp`] correlates via neighbor
//! discovery plus an external inventory lookup. Both share the firmware
//! whitelist check and `<autoconf_path>/<identity>.cfg` loading below.

pub mod cdp;
pub mod opt82;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::domain::device::Device;
use crate::domain::driver::{Driver, DriverRegistry};
use crate::domain::ephemeral::EphemeralStore;
use crate::domain::task::{ConfigurationArgs, DeviceConfigurationTask};
use crate::domain::Commander;

pub use cdp::{CdpAdopter, InventoryClient, ReqwestInventoryClient};
pub use opt82::Opt82Adopter;

/// Strategy that maps a READY device to a target identity and configuration,
/// wired as a hook on the `READY` state of a `DeviceInitializationTask`.
#[async_trait::async_trait]
pub trait Adopter: Send + Sync {
    async fn autoadopt(&self, device: &Device);
}

/// Firmware-version whitelist check (§4.6). An absent whitelist accepts
/// every version; otherwise `version` must start with one of the listed
/// prefixes.
pub fn version_allowed(version: &str, whitelist: &Option<Vec<String>>) -> bool {
    match whitelist {
        None => true,
        Some(prefixes) => prefixes.iter().any(|prefix| version.starts_with(prefix.as_str())),
    }
}

/// Load `<autoconf_path>/<identity>.cfg`, returning `None` (logged by the
/// caller) if it doesn't exist.
pub async fn load_configuration(autoconf_path: &Path, identity: &str) -> Option<String> {
    let path = autoconf_path.join(format!("{identity}.cfg"));
    tokio::fs::read_to_string(&path).await.ok()
}

/// Shared tail of both adopters once an identity has been resolved: load its
/// configuration file and enqueue a `DeviceConfigurationTask`. Returns
/// `false` (already logged by the caller producing `identity`) when nothing
/// was enqueued, so the two adopter implementations can emit a consistent
/// trace.
pub async fn adopt_with_identity(
    commander: &Commander,
    driver_registry: &DriverRegistry,
    ephemeral_store: &Arc<EphemeralStore>,
    autoconf_path: &Path,
    whitelist: &Option<Vec<String>>,
    device: &Device,
    identity: String,
) -> bool {
    if !version_allowed(&device.version, whitelist) {
        tracing::info!(
            device = %device.identifier, identity = %identity, version = %device.version,
            "device does not meet autoconf criteria (firmware version)"
        );
        return false;
    }

    let configuration = match load_configuration(autoconf_path, &identity).await {
        Some(c) => c,
        None => {
            tracing::error!(
                device = %device.identifier, identity = %identity,
                "failed to open autoconf config file for switch autoconfiguration"
            );
            return false;
        }
    };

    let driver: Arc<dyn Driver> = match driver_registry.get(&device.device_class) {
        Some(d) => d,
        None => {
            tracing::error!(device = %device.identifier, class = %device.device_class, "no driver registered for device class");
            return false;
        }
    };

    let task = Arc::new(DeviceConfigurationTask {
        device_id: device.id,
        driver,
        ephemeral_store: Arc::clone(ephemeral_store),
        args: ConfigurationArgs {
            identity,
            configuration,
        },
        hooks: HashMap::new(),
    });

    if let Err(e) = commander.enqueue(device, task).await {
        tracing::error!(device = %device.identifier, error = %e, "autoadopt enqueue failed");
        return false;
    }
    true
}
