//! Device aggregate and its lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::value_objects::{DeviceId, MacAddress};

/// Canonical device lifecycle states.
///
/// This is the corrected state set: `CONFIGURING` and `READY` are distinct
/// values (the prior implementation's enum aliased two states to the same
/// ordinal), and every terminal failure state is explicit rather than
/// reusing a neighboring state's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    New,
    Init,
    InitFailed,
    Ready,
    Configuring,
    ConfigureFailed,
    Configured,
}

impl DeviceState {
    /// States from which a `DeviceInitializationTask` may be enqueued.
    pub fn init_eligible(&self) -> bool {
        matches!(
            self,
            DeviceState::New
                | DeviceState::Init
                | DeviceState::InitFailed
                | DeviceState::Ready
                | DeviceState::ConfigureFailed
        )
    }

    /// States from which a `DeviceConfigurationTask` may be enqueued.
    pub fn configure_eligible(&self) -> bool {
        matches!(self, DeviceState::Ready | DeviceState::ConfigureFailed)
    }
}

/// A switch known to the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub identifier: String,
    pub address: String,
    pub device_class: String,
    pub device_type: String,
    pub version: String,
    pub mac_address: MacAddress,
    pub state: DeviceState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// A freshly-discovered device, as created by the Bootstrap File Server
    /// on first contact from an unknown peer. `device_type`, `version` and
    /// `mac_address` are unknown until a `DeviceInitializationTask` runs.
    pub fn new(id: DeviceId, identifier: String, address: String, device_class: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            identifier,
            address,
            device_class,
            device_type: crate::domain::value_objects::UNKNOWN.to_string(),
            version: crate::domain::value_objects::UNKNOWN.to_string(),
            mac_address: MacAddress::unknown(),
            state: DeviceState::New,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new state, stamping `updated_at`. Does not itself
    /// validate the transition — that is `Task::validate`'s job, so a
    /// device's state can also be driven directly by store-level repair
    /// operations without going through a Task.
    pub fn change_state(&mut self, state: DeviceState, now: DateTime<Utc>) {
        self.state = state;
        self.updated_at = now;
    }

    /// Rename the device's identifier. Rolls back to the previous value if
    /// `commit` reports a transport failure, per §7: an identity change that
    /// the switch itself rejected must not be recorded as if it succeeded.
    pub fn change_identity(&mut self, new_identifier: String, now: DateTime<Utc>, committed: bool) -> bool {
        if !committed {
            return false;
        }
        self.identifier = new_identifier;
        self.updated_at = now;
        true
    }

    /// Projection used by the Command RPC surface (§6).
    pub fn as_dict(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("id".to_string(), self.id.to_string());
        map.insert("identifier".to_string(), self.identifier.clone());
        map.insert("address".to_string(), self.address.clone());
        map.insert("device_class".to_string(), self.device_class.clone());
        map.insert("device_type".to_string(), self.device_type.clone());
        map.insert("version".to_string(), self.version.clone());
        map.insert("mac_address".to_string(), self.mac_address.to_string());
        map.insert("state".to_string(), format!("{:?}", self.state));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn new_device_starts_in_new_state_with_unknown_attributes() {
        let d = Device::new(DeviceId(1), "lc-0a000001".to_string(), "10.0.0.1".to_string(), "CiscoIOS".to_string(), now());
        assert_eq!(d.state, DeviceState::New);
        assert!(d.mac_address.is_unknown());
        assert_eq!(d.device_type, "UNKNOWN");
    }

    #[test]
    fn init_eligible_matches_spec_state_set() {
        assert!(DeviceState::New.init_eligible());
        assert!(DeviceState::Init.init_eligible());
        assert!(DeviceState::InitFailed.init_eligible());
        assert!(DeviceState::Ready.init_eligible());
        assert!(DeviceState::ConfigureFailed.init_eligible());
        assert!(!DeviceState::Configuring.init_eligible());
        assert!(!DeviceState::Configured.init_eligible());
    }

    #[test]
    fn configure_eligible_matches_spec_state_set() {
        assert!(DeviceState::Ready.configure_eligible());
        assert!(DeviceState::ConfigureFailed.configure_eligible());
        assert!(!DeviceState::New.configure_eligible());
        assert!(!DeviceState::Init.configure_eligible());
        assert!(!DeviceState::InitFailed.configure_eligible());
        assert!(!DeviceState::Configuring.configure_eligible());
        assert!(!DeviceState::Configured.configure_eligible());
    }

    #[test]
    fn change_identity_rolls_back_on_transport_failure() {
        let mut d = Device::new(DeviceId(1), "lc-0a000001".to_string(), "10.0.0.1".to_string(), "CiscoIOS".to_string(), now());
        let ok = d.change_identity("new-name".to_string(), now(), false);
        assert!(!ok);
        assert_eq!(d.identifier, "lc-0a000001");
    }

    #[test]
    fn change_identity_commits_on_success() {
        let mut d = Device::new(DeviceId(1), "lc-0a000001".to_string(), "10.0.0.1".to_string(), "CiscoIOS".to_string(), now());
        let ok = d.change_identity("new-name".to_string(), now(), true);
        assert!(ok);
        assert_eq!(d.identifier, "new-name");
    }
}
