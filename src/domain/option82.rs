//! DHCP Option-82 relay association tracking.

use serde::{Deserialize, Serialize};

use crate::domain::value_objects::Option82Id;

/// A recorded correlation between an upstream relay port and the MAC/name of
/// whatever downstream switch last reported through it.
///
/// Uniqueness invariants (§3): at most one row per
/// `(upstream_switch_mac, upstream_port_info)`; at most one row may hold a
/// given non-null `downstream_switch_mac` at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Option82Association {
    pub id: Option82Id,
    pub upstream_switch_mac: String,
    pub upstream_port_info: String,
    pub downstream_switch_mac: Option<String>,
    pub downstream_switch_name: Option<String>,
}

impl Option82Association {
    pub fn new(
        id: Option82Id,
        upstream_switch_mac: String,
        upstream_port_info: String,
    ) -> Self {
        Self {
            id,
            upstream_switch_mac: upstream_switch_mac.to_lowercase(),
            upstream_port_info: upstream_port_info.to_lowercase(),
            downstream_switch_mac: None,
            downstream_switch_name: None,
        }
    }
}
