//! Device Store: the single source of truth for Device and
//! Option82Association persistence.
//!
//! The database engine itself is out of scope; this module specifies the
//! contract as a trait and ships one reference implementation backed by an
//! `Arc<RwLock<...>>`-guarded table, mirroring the in-memory device cache the
//! teacher crate's `NetworkService` already keeps. Each operation takes the
//! lock only for its own duration — never across a Driver call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::device::{Device, DeviceState};
use crate::domain::errors::StoreError;
use crate::domain::option82::Option82Association;
use crate::domain::value_objects::{DeviceId, Option82Id};

/// Durable persistence of Device rows and Option-82 association rows.
///
/// Reads may race with writes across tasks: two successive reads of the
/// same row may observe different state because another worker just
/// committed. This is intentional (§4.1) — callers must tolerate it rather
/// than assume a stable snapshot.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn get_by_id(&self, id: DeviceId) -> Result<Device, StoreError>;

    /// The first device with this `identifier` whose state is not `excluded`.
    /// Used by the Bootstrap File Server so a re-request from an already
    /// CONFIGURED device is treated as a new init rather than reusing the
    /// finished row (§4.7).
    async fn find_by_identifier_not_in_state(
        &self,
        identifier: &str,
        excluded: DeviceState,
    ) -> Option<Device>;

    async fn list_all(&self) -> Vec<Device>;

    async fn create(&self, device: Device) -> Result<Device, StoreError>;

    /// Allocate a fresh id and create a `NEW` device for `identifier` at
    /// `address`, dispatched to `device_class`. Used by the Bootstrap File
    /// Server on first contact from a peer with no existing eligible row
    /// (§4.7).
    async fn create_new(&self, identifier: String, address: String, device_class: String) -> Device;

    async fn delete(&self, id: DeviceId) -> Result<(), StoreError>;

    /// Upsert: replaces the row with the same id, or inserts it.
    async fn merge(&self, device: Device) -> Result<Device, StoreError>;

    async fn get_association(&self, id: Option82Id) -> Result<Option82Association, StoreError>;

    async fn find_association_by_upstream(
        &self,
        upstream_switch_mac: &str,
        upstream_port_info: &str,
    ) -> Option<Option82Association>;

    async fn find_association_by_downstream_mac(
        &self,
        downstream_switch_mac: &str,
    ) -> Option<Option82Association>;

    async fn list_associations(&self) -> Vec<Option82Association>;

    async fn delete_association(&self, id: Option82Id) -> Result<(), StoreError>;

    /// Ingest a relay report (§3, §4.8): find or create the row for
    /// `(upstream_switch_mac, upstream_port_info)`; clear `downstream_switch_mac`
    /// on any *other* row currently holding the new MAC, then set it here.
    /// Idempotent — running the same report twice yields the same contents.
    async fn update_info(
        &self,
        upstream_switch_mac: &str,
        upstream_port_info: &str,
        downstream_switch_mac: &str,
    ) -> Result<Option82Association, StoreError>;

    /// Operator-driven association set (`opt82-info` RPC, §6): upsert by
    /// `(upstream_switch_mac, upstream_port_info)`, setting
    /// `downstream_switch_name`.
    async fn set_association(
        &self,
        upstream_switch_mac: &str,
        upstream_port_info: &str,
        downstream_switch_name: &str,
    ) -> Result<Option82Association, StoreError>;
}

/// Reference `DeviceStore` implementation. A real deployment could swap in a
/// SQL-backed implementation of the same trait without the rest of the
/// system changing.
pub struct InMemoryDeviceStore {
    devices: RwLock<HashMap<DeviceId, Device>>,
    associations: RwLock<HashMap<Option82Id, Option82Association>>,
    next_device_id: AtomicI64,
    next_association_id: AtomicI64,
}

impl InMemoryDeviceStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            devices: RwLock::new(HashMap::new()),
            associations: RwLock::new(HashMap::new()),
            next_device_id: AtomicI64::new(1),
            next_association_id: AtomicI64::new(1),
        })
    }

    pub fn next_device_id(&self) -> DeviceId {
        DeviceId(self.next_device_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for InMemoryDeviceStore {
    fn default() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            associations: RwLock::new(HashMap::new()),
            next_device_id: AtomicI64::new(1),
            next_association_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn get_by_id(&self, id: DeviceId) -> Result<Device, StoreError> {
        self.devices
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::DeviceNotFound(id))
    }

    async fn find_by_identifier_not_in_state(
        &self,
        identifier: &str,
        excluded: DeviceState,
    ) -> Option<Device> {
        self.devices
            .read()
            .await
            .values()
            .find(|d| d.identifier == identifier && d.state != excluded)
            .cloned()
    }

    async fn list_all(&self) -> Vec<Device> {
        self.devices.read().await.values().cloned().collect()
    }

    async fn create(&self, device: Device) -> Result<Device, StoreError> {
        let mut devices = self.devices.write().await;
        devices.insert(device.id, device.clone());
        Ok(device)
    }

    async fn create_new(&self, identifier: String, address: String, device_class: String) -> Device {
        let id = self.next_device_id();
        let device = Device::new(id, identifier, address, device_class, chrono::Utc::now());
        self.devices.write().await.insert(id, device.clone());
        device
    }

    async fn delete(&self, id: DeviceId) -> Result<(), StoreError> {
        let mut devices = self.devices.write().await;
        devices.remove(&id).ok_or(StoreError::DeviceNotFound(id))?;
        Ok(())
    }

    async fn merge(&self, device: Device) -> Result<Device, StoreError> {
        let mut devices = self.devices.write().await;
        devices.insert(device.id, device.clone());
        Ok(device)
    }

    async fn get_association(&self, id: Option82Id) -> Result<Option82Association, StoreError> {
        self.associations
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::AssociationNotFound(id.0))
    }

    async fn find_association_by_upstream(
        &self,
        upstream_switch_mac: &str,
        upstream_port_info: &str,
    ) -> Option<Option82Association> {
        let usm = upstream_switch_mac.to_lowercase();
        let usp = upstream_port_info.to_lowercase();
        self.associations
            .read()
            .await
            .values()
            .find(|a| a.upstream_switch_mac == usm && a.upstream_port_info == usp)
            .cloned()
    }

    async fn find_association_by_downstream_mac(
        &self,
        downstream_switch_mac: &str,
    ) -> Option<Option82Association> {
        let dsm = downstream_switch_mac.to_lowercase();
        self.associations
            .read()
            .await
            .values()
            .find(|a| a.downstream_switch_mac.as_deref() == Some(dsm.as_str()))
            .cloned()
    }

    async fn list_associations(&self) -> Vec<Option82Association> {
        self.associations.read().await.values().cloned().collect()
    }

    async fn delete_association(&self, id: Option82Id) -> Result<(), StoreError> {
        let mut associations = self.associations.write().await;
        associations
            .remove(&id)
            .ok_or(StoreError::AssociationNotFound(id.0))?;
        Ok(())
    }

    async fn update_info(
        &self,
        upstream_switch_mac: &str,
        upstream_port_info: &str,
        downstream_switch_mac: &str,
    ) -> Result<Option82Association, StoreError> {
        let usm = upstream_switch_mac.to_lowercase();
        let usp = upstream_port_info.to_lowercase();
        let dsm = downstream_switch_mac.to_lowercase();

        let mut associations = self.associations.write().await;

        // Clear any other row currently holding this downstream MAC.
        for assoc in associations.values_mut() {
            if assoc.upstream_switch_mac == usm && assoc.upstream_port_info == usp {
                continue;
            }
            if assoc.downstream_switch_mac.as_deref() == Some(dsm.as_str()) {
                assoc.downstream_switch_mac = None;
            }
        }

        let existing_id = associations
            .values()
            .find(|a| a.upstream_switch_mac == usm && a.upstream_port_info == usp)
            .map(|a| a.id);

        let id = match existing_id {
            Some(id) => id,
            None => Option82Id(self.next_association_id.fetch_add(1, Ordering::SeqCst)),
        };

        let entry = associations
            .entry(id)
            .or_insert_with(|| Option82Association::new(id, usm.clone(), usp.clone()));
        entry.downstream_switch_mac = Some(dsm);

        Ok(entry.clone())
    }

    async fn set_association(
        &self,
        upstream_switch_mac: &str,
        upstream_port_info: &str,
        downstream_switch_name: &str,
    ) -> Result<Option82Association, StoreError> {
        let usm = upstream_switch_mac.to_lowercase();
        let usp = upstream_port_info.to_lowercase();

        let mut associations = self.associations.write().await;
        let existing_id = associations
            .values()
            .find(|a| a.upstream_switch_mac == usm && a.upstream_port_info == usp)
            .map(|a| a.id);

        let id = match existing_id {
            Some(id) => id,
            None => Option82Id(self.next_association_id.fetch_add(1, Ordering::SeqCst)),
        };

        let entry = associations
            .entry(id)
            .or_insert_with(|| Option82Association::new(id, usm.clone(), usp.clone()));
        entry.downstream_switch_name = Some(downstream_switch_name.to_string());

        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_device(id: i64) -> Device {
        Device::new(
            DeviceId(id),
            format!("lc-0{id}"),
            "10.0.0.1".to_string(),
            "CiscoIOS".to_string(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemoryDeviceStore::new();
        let d = sample_device(1);
        store.create(d.clone()).await.unwrap();
        let fetched = store.get_by_id(DeviceId(1)).await.unwrap();
        assert_eq!(fetched.identifier, d.identifier);
    }

    #[tokio::test]
    async fn get_missing_device_is_not_found() {
        let store = InMemoryDeviceStore::new();
        let err = store.get_by_id(DeviceId(99)).await.unwrap_err();
        assert!(matches!(err, StoreError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn find_by_identifier_excludes_configured() {
        let store = InMemoryDeviceStore::new();
        let mut d = sample_device(1);
        d.state = DeviceState::Configured;
        store.create(d).await.unwrap();
        assert!(store
            .find_by_identifier_not_in_state("lc-01", DeviceState::Configured)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn update_info_clears_stale_downstream_binding() {
        let store = InMemoryDeviceStore::new();
        store
            .update_info("aa:aa:aa:aa:aa:aa", "gi1/0/1", "04:fe:7f:07:90:40")
            .await
            .unwrap();
        store
            .update_info("bb:bb:bb:bb:bb:bb", "gi1/0/2", "04:fe:7f:07:90:40")
            .await
            .unwrap();

        let first = store
            .find_association_by_upstream("aa:aa:aa:aa:aa:aa", "gi1/0/1")
            .await
            .unwrap();
        assert_eq!(first.downstream_switch_mac, None);

        let second = store
            .find_association_by_upstream("bb:bb:bb:bb:bb:bb", "gi1/0/2")
            .await
            .unwrap();
        assert_eq!(
            second.downstream_switch_mac.as_deref(),
            Some("04:fe:7f:07:90:40")
        );
    }

    #[tokio::test]
    async fn update_info_is_idempotent() {
        let store = InMemoryDeviceStore::new();
        store
            .update_info("aa:aa:aa:aa:aa:aa", "gi1/0/1", "04:fe:7f:07:90:40")
            .await
            .unwrap();
        store
            .update_info("aa:aa:aa:aa:aa:aa", "gi1/0/1", "04:fe:7f:07:90:40")
            .await
            .unwrap();

        let rows = store.list_associations().await;
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn at_most_one_row_per_upstream_pair() {
        let store = InMemoryDeviceStore::new();
        store
            .set_association("aa:aa:aa:aa:aa:aa", "gi1/0/1", "spine-1")
            .await
            .unwrap();
        store
            .set_association("aa:aa:aa:aa:aa:aa", "gi1/0/1", "spine-2")
            .await
            .unwrap();

        let rows = store.list_associations().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].downstream_switch_name.as_deref(), Some("spine-2"));
    }
}
