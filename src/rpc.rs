//! Command RPC (§4.9, §6): a request/reply surface for operator commands,
//! framed as newline-delimited JSON over TCP (§6 "[ADDED] Transport
//! framing" — the original's zmq REQ/REP socket is replaced, TFTP/message-
//! bus framing itself being out of scope per §1). `handle` is transport-
//! independent and unit-tested directly.
//!
//! No multi-tenancy or authorization is implemented: operators on the
//! command socket are trusted (§1 Non-goals).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use crate::adopters::Adopter;
use crate::domain::device::{Device, DeviceState};
use crate::domain::driver::{BootstrapParams, DriverRegistry};
use crate::domain::ephemeral::EphemeralStore;
use crate::domain::store::DeviceStore;
use crate::domain::task::{ConfigurationArgs, DeviceConfigurationTask, DeviceInitializationTask};
use crate::domain::value_objects::{DeviceId, Option82Id};
use crate::domain::Commander;
use crate::hooks::ready_hooks;

pub struct CommandRpc {
    store: Arc<dyn DeviceStore>,
    commander: Arc<Commander>,
    driver_registry: Arc<DriverRegistry>,
    ephemeral_store: Arc<EphemeralStore>,
    bootstrap_params: BootstrapParams,
    adopter: Option<Arc<dyn Adopter>>,
}

impl CommandRpc {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        commander: Arc<Commander>,
        driver_registry: Arc<DriverRegistry>,
        ephemeral_store: Arc<EphemeralStore>,
        bootstrap_params: BootstrapParams,
        adopter: Option<Arc<dyn Adopter>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            commander,
            driver_registry,
            ephemeral_store,
            bootstrap_params,
            adopter,
        })
    }

    async fn device_dict(&self, device: &Device) -> Value {
        let mut dict = device_to_json(device);
        let cqueue = self.commander.queue_len(device.id).await;
        dict["cqueue"] = json!(cqueue);
        dict
    }

    /// Handle one decoded JSON request, returning the JSON reply. Every
    /// command is handled per §6's command table; unknown commands and
    /// malformed ids are reported as `{"error": ...}` rather than dropping
    /// the connection, per §7's "RPC responder catches broad errors."
    pub async fn handle(&self, request: Value) -> Value {
        let cmd = request.get("cmd").and_then(Value::as_str).unwrap_or("");
        match cmd {
            "list" => self.cmd_list().await,
            "status" => self.cmd_status(&request).await,
            "neighbor-info" => self.cmd_neighbor_info(&request).await,
            "delete" => self.cmd_delete(&request).await,
            "adopt" => self.cmd_adopt(&request).await,
            "reinit" => self.cmd_reinit(&request).await,
            "opt82-info" => self.cmd_opt82_info(&request).await,
            "opt82-list" => self.cmd_opt82_list().await,
            "opt82-delete" => self.cmd_opt82_delete(&request).await,
            other => json!({"error": format!("unknown command: {other}")}),
        }
    }

    async fn cmd_list(&self) -> Value {
        let devices = self.store.list_all().await;
        let mut out = Vec::with_capacity(devices.len());
        for device in &devices {
            out.push(self.device_dict(device).await);
        }
        Value::Array(out)
    }

    async fn cmd_status(&self, request: &Value) -> Value {
        let Some(id) = request_device_id(request) else {
            return json!({"error": "id is required"});
        };
        match self.store.get_by_id(id).await {
            Ok(device) => {
                let mut dict = self.device_dict(&device).await;
                dict["cqueue_items"] = json!(self.commander.get_queue_list(id).await);
                dict
            }
            Err(e) => json!({"error": e.to_string()}),
        }
    }

    async fn cmd_neighbor_info(&self, request: &Value) -> Value {
        let Some(id) = request_device_id(request) else {
            return json!({"error": "id is required"});
        };
        let device = match self.store.get_by_id(id).await {
            Ok(d) => d,
            Err(e) => return json!({"error": e.to_string()}),
        };
        let Some(driver) = self.driver_registry.get(&device.device_class) else {
            return json!({"error": format!("no driver registered for device class {}", device.device_class)});
        };
        json!({"info": driver.neighbor_info(&device)})
    }

    async fn cmd_delete(&self, request: &Value) -> Value {
        let Some(id) = request_device_id(request) else {
            return json!({"error": "id is required"});
        };
        match self.store.delete(id).await {
            Ok(()) => json!({"info": "ok"}),
            Err(e) => json!({"error": e.to_string()}),
        }
    }

    async fn cmd_adopt(&self, request: &Value) -> Value {
        let Some(id) = request_device_id(request) else {
            return json!({"error": "id is required"});
        };
        let Some(identity) = request.get("identity").and_then(Value::as_str) else {
            return json!({"error": "identity is required"});
        };
        let Some(configuration) = request.get("config").and_then(Value::as_str) else {
            return json!({"error": "config is required"});
        };

        let device = match self.store.get_by_id(id).await {
            Ok(d) => d,
            Err(e) => return json!({"error": e.to_string()}),
        };
        let Some(driver) = self.driver_registry.get(&device.device_class) else {
            return json!({"error": format!("no driver registered for device class {}", device.device_class)});
        };

        let task = Arc::new(DeviceConfigurationTask {
            device_id: id,
            driver,
            ephemeral_store: Arc::clone(&self.ephemeral_store),
            args: ConfigurationArgs {
                identity: identity.to_string(),
                configuration: configuration.to_string(),
            },
            hooks: HashMap::new(),
        });

        match self.commander.enqueue(&device, task).await {
            Ok(()) => json!({"info": "ok"}),
            Err(e) => json!({"error": e.to_string()}),
        }
    }

    async fn cmd_reinit(&self, request: &Value) -> Value {
        let Some(id) = request_device_id(request) else {
            return json!({"error": "id is required"});
        };
        let device = match self.store.get_by_id(id).await {
            Ok(d) => d,
            Err(e) => return json!({"error": e.to_string()}),
        };
        let Some(driver) = self.driver_registry.get(&device.device_class) else {
            return json!({"error": format!("no driver registered for device class {}", device.device_class)});
        };

        let task = Arc::new(DeviceInitializationTask {
            device_id: id,
            driver,
            bootstrap: self.bootstrap_params.clone(),
            hooks: ready_hooks(self.adopter.clone()),
        });

        match self.commander.enqueue(&device, task).await {
            Ok(()) => json!({"info": "ok"}),
            Err(e) => json!({"error": e.to_string()}),
        }
    }

    async fn cmd_opt82_info(&self, request: &Value) -> Value {
        let (Some(usm), Some(usp), Some(dsn)) = (
            request.get("upstream_switch_mac").and_then(Value::as_str),
            request.get("upstream_port_info").and_then(Value::as_str),
            request.get("downstream_switch_name").and_then(Value::as_str),
        ) else {
            return json!({"error": "upstream_switch_mac, upstream_port_info and downstream_switch_name are required"});
        };
        match self.store.set_association(usm, usp, dsn).await {
            Ok(assoc) => association_to_json(&assoc),
            Err(e) => json!({"error": e.to_string()}),
        }
    }

    async fn cmd_opt82_list(&self) -> Value {
        let associations = self.store.list_associations().await;
        Value::Array(associations.iter().map(association_to_json).collect())
    }

    async fn cmd_opt82_delete(&self, request: &Value) -> Value {
        let Some(id) = request.get("id").and_then(Value::as_i64) else {
            return json!({"error": "id is required"});
        };
        match self.store.delete_association(Option82Id(id)).await {
            Ok(()) => json!({"info": "ok"}),
            Err(e) => json!({"error": e.to_string()}),
        }
    }

    /// Run the newline-delimited-JSON TCP listener until the process exits.
    pub async fn serve(self: Arc<Self>, bind: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(bind).await?;
        tracing::info!(bind, "command rpc listening");
        loop {
            let (socket, _) = listener.accept().await?;
            let rpc = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = rpc.serve_connection(socket).await {
                    tracing::debug!(error = %e, "rpc: connection error");
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
            let reply = match serde_json::from_str::<Value>(&line) {
                Ok(request) => self.handle(request).await,
                Err(e) => json!({"error": format!("malformed request: {e}")}),
            };
            let mut out = serde_json::to_vec(&reply).unwrap_or_default();
            out.push(b'\n');
            writer.write_all(&out).await?;
        }
        Ok(())
    }
}

fn request_device_id(request: &Value) -> Option<DeviceId> {
    request.get("id").and_then(Value::as_i64).map(DeviceId)
}

fn device_to_json(device: &Device) -> Value {
    json!({
        "id": device.id.0,
        "identifier": device.identifier,
        "address": device.address,
        "state": device_state_name(device.state),
        "device_class": device.device_class,
        "device_type": device.device_type,
        "mac_address": device.mac_address.as_str(),
        "version": device.version,
    })
}

fn device_state_name(state: DeviceState) -> &'static str {
    match state {
        DeviceState::New => "NEW",
        DeviceState::Init => "INIT",
        DeviceState::InitFailed => "INIT_FAILED",
        DeviceState::Ready => "READY",
        DeviceState::Configuring => "CONFIGURING",
        DeviceState::ConfigureFailed => "CONFIGURE_FAILED",
        DeviceState::Configured => "CONFIGURED",
    }
}

fn association_to_json(assoc: &crate::domain::option82::Option82Association) -> Value {
    json!({
        "id": assoc.id.0,
        "upstream_switch_mac": assoc.upstream_switch_mac,
        "upstream_port_info": assoc.upstream_port_info,
        "downstream_switch_mac": assoc.downstream_switch_mac,
        "downstream_switch_name": assoc.downstream_switch_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device::Device;
    use crate::domain::driver::Driver;
    use crate::domain::errors::DriverError;
    use crate::domain::store::InMemoryDeviceStore;
    use crate::domain::value_objects::MacAddress;

    struct FakeDriver;
    impl Driver for FakeDriver {
        fn emit_base_config(&self, _device: &Device, _params: &BootstrapParams) -> Result<String, DriverError> {
            Ok(String::new())
        }
        fn initial_setup(&self, _device: &mut Device, _params: &BootstrapParams) -> bool {
            true
        }
        fn configure(&self, _device: &Device, _configuration: &str, _ephemeral_store: &Arc<EphemeralStore>) -> bool {
            true
        }
        fn change_identity(&self, _device: &Device, _identity: &str) -> bool {
            true
        }
        fn neighbor_info(&self, _device: &Device) -> String {
            "neighbors: none".to_string()
        }
    }

    fn rpc() -> (Arc<CommandRpc>, Arc<InMemoryDeviceStore>) {
        let store = InMemoryDeviceStore::new();
        let commander = Commander::new(Arc::clone(&store) as Arc<dyn DeviceStore>);
        let mut registry = DriverRegistry::new();
        registry.register("CiscoIOS", Arc::new(FakeDriver));
        let rpc = CommandRpc::new(
            Arc::clone(&store) as Arc<dyn DeviceStore>,
            commander,
            Arc::new(registry),
            EphemeralStore::new(),
            BootstrapParams {
                adopt_dn: "x".to_string(),
                init_username: "x".to_string(),
                init_password: "x".to_string(),
            },
            None,
        );
        (rpc, store)
    }

    #[tokio::test]
    async fn list_reports_cqueue_count() {
        let (rpc, store) = rpc();
        let device = Device::new(
            DeviceId(1),
            "lc-01".to_string(),
            "10.0.0.1".to_string(),
            "CiscoIOS".to_string(),
            chrono::Utc::now(),
        );
        store.create(device).await.unwrap();
        let reply = rpc.handle(json!({"cmd": "list"})).await;
        assert_eq!(reply[0]["identifier"], "lc-01");
        assert_eq!(reply[0]["cqueue"], 0);
    }

    #[tokio::test]
    async fn status_unknown_device_is_an_error() {
        let (rpc, _store) = rpc();
        let reply = rpc.handle(json!({"cmd": "status", "id": 42})).await;
        assert!(reply.get("error").is_some());
    }

    #[tokio::test]
    async fn neighbor_info_returns_driver_dump() {
        let (rpc, store) = rpc();
        let device = Device::new(
            DeviceId(1),
            "lc-01".to_string(),
            "10.0.0.1".to_string(),
            "CiscoIOS".to_string(),
            chrono::Utc::now(),
        );
        store.create(device).await.unwrap();
        let reply = rpc.handle(json!({"cmd": "neighbor-info", "id": 1})).await;
        assert_eq!(reply["info"], "neighbors: none");
    }

    #[tokio::test]
    async fn reinit_on_configured_device_is_rejected() {
        let (rpc, store) = rpc();
        let mut device = Device::new(
            DeviceId(1),
            "lc-01".to_string(),
            "10.0.0.1".to_string(),
            "CiscoIOS".to_string(),
            chrono::Utc::now(),
        );
        device.state = DeviceState::Configured;
        store.create(device).await.unwrap();
        let reply = rpc.handle(json!({"cmd": "reinit", "id": 1})).await;
        assert!(reply.get("error").is_some());
    }

    #[tokio::test]
    async fn adopt_rejects_when_already_configuring() {
        let (rpc, store) = rpc();
        let mut device = Device::new(
            DeviceId(1),
            "lc-01".to_string(),
            "10.0.0.1".to_string(),
            "CiscoIOS".to_string(),
            chrono::Utc::now(),
        );
        device.mac_address = MacAddress::parse("04fe.7f07.9040").unwrap();
        device.state = DeviceState::Ready;
        store.create(device).await.unwrap();

        let first = rpc
            .handle(json!({"cmd": "adopt", "id": 1, "identity": "x", "config": "hostname x\n"}))
            .await;
        assert_eq!(first["info"], "ok");

        let second = rpc
            .handle(json!({"cmd": "adopt", "id": 1, "identity": "y", "config": "hostname y\n"}))
            .await;
        assert!(second.get("error").is_some());
    }

    #[tokio::test]
    async fn opt82_info_then_list_round_trips() {
        let (rpc, _store) = rpc();
        rpc.handle(json!({
            "cmd": "opt82-info",
            "upstream_switch_mac": "AA:AA:AA:AA:AA:AA",
            "upstream_port_info": "Gi1/0/1",
            "downstream_switch_name": "spine-1",
        }))
        .await;

        let list = rpc.handle(json!({"cmd": "opt82-list"})).await;
        let arr = list.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["downstream_switch_name"], "spine-1");
    }

    #[tokio::test]
    async fn unknown_command_is_an_error() {
        let (rpc, _store) = rpc();
        let reply = rpc.handle(json!({"cmd": "not-a-real-command"})).await;
        assert!(reply.get("error").is_some());
    }
}
