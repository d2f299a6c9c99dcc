//! Task: a validated, runnable unit of work bound to one Device.
//!
//! A Task has three phases — `validate`, `run`, `post` — run in that order
//! by the owning CommandQueue worker (§4.3). `validate` runs on the
//! enqueuer's task under the queue's lock; `run`/`post` run on the worker,
//! outside any lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;

use crate::domain::device::{Device, DeviceState};
use crate::domain::driver::{BootstrapParams, Driver};
use crate::domain::ephemeral::EphemeralStore;
use crate::domain::errors::TaskValidationError;
use crate::domain::store::DeviceStore;

/// A hook invoked once by `post()` if the Device's post-run state has a
/// registered callback. `post()` awaits the returned future before the
/// worker pops the head element, so a hook's enqueue is ordered relative to
/// concurrent enqueues from other threads (§5).
pub type Hook = Arc<dyn Fn(Device) -> BoxFuture<'static, ()> + Send + Sync>;

/// Discriminates Task variants for the CommandQueue's uniqueness check
/// (`unique` tasks reject a second enqueue of the same variant, §4.3/§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Init,
    Configure,
}

/// Arguments a `DeviceConfigurationTask` needs — identity and configuration
/// are passed opaquely by the enqueuer (§4.3).
#[derive(Debug, Clone)]
pub struct ConfigurationArgs {
    pub identity: String,
    pub configuration: String,
}

/// A validated, runnable unit of work bound to one Device.
#[async_trait::async_trait]
pub trait Task: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// Whether the CommandQueue should reject a second pending task of the
    /// same `kind` for this device.
    fn unique(&self) -> bool {
        true
    }

    /// Inspect the device's current state against this task's
    /// prerequisites. Runs under the queue's lock, before enqueue.
    async fn validate(&self, store: &dyn DeviceStore) -> Result<(), TaskValidationError>;

    /// Perform the work, mutating device state along the way via the store.
    /// Runs on the worker, outside any lock. Returns the device's state
    /// after the run for the hook dispatch in `post`.
    async fn run(&self, store: &dyn DeviceStore) -> DeviceState;

    /// Hooks keyed by terminal state, invoked once after `run` with the
    /// device in its post-run state.
    fn hooks(&self) -> &HashMap<DeviceState, Hook>;

    /// Default `post`: look up a hook for the state `run` left the device
    /// in, and invoke it if present.
    async fn post(&self, store: &dyn DeviceStore, device_id: crate::domain::value_objects::DeviceId, final_state: DeviceState) {
        if let Some(hook) = self.hooks().get(&final_state) {
            if let Ok(device) = store.get_by_id(device_id).await {
                hook(device).await;
            }
        }
    }
}

/// Authenticates to the switch, harvests identity attributes, and drives
/// the device from its current state to READY or INIT_FAILED.
pub struct DeviceInitializationTask {
    pub device_id: crate::domain::value_objects::DeviceId,
    pub driver: Arc<dyn Driver>,
    pub bootstrap: BootstrapParams,
    pub hooks: HashMap<DeviceState, Hook>,
}

#[async_trait::async_trait]
impl Task for DeviceInitializationTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Init
    }

    async fn validate(&self, store: &dyn DeviceStore) -> Result<(), TaskValidationError> {
        let device = store
            .get_by_id(self.device_id)
            .await
            .map_err(|_| TaskValidationError::WrongState {
                device: self.device_id,
                state: DeviceState::New,
            })?;
        if device.state.init_eligible() {
            Ok(())
        } else {
            Err(TaskValidationError::WrongState {
                device: self.device_id,
                state: device.state,
            })
        }
    }

    async fn run(&self, store: &dyn DeviceStore) -> DeviceState {
        let mut device = match store.get_by_id(self.device_id).await {
            Ok(d) => d,
            Err(_) => return DeviceState::InitFailed,
        };

        device.change_state(DeviceState::Init, Utc::now());
        let _ = store.merge(device.clone()).await;

        // `initial_setup` blocks on switch I/O (§4.2); hand it to a blocking
        // thread so it doesn't stall the async executor.
        let driver = Arc::clone(&self.driver);
        let bootstrap = self.bootstrap.clone();
        let fallback = device.clone();
        let (mut device, succeeded) = tokio::task::spawn_blocking(move || {
            let succeeded = driver.initial_setup(&mut device, &bootstrap);
            (device, succeeded)
        })
        .await
        .unwrap_or((fallback, false));

        let final_state = if succeeded {
            DeviceState::Ready
        } else {
            DeviceState::InitFailed
        };
        device.change_state(final_state, Utc::now());
        let _ = store.merge(device).await;
        final_state
    }

    fn hooks(&self) -> &HashMap<DeviceState, Hook> {
        &self.hooks
    }
}

/// Renames and uploads configuration to a READY device, driving it to
/// CONFIGURED or CONFIGURE_FAILED.
pub struct DeviceConfigurationTask {
    pub device_id: crate::domain::value_objects::DeviceId,
    pub driver: Arc<dyn Driver>,
    pub ephemeral_store: Arc<EphemeralStore>,
    pub args: ConfigurationArgs,
    pub hooks: HashMap<DeviceState, Hook>,
}

#[async_trait::async_trait]
impl Task for DeviceConfigurationTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Configure
    }

    async fn validate(&self, store: &dyn DeviceStore) -> Result<(), TaskValidationError> {
        let device = store
            .get_by_id(self.device_id)
            .await
            .map_err(|_| TaskValidationError::WrongState {
                device: self.device_id,
                state: DeviceState::New,
            })?;
        if device.state.configure_eligible() {
            Ok(())
        } else {
            Err(TaskValidationError::WrongState {
                device: self.device_id,
                state: device.state,
            })
        }
    }

    async fn run(&self, store: &dyn DeviceStore) -> DeviceState {
        let mut device = match store.get_by_id(self.device_id).await {
            Ok(d) => d,
            Err(_) => return DeviceState::ConfigureFailed,
        };

        device.change_state(DeviceState::Configuring, Utc::now());
        let _ = store.merge(device.clone()).await;

        // `change_identity` and `configure` block on switch I/O (§4.2); run
        // them off the async executor. `change_identity` always runs first,
        // unconditionally — the device_type hint only gates `configure`.
        let driver = Arc::clone(&self.driver);
        let identity = self.args.identity.clone();
        let device_for_rename = device.clone();
        let identity_committed =
            tokio::task::spawn_blocking(move || driver.change_identity(&device_for_rename, &identity))
                .await
                .unwrap_or(false);
        device.change_identity(self.args.identity.clone(), Utc::now(), identity_committed);
        if !identity_committed {
            device.change_state(DeviceState::ConfigureFailed, Utc::now());
            let _ = store.merge(device).await;
            return DeviceState::ConfigureFailed;
        }

        if let Some((_, value)) = parse_config_hint(&self.args.configuration, "device_type") {
            if !device.device_type.to_lowercase().contains(&value.to_lowercase()) {
                device.change_state(DeviceState::ConfigureFailed, Utc::now());
                let _ = store.merge(device).await;
                return DeviceState::ConfigureFailed;
            }
        }

        let driver = Arc::clone(&self.driver);
        let configuration = self.args.configuration.clone();
        let ephemeral_store = Arc::clone(&self.ephemeral_store);
        let device_for_configure = device.clone();
        let configured = tokio::task::spawn_blocking(move || {
            driver.configure(&device_for_configure, &configuration, &ephemeral_store)
        })
        .await
        .unwrap_or(false);
        let final_state = if configured {
            DeviceState::Configured
        } else {
            DeviceState::ConfigureFailed
        };
        device.change_state(final_state, Utc::now());
        let _ = store.merge(device).await;
        final_state
    }

    fn hooks(&self) -> &HashMap<DeviceState, Hook> {
        &self.hooks
    }
}

/// Parse a `! liscain::<key> <value>` config hint line for `key`, per §6.
/// Used before upload to check the `device_type` hint against the device's
/// discovered type — a mismatch aborts the configure before any bytes are
/// pushed.
pub fn parse_config_hint(configuration: &str, key: &str) -> Option<(String, String)> {
    let prefix = format!("! liscain::{key} ");
    configuration
        .lines()
        .find_map(|line| line.strip_prefix(&prefix))
        .map(|value| (key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device::Device;
    use crate::domain::store::InMemoryDeviceStore;
    use crate::domain::value_objects::DeviceId;

    struct FakeDriver {
        init_succeeds: bool,
        identity_succeeds: bool,
        configure_succeeds: bool,
    }

    impl Driver for FakeDriver {
        fn emit_base_config(&self, _device: &Device, _params: &BootstrapParams) -> Result<String, crate::domain::errors::DriverError> {
            Ok(String::new())
        }

        fn initial_setup(&self, device: &mut Device, _params: &BootstrapParams) -> bool {
            if self.init_succeeds {
                device.device_type = "WS-C2960X-24PS-L".to_string();
            }
            self.init_succeeds
        }

        fn configure(&self, _device: &Device, _configuration: &str, _ephemeral_store: &Arc<EphemeralStore>) -> bool {
            self.configure_succeeds
        }

        fn change_identity(&self, _device: &Device, _identity: &str) -> bool {
            self.identity_succeeds
        }

        fn neighbor_info(&self, _device: &Device) -> String {
            "unknown".to_string()
        }
    }

    async fn seed_device(store: &InMemoryDeviceStore, state: DeviceState) -> DeviceId {
        let mut device = Device::new(
            DeviceId(1),
            "lc-01".to_string(),
            "10.0.0.1".to_string(),
            "CiscoIOS".to_string(),
            Utc::now(),
        );
        device.state = state;
        store.create(device).await.unwrap();
        DeviceId(1)
    }

    #[tokio::test]
    async fn init_task_reaches_ready_on_success() {
        let store = InMemoryDeviceStore::default();
        let device_id = seed_device(&store, DeviceState::New).await;
        let task = DeviceInitializationTask {
            device_id,
            driver: Arc::new(FakeDriver {
                init_succeeds: true,
                identity_succeeds: true,
                configure_succeeds: true,
            }),
            bootstrap: BootstrapParams {
                adopt_dn: "x".to_string(),
                init_username: "x".to_string(),
                init_password: "x".to_string(),
            },
            hooks: HashMap::new(),
        };
        assert!(task.validate(&store).await.is_ok());
        let final_state = task.run(&store).await;
        assert_eq!(final_state, DeviceState::Ready);
    }

    #[tokio::test]
    async fn init_task_reaches_init_failed_on_failure() {
        let store = InMemoryDeviceStore::default();
        let device_id = seed_device(&store, DeviceState::New).await;
        let task = DeviceInitializationTask {
            device_id,
            driver: Arc::new(FakeDriver {
                init_succeeds: false,
                identity_succeeds: true,
                configure_succeeds: true,
            }),
            bootstrap: BootstrapParams {
                adopt_dn: "x".to_string(),
                init_username: "x".to_string(),
                init_password: "x".to_string(),
            },
            hooks: HashMap::new(),
        };
        let final_state = task.run(&store).await;
        assert_eq!(final_state, DeviceState::InitFailed);
    }

    #[tokio::test]
    async fn init_task_rejects_wrong_state() {
        let store = InMemoryDeviceStore::default();
        let device_id = seed_device(&store, DeviceState::Configuring).await;
        let task = DeviceInitializationTask {
            device_id,
            driver: Arc::new(FakeDriver {
                init_succeeds: true,
                identity_succeeds: true,
                configure_succeeds: true,
            }),
            bootstrap: BootstrapParams {
                adopt_dn: "x".to_string(),
                init_username: "x".to_string(),
                init_password: "x".to_string(),
            },
            hooks: HashMap::new(),
        };
        assert!(task.validate(&store).await.is_err());
    }

    #[tokio::test]
    async fn configure_task_aborts_on_device_type_mismatch() {
        let store = InMemoryDeviceStore::default();
        let device_id = seed_device(&store, DeviceState::Ready).await;
        let task = DeviceConfigurationTask {
            device_id,
            driver: Arc::new(FakeDriver {
                init_succeeds: true,
                identity_succeeds: true,
                configure_succeeds: true,
            }),
            ephemeral_store: EphemeralStore::new(),
            args: ConfigurationArgs {
                identity: "new-name".to_string(),
                configuration: "! liscain::device_type C9200\nhostname new-name\n".to_string(),
            },
            hooks: HashMap::new(),
        };
        let final_state = task.run(&store).await;
        assert_eq!(final_state, DeviceState::ConfigureFailed);
        let device = store.get_by_id(device_id).await.unwrap();
        assert_eq!(device.identifier, "new-name");
    }

    #[tokio::test]
    async fn configure_task_reaches_configured_on_success() {
        let store = InMemoryDeviceStore::default();
        let device_id = seed_device(&store, DeviceState::Ready).await;
        let task = DeviceConfigurationTask {
            device_id,
            driver: Arc::new(FakeDriver {
                init_succeeds: true,
                identity_succeeds: true,
                configure_succeeds: true,
            }),
            ephemeral_store: EphemeralStore::new(),
            args: ConfigurationArgs {
                identity: "new-name".to_string(),
                configuration: "hostname new-name\n".to_string(),
            },
            hooks: HashMap::new(),
        };
        let final_state = task.run(&store).await;
        assert_eq!(final_state, DeviceState::Configured);
        let device = store.get_by_id(device_id).await.unwrap();
        assert_eq!(device.identifier, "new-name");
    }

    #[test]
    fn parse_config_hint_extracts_device_type() {
        let cfg = "! liscain::device_type C9200\nhostname x\n";
        assert_eq!(
            parse_config_hint(cfg, "device_type"),
            Some(("device_type".to_string(), "C9200".to_string()))
        );
    }
}
