//! # Provisioning Domain
//!
//! Core types and orchestration for the zero-touch provisioning controller:
//! the Device lifecycle state machine, the Device/Ephemeral stores, the
//! polymorphic Driver contract, Tasks, the per-device CommandQueue, and the
//! Commander that owns all of them.

pub mod commander;
pub mod device;
pub mod driver;
pub mod ephemeral;
pub mod errors;
pub mod option82;
pub mod queue;
pub mod store;
pub mod task;
pub mod value_objects;

pub use commander::Commander;
pub use device::{Device, DeviceState};
pub use driver::{BootstrapParams, CiscoIosDriver, Driver, DriverRegistry, SwitchTransport, SwitchTransportFactory, TransportError};
pub use ephemeral::EphemeralStore;
pub use errors::{ControllerError, DriverError, StoreError, TaskValidationError};
pub use option82::Option82Association;
pub use queue::CommandQueue;
pub use store::{DeviceStore, InMemoryDeviceStore};
pub use task::{ConfigurationArgs, DeviceConfigurationTask, DeviceInitializationTask, Hook, Task, TaskKind};
pub use value_objects::{DeviceId, MacAddress, MacAddressError, Option82Id, UNKNOWN};
