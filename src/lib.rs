//! # ZTP Controller
//!
//! Zero-touch provisioning controller for network switches: a Bootstrap
//! File Server that answers first-contact TFTP-shaped requests, a Commander
//! that drives each device's initialization and configuration through a
//! per-device command queue, Adopters that resolve identity for newly
//! initialized switches, an Ingest Listener for DHCP Option-82 relay
//! reports, and a Command RPC surface for operators.

pub mod adopters;
pub mod bootstrap;
pub mod config;
pub mod domain;
pub mod hooks;
pub mod http_blob;
pub mod ingest;
pub mod rpc;

pub use config::{AdopterMode, AutoconfConfig, Config, ConfigError};
pub use domain::{
    BootstrapParams, CiscoIosDriver, CommandQueue, Commander, ControllerError, Device, DeviceId,
    DeviceState, DeviceStore, Driver, DriverError, DriverRegistry, EphemeralStore,
    InMemoryDeviceStore, MacAddress, MacAddressError, Option82Association, Option82Id,
    StoreError, SwitchTransport, SwitchTransportFactory, Task, TaskValidationError,
    TransportError, UNKNOWN,
};
