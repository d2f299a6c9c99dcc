//! Domain errors

use thiserror::Error;

use crate::domain::device::DeviceState;
use crate::domain::value_objects::DeviceId;

/// Errors surfaced by the Device Store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    #[error("option82 association {0} not found")]
    AssociationNotFound(i64),

    #[error("store error: {0}")]
    Backend(String),
}

/// Errors raised while validating a Task against a Device's current state
#[derive(Error, Debug)]
pub enum TaskValidationError {
    #[error("device {device} in state {state:?} is not eligible for this task")]
    WrongState { device: DeviceId, state: DeviceState },

    #[error("a task of this kind is already queued for device {0}")]
    AlreadyQueued(DeviceId),
}

/// Errors raised by a Driver implementation itself (not transport failures,
/// which are folded into a boolean per §7 of the specification)
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("no base configuration template for device class {0}")]
    MissingTemplate(String),

    #[error("template rendering failed: {0}")]
    Template(String),

    #[error("unknown device class {0}")]
    UnknownDeviceClass(String),
}

/// Top-level error type for the controller, used at RPC/adapter boundaries
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] TaskValidationError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}
