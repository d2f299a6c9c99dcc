//! Builds the `READY`-state hook that wires an [`Adopter`](crate::adopters::Adopter)
//! onto a `DeviceInitializationTask`, shared by the Bootstrap File Server and
//! the `reinit` RPC command (§4.6, §6).

use std::collections::HashMap;
use std::sync::Arc;

use crate::adopters::Adopter;
use crate::domain::device::DeviceState;
use crate::domain::task::Hook;

/// A hook map with a single `READY` entry that runs `adopter.autoadopt`.
/// `Task::post` awaits the returned future before the worker pops the head
/// element, so the hook's enqueue completes before the next task starts
/// (§5).
pub fn ready_hooks(adopter: Option<Arc<dyn Adopter>>) -> HashMap<DeviceState, Hook> {
    let mut hooks = HashMap::new();
    if let Some(adopter) = adopter {
        let hook: Hook = Arc::new(move |device| {
            let adopter = Arc::clone(&adopter);
            Box::pin(async move {
                adopter.autoadopt(&device).await;
            })
        });
        hooks.insert(DeviceState::Ready, hook);
    }
    hooks
}
