//! The device bus: a `DeviceId`-keyed registry with strict 1:1 routing and
//! a cooperative `poll_all`.
//!
//! There is no broadcast and no implicit fall-through — the legacy bridge
//! is a thin adapter layered above `dispatch`, not a routing concept this
//! crate knows about.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use fujinet_wire::{DeviceId, IORequest, IOResponse, StatusCode};
use tracing::{error, trace, warn};

/// A virtual device registered on the bus.
///
/// `handle` must never block the bus thread: any wait is represented as
/// `StatusCode::NotReady`/`DeviceBusy` and retried by the caller. `poll`
/// drives whatever background work (socket readiness, worker-task
/// completion, ring timers) the device owns.
pub trait Device: Send {
    fn handle(&mut self, request: &IORequest) -> IOResponse;

    /// Cooperative tick; called at least once per transport loop iteration.
    fn poll(&mut self) {}
}

/// Registers devices by `DeviceId` and routes requests to them.
///
/// `DeviceManager` exclusively owns every registered device — nothing else
/// in the workspace holds one directly once it's registered.
#[derive(Default)]
pub struct DeviceBus {
    devices: HashMap<DeviceId, Box<dyn Device>>,
}

#[derive(Debug, thiserror::Error)]
#[error("device id {0:#04x} is already registered")]
pub struct AlreadyRegistered(pub DeviceId);

impl DeviceBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `device` under `id`. Fails if `id` is already taken.
    pub fn register(&mut self, id: DeviceId, device: Box<dyn Device>) -> Result<(), AlreadyRegistered> {
        if self.devices.contains_key(&id) {
            return Err(AlreadyRegistered(id));
        }
        trace!(device_id = format_args!("{id:#04x}"), "device registered");
        self.devices.insert(id, device);
        Ok(())
    }

    pub fn unregister(&mut self, id: DeviceId) -> Option<Box<dyn Device>> {
        self.devices.remove(&id)
    }

    pub fn is_registered(&self, id: DeviceId) -> bool {
        self.devices.contains_key(&id)
    }

    /// Routes `request` to its device, synchronously, returning its
    /// response. Never panics: a device whose `handle` unwinds is reported
    /// as `InternalError` with an empty payload.
    pub fn dispatch(&mut self, request: IORequest) -> IOResponse {
        let Some(device) = self.devices.get_mut(&request.device_id) else {
            warn!(device_id = format_args!("{:#04x}", request.device_id), "no such device");
            return IOResponse::error(&request, StatusCode::DeviceNotFound);
        };

        match panic::catch_unwind(AssertUnwindSafe(|| device.handle(&request))) {
            Ok(resp) => resp,
            Err(_) => {
                error!(device_id = format_args!("{:#04x}", request.device_id), "device handler panicked");
                IOResponse::error(&request, StatusCode::InternalError)
            }
        }
    }

    /// Round-robin cooperative tick for every registered device.
    pub fn poll_all(&mut self) {
        for (id, device) in self.devices.iter_mut() {
            if panic::catch_unwind(AssertUnwindSafe(|| device.poll())).is_err() {
                error!(device_id = format_args!("{id:#04x}"), "device poll panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;
    impl Device for Echo {
        fn handle(&mut self, request: &IORequest) -> IOResponse {
            IOResponse::ok(request, request.payload.clone())
        }
    }

    struct Panicky;
    impl Device for Panicky {
        fn handle(&mut self, _request: &IORequest) -> IOResponse {
            panic!("boom")
        }
    }

    #[test]
    fn unknown_device_is_not_found() {
        let mut bus = DeviceBus::new();
        let req = IORequest::new(1, 0xAA, 0, vec![]);
        assert_eq!(bus.dispatch(req).status, StatusCode::DeviceNotFound);
    }

    #[test]
    fn registering_twice_fails() {
        let mut bus = DeviceBus::new();
        bus.register(1, Box::new(Echo)).unwrap();
        assert!(bus.register(1, Box::new(Echo)).is_err());
    }

    #[test]
    fn dispatch_routes_to_registered_device() {
        let mut bus = DeviceBus::new();
        bus.register(1, Box::new(Echo)).unwrap();
        let req = IORequest::new(1, 1, 0, vec![1, 2, 3]);
        let resp = bus.dispatch(req);
        assert_eq!(resp.status, StatusCode::Ok);
        assert_eq!(resp.payload, vec![1, 2, 3]);
    }

    #[test]
    fn panicking_device_yields_internal_error_not_a_crash() {
        let mut bus = DeviceBus::new();
        bus.register(2, Box::new(Panicky)).unwrap();
        let req = IORequest::new(1, 2, 0, vec![]);
        let resp = bus.dispatch(req);
        assert_eq!(resp.status, StatusCode::InternalError);
        assert!(resp.payload.is_empty());
    }
}
