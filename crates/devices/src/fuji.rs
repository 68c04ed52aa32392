//! `FujiDevice`: the config unit's own bus presence. The firmware only
//! ever wires up `Reset` here — everything else is unsupported, and the
//! YAML-backed config store lives behind a callback rather than doing its
//! own file I/O from this device.

use fujinet_bus::Device;
use fujinet_config::FujiConfig;
use fujinet_wire::{IORequest, IOResponse, StatusCode};

pub const OP_RESET: u16 = 0xFF;

pub struct FujiDevice {
    config: FujiConfig,
    reset_handler: Box<dyn FnMut() + Send>,
}

impl FujiDevice {
    pub fn new(reset_handler: Box<dyn FnMut() + Send>) -> Self {
        Self { config: FujiConfig::default(), reset_handler }
    }

    pub fn config(&self) -> &FujiConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut FujiConfig {
        &mut self.config
    }
}

impl Device for FujiDevice {
    fn handle(&mut self, request: &IORequest) -> IOResponse {
        match request.command {
            OP_RESET => {
                (self.reset_handler)();
                IOResponse::ok(request, Vec::new())
            }
            _ => IOResponse::error(request, StatusCode::Unsupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn req(command: u16) -> IORequest {
        IORequest::new(1, 0xF0, command, Vec::new())
    }

    #[test]
    fn reset_invokes_the_handler_and_reports_ok() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler_count = count.clone();
        let mut dev = FujiDevice::new(Box::new(move || {
            handler_count.fetch_add(1, Ordering::SeqCst);
        }));

        let resp = dev.handle(&req(OP_RESET));
        assert_eq!(resp.status, StatusCode::Ok);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_command_is_unsupported() {
        let mut dev = FujiDevice::new(Box::new(|| {}));
        let resp = dev.handle(&req(0x01));
        assert_eq!(resp.status, StatusCode::Unsupported);
    }

    #[test]
    fn config_starts_at_defaults_and_is_mutable() {
        let mut dev = FujiDevice::new(Box::new(|| {}));
        assert_eq!(dev.config().hosts.len(), 0);
        dev.config_mut().general.device_name = "test-fuji".to_string();
        assert_eq!(dev.config().general.device_name, "test-fuji");
    }
}
