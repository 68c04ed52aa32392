//! Minimal demonstration binary: wires every bus device into one
//! `DeviceBus`, the way firmware boot wires the real hardware, then runs a
//! handful of requests through it. There is no real transport here (no
//! vsock, no stdio framing) — `DeviceBus::dispatch` stands in for whatever
//! carries bytes in from the host in production.

use std::sync::Arc;

use fujinet_bus::DeviceBus;
use fujinet_devices::{ClockDevice, FileDevice, FujiDevice};
use fujinet_disk::DiskDevice;
use fujinet_fs::{LocalFilesystem, StorageManager};
use fujinet_modem::ModemDevice;
use fujinet_net::NetworkDevice;
use fujinet_wire::IORequest;
use tracing::info;

const DEVICE_FUJI: u8 = 0xF0;
const DEVICE_FILE: u8 = 0xF3;
const DEVICE_CLOCK: u8 = 0xF4;
const DEVICE_DISK: u8 = 0xF1;
const DEVICE_NETWORK: u8 = 0xFD;
const DEVICE_MODEM: u8 = 0xF5;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let host_root = std::env::current_dir().expect("current directory must be readable");
    let mut storage = StorageManager::new();
    storage.register(Arc::new(LocalFilesystem::new("host", &host_root)));
    let storage = Arc::new(storage);

    let mut bus = DeviceBus::new();
    bus.register(DEVICE_FUJI, Box::new(FujiDevice::new(Box::new(|| info!("reset requested"))))).unwrap();
    bus.register(DEVICE_CLOCK, Box::new(ClockDevice::default())).unwrap();
    bus.register(DEVICE_FILE, Box::new(FileDevice::new(storage.clone()))).unwrap();
    bus.register(DEVICE_DISK, Box::new(DiskDevice::new(storage.clone()))).unwrap();
    bus.register(DEVICE_NETWORK, Box::new(NetworkDevice::default())).unwrap();
    bus.register(DEVICE_MODEM, Box::new(ModemDevice::new())).unwrap();

    info!("bus assembled, dispatching a reset");
    let reset = IORequest::new(1, DEVICE_FUJI, fujinet_devices::fuji::OP_RESET, Vec::new());
    let resp = bus.dispatch(reset);
    info!(status = ?resp.status, "reset complete");

    bus.poll_all();
    info!("one poll tick complete, exiting");
}
