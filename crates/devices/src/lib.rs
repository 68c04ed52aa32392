//! The small, mostly-stateless bus devices that round out the peripheral
//! alongside `NetworkDevice`, `DiskDevice`, and `ModemDevice`: file access
//! over `StorageManager`, the real-time clock, and the config unit's own
//! `Reset` handling.

pub mod clock;
pub mod file;
pub mod fuji;

pub use clock::{ClockDevice, SystemTimeSource, TimeSource};
pub use file::FileDevice;
pub use fuji::FujiDevice;
