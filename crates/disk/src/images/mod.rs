pub mod atr;
pub mod dsd;
pub mod raw;
pub mod ssd;

pub use atr::AtrHandler;
pub use raw::RawHandler;
pub use ssd::SsdHandler;
