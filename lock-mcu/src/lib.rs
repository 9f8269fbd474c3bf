//! Lock MCU Library
//!
//! The lock side of the protocol, independent of any BLE stack:
//! - decoding and authorizing writes to the lock service
//! - paging list responses into chunked notifications
//! - traits for key and event storage
//!
//! Firmware feeds characteristic reads and writes in, acts on the returned
//! [`LockCommand`] (drives the actuator for `Unlock`) and sends the returned
//! notification values.

pub mod ble;
pub mod storage;

pub use ble::*;
pub use storage::*;
