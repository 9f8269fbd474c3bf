//! Lock BLE Controller
//!
//! BLE client for setting up, unlocking and managing locks.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lock_ble_controller::{BtleCentral, BtleConfig, LockClient};
//! use lock_proto::UnlockAction;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let central = BtleCentral::with_default_adapter(BtleConfig::default()).await?;
//!
//!     // Scan for locks
//!     for device in central.scan().await? {
//!         println!("{} ({})", device.name, device.address);
//!     }
//!
//!     let peripheral = central.find_device(None).await?;
//!     let client = LockClient::new(Arc::new(central), peripheral);
//!     println!("{:?}", client.read_information().await?);
//!
//!     // Unlock with a stored key
//!     client.unlock(&credentials, UnlockAction::Default).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod btle;
pub mod central;
mod error;
pub mod notify;
pub mod transaction;

pub use ble::LockClient;
pub use btle::{BtleCentral, BtleConfig, LockDevice};
pub use central::{Attribute, Central, ValueStream};
pub use error::{Error, Result};
pub use notify::NotificationStream;
pub use transaction::{Session, Transaction, TransactionState, with_connection};
