//! Snet
//!
//! Data-acquisition middleware core:
//!
//! - [`transform`]: optional method or script transform after conversion
//! - [`virtual_address`]: synthetic values for addresses without hardware
//! - [`dispatch`]: conversion, transform and republication of a reading
//! - [`config`]: layered configuration and address tables
//!
//! Type conversion lives in `snet_types`; the plugin messaging host lives in
//! `snet_mq`.

pub mod config;
pub mod dispatch;
pub mod js;
pub mod transform;
pub mod virtual_address;

pub use config::{ConfigError, EngineConfig, SnetConfig, load_addresses};
pub use dispatch::Dispatcher;
pub use transform::{TransformError, TransformStage, Transformed};
pub use virtual_address::{Directive, Mode, VirtualEngine, VirtualError};
