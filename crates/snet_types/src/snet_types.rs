//! Snet Types - Core data model for the acquisition pipeline
//!
//! This crate contains the pure data structures shared by the pipeline,
//! the virtual address engine and the message-queue host:
//!
//! - [`Value`] - tagged union of every supported scalar and array kind
//! - [`DataType`] - declared type tag of an address
//! - [`Quality`] - confidence classification of an evaluated value
//! - [`AddressDetails`] / [`AddressValue`] - per-address descriptor and result
//! - [`convert`] - raw value + declared type -> typed value + quality

mod address;
mod convert;
mod quality;
mod types;
mod value;

pub use address::*;
pub use convert::*;
pub use quality::*;
pub use types::*;
pub use value::*;
