//! Infrastructure layer for VantageEdge
//!
//! The configuration store and centralized log text.

pub mod log_messages;
pub mod store;

pub use store::{ConfigStore, StoreSeed};
