//! Background tasks for the signal relay.
//!
//! - `bus_bridge` - Subscribes to the bus and fans messages out to local sockets

pub mod bus_bridge;

pub use bus_bridge::{BridgeHandle, BusBridge};
