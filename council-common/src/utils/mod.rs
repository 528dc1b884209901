//! utils.rs
//!
//! Common types and helpers shared across the council crates.

pub mod node_id;
pub use node_id::NodeId;

pub mod time;
