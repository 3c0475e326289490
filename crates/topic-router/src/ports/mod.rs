//! Ports: contracts with the systems the router depends on.

pub mod outbound;

pub use outbound::{DeliveryCallback, PhysicalQueue};
