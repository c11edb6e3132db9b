//! Domain models for the capture layer.
//!
//! These types describe interfaces and link-layer addressing, independent
//! of the sockets that use them.

mod device;
mod link;

pub use device::DeviceInfo;
pub use link::{LinkBinding, LinkType, Protocol};
