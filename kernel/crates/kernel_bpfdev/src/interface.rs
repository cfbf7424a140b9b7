//! Network interface seam.
//!
//! Capture devices attach to interfaces by name. The interface delivers
//! packets through [`DeviceRegistry::tap`](crate::DeviceRegistry::tap)
//! and accepts frames written by consumers.

use crate::DeviceError;

/// Index of an interface in the registry's interface table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IfIndex(pub(crate) u32);

/// Direction of a packet relative to the local host.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Received from the link
    Inbound,
    /// Generated locally and sent out
    Outbound,
}

/// A link that capture devices can attach to.
pub trait NetInterface: Send + Sync {
    /// Name consumers attach by.
    fn name(&self) -> &str;

    /// Data-link type of captured frames.
    fn dlt(&self) -> u32;

    /// Length of the link-layer header.
    fn hdrlen(&self) -> usize;

    /// Largest payload the link carries after its header.
    fn mtu(&self) -> usize;

    /// Enable or disable promiscuous receipt. Calls are paired.
    fn set_promiscuous(&self, enable: bool) -> Result<(), DeviceError>;

    /// Send one frame. With `hdr_complete` the link header in `frame` is
    /// used as is; otherwise the interface fills in its source address.
    fn transmit(&self, frame: &[u8], hdr_complete: bool) -> Result<(), DeviceError>;
}
