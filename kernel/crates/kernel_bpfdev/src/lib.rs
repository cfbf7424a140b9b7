//! Packet Capture Devices
//!
//! Consumers open a capture device, attach it to a network interface,
//! optionally install a classic BPF filter, and read batches of captured
//! packets. Every packet crossing the interface is run through the filter
//! and, when accepted, appended to the device's store buffer as a
//! [`BpfHdr`](kernel_abi::BpfHdr)-prefixed record.
//!
//! # Buffering
//!
//! ```text
//!   tap ──▶ filter ──▶ store ──rotate──▶ hold ──read──▶ consumer
//! ```
//!
//! A read always returns one whole hold buffer. When the store buffer
//! fills while hold is still unread, further packets are dropped and
//! counted.
//!
//! # Blocking
//!
//! Nothing here blocks. A read that finds no data is suspended on the
//! device and completed later, by new data, a timeout, cancellation or
//! the interface going away, as a [`Reply`] collected with
//! [`DeviceRegistry::take_replies`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use jiff::Timestamp;
//! use kernel_bpf::Packet;
//! use kernel_bpfdev::{
//!     ConsumerId, Control, ControlReply, DeviceRegistry, Direction, Loopback, ManualClock,
//!     ReadRequest, ReadStatus, RequestId,
//! };
//!
//! let clock = Arc::new(ManualClock::new(Timestamp::UNIX_EPOCH));
//! let mut registry = DeviceRegistry::new(clock);
//! let lo = registry.add_interface(Arc::new(Loopback::new("lo0")));
//!
//! let dev = registry.open().unwrap();
//! registry.control(dev, Control::SetInterface("lo0")).unwrap();
//! registry.control(dev, Control::SetImmediate(true)).unwrap();
//! let ControlReply::Len(size) = registry.control(dev, Control::GetBufferLen).unwrap() else {
//!     unreachable!()
//! };
//!
//! registry.tap(lo, &Packet::new(&[0x45, 0, 0, 20]), Direction::Inbound);
//!
//! let read = ReadRequest::new(ConsumerId(1), RequestId(1), size as usize);
//! let ReadStatus::Ready(records) = registry.read(dev, read).unwrap() else {
//!     unreachable!()
//! };
//! assert_eq!(kernel_bpfdev::records(&records).count(), 1);
//! ```

#![no_std]

extern crate alloc;

mod buffer;
mod control;
mod device;
mod error;
mod interface;
mod loopback;
mod registry;
mod request;
mod timer;

pub use buffer::records;
pub use control::{Control, ControlReply};
pub use device::{CaptureDevice, DeviceFlags, Transmitted};
pub use error::DeviceError;
pub use interface::{Direction, IfIndex, NetInterface};
pub use loopback::{LOOPBACK_MTU, Loopback};
pub use registry::{DeviceHandle, DeviceRegistry};
pub use request::{ConsumerId, DeviceCtx, ReadRequest, ReadStatus, Reply, RequestId};
pub use timer::{Clock, ManualClock, TimerHandle, TimerQueue, deadline_after};
