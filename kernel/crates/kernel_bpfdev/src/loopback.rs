//! Loopback interface.
//!
//! Frames written to the loopback are queued until the service loop
//! drains them and feeds them back in as received traffic.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use kernel_abi::DLT_RAW;
use spin::Mutex;

use crate::{DeviceError, NetInterface};

pub const LOOPBACK_MTU: usize = 65535;

/// Raw-IP loopback with no link header.
pub struct Loopback {
    name: String,
    mtu: usize,
    queue: Mutex<VecDeque<Vec<u8>>>,
    promisc: Mutex<usize>,
}

impl Loopback {
    pub fn new(name: &str) -> Self {
        Self::with_mtu(name, LOOPBACK_MTU)
    }

    pub fn with_mtu(name: &str, mtu: usize) -> Self {
        Self {
            name: String::from(name),
            mtu,
            queue: Mutex::new(VecDeque::new()),
            promisc: Mutex::new(0),
        }
    }

    /// Remove and return every frame transmitted so far, oldest first.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.queue.lock().drain(..).collect()
    }

    /// Number of devices currently holding the interface promiscuous.
    pub fn promisc_refs(&self) -> usize {
        *self.promisc.lock()
    }
}

impl NetInterface for Loopback {
    fn name(&self) -> &str {
        &self.name
    }

    fn dlt(&self) -> u32 {
        DLT_RAW
    }

    fn hdrlen(&self) -> usize {
        0
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn set_promiscuous(&self, enable: bool) -> Result<(), DeviceError> {
        let mut refs = self.promisc.lock();
        if enable {
            *refs += 1;
        } else {
            *refs = refs.checked_sub(1).ok_or(DeviceError::InvalidArgument)?;
        }
        Ok(())
    }

    fn transmit(&self, frame: &[u8], _hdr_complete: bool) -> Result<(), DeviceError> {
        self.queue.lock().push_back(frame.to_vec());
        Ok(())
    }
}
