//! Store and hold buffers.
//!
//! Packets are appended to the store buffer. When it fills, and the hold
//! buffer is free, the two are swapped and the full one waits in hold for
//! a reader. A reader always receives a whole buffer.
//!
//! Each record is a [`BpfHdr`] truncated to [`SIZEOF_BPF_HDR`] bytes and
//! padded to [`BPF_HDRLEN`], followed by the captured bytes. Records start
//! on [`BPF_ALIGNMENT`] boundaries.

extern crate alloc;

use alloc::vec::Vec;
use core::mem;

use kernel_abi::{BPF_HDRLEN, BpfHdr, BpfTimeval, SIZEOF_BPF_HDR, bpf_wordalign};
use kernel_bpf::Packet;
use zerocopy::{FromBytes, IntoBytes};

use crate::DeviceError;

/// Result of offering a packet to the buffers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Append {
    /// The record was written; `rotated` tells whether the store buffer
    /// was moved to hold to make room.
    Stored { rotated: bool },
    /// No room in store and hold still occupied.
    Dropped,
}

#[derive(Debug)]
pub struct CaptureBuffers {
    capacity: usize,
    store: Vec<u8>,
    hold: Vec<u8>,
}

impl CaptureBuffers {
    /// Allocate both buffers up front.
    pub fn allocate(capacity: usize) -> Result<Self, DeviceError> {
        let mut store = Vec::new();
        let mut hold = Vec::new();
        store
            .try_reserve_exact(capacity)
            .map_err(|_| DeviceError::OutOfMemory)?;
        hold.try_reserve_exact(capacity)
            .map_err(|_| DeviceError::OutOfMemory)?;
        Ok(Self {
            capacity,
            store,
            hold,
        })
    }

    /// Buffers with `hold` already filled and no memory reserved.
    #[cfg(test)]
    pub(crate) fn with_hold(capacity: usize, hold: Vec<u8>) -> Self {
        Self {
            capacity,
            store: Vec::new(),
            hold,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn store_len(&self) -> usize {
        self.store.len()
    }

    pub fn hold_len(&self) -> usize {
        self.hold.len()
    }

    /// True when no further record can start in the store buffer.
    pub fn is_store_full(&self) -> bool {
        bpf_wordalign(self.store.len()) + BPF_HDRLEN > self.capacity
    }

    /// Discard everything buffered.
    pub fn reset(&mut self) {
        self.store.clear();
        self.hold.clear();
    }

    /// Move the store buffer to hold. Only possible while hold is empty.
    pub fn rotate(&mut self) -> bool {
        if !self.hold.is_empty() {
            return false;
        }
        mem::swap(&mut self.store, &mut self.hold);
        true
    }

    /// Hand the hold buffer to a reader, leaving an empty one in its place.
    ///
    /// When the replacement cannot be allocated the records stay in hold
    /// and [`DeviceError::OutOfMemory`] is returned.
    pub fn take_hold(&mut self) -> Result<Option<Vec<u8>>, DeviceError> {
        if self.hold.is_empty() {
            return Ok(None);
        }
        let mut fresh = Vec::new();
        fresh.try_reserve_exact(self.capacity).map_err(|_| {
            log::warn!("capture buffer allocation of {} bytes failed", self.capacity);
            DeviceError::OutOfMemory
        })?;
        Ok(Some(mem::replace(&mut self.hold, fresh)))
    }

    /// Append a record for `packet`, capturing at most `snaplen` bytes.
    pub fn append(&mut self, packet: &Packet<'_>, snaplen: u32, tstamp: BpfTimeval) -> Append {
        let mut caplen = (snaplen as usize).min(packet.buflen());
        let mut totlen = BPF_HDRLEN + caplen;
        if totlen > self.capacity {
            totlen = self.capacity;
            caplen = totlen.saturating_sub(BPF_HDRLEN);
        }

        let mut rotated = false;
        let mut curlen = bpf_wordalign(self.store.len());
        if curlen + totlen > self.capacity {
            if !self.rotate() {
                return Append::Dropped;
            }
            rotated = true;
            curlen = 0;
        }

        let datalen = u32::try_from(packet.wirelen()).unwrap_or(u32::MAX);
        let hdr = BpfHdr::new(tstamp, caplen as u32, datalen, BPF_HDRLEN as u16);

        self.store.resize(curlen + totlen, 0);
        let record = &mut self.store[curlen..];
        record[..SIZEOF_BPF_HDR].copy_from_slice(&hdr.as_bytes()[..SIZEOF_BPF_HDR]);
        let copied = packet.copy_to(0, &mut record[BPF_HDRLEN..]);
        debug_assert_eq!(copied, caplen);

        Append::Stored { rotated }
    }
}

/// Iterate over the records of a buffer returned by a read.
///
/// Yields the header and the captured bytes of each record. Stops at the
/// first record that does not fit, and at a header shorter than
/// [`SIZEOF_BPF_HDR`], which covers zero padding after the last record.
pub fn records(buf: &[u8]) -> impl Iterator<Item = (BpfHdr, &[u8])> {
    let mut offset = 0;
    core::iter::from_fn(move || {
        let rest = buf.get(offset..)?;
        let mut raw = [0u8; size_of::<BpfHdr>()];
        raw[..SIZEOF_BPF_HDR].copy_from_slice(rest.get(..SIZEOF_BPF_HDR)?);
        let hdr = BpfHdr::read_from_bytes(&raw).ok()?;
        let start = usize::from(hdr.hdrlen);
        if start < SIZEOF_BPF_HDR {
            return None;
        }
        let end = start.checked_add(hdr.caplen as usize)?;
        let data = rest.get(start..end)?;
        offset += bpf_wordalign(end);
        Some((hdr, data))
    })
}
