//! Device Registry
//!
//! A fixed pool of capture device slots plus the interface table they
//! attach to. Handles carry the slot generation so a handle kept past
//! close is rejected instead of reaching the slot's next owner.
//!
//! The registry also owns everything devices share while handling a
//! call: the clock, the timer queue and the reply outbox.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use jiff::Timestamp;
use kernel_abi::{BpfStat, NR_BPFDEV, SelectOps};
use kernel_bpf::Packet;

use crate::control::{Control, ControlReply};
use crate::device::CaptureDevice;
use crate::interface::{Direction, IfIndex, NetInterface};
use crate::request::{ConsumerId, DeviceCtx, ReadRequest, ReadStatus, Reply, RequestId};
use crate::timer::{Clock, TimerQueue};
use crate::DeviceError;

/// Opaque handle to an open capture device.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle {
    index: u32,
    generation: u32,
}

impl DeviceHandle {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

struct Slot {
    generation: u32,
    device: Option<CaptureDevice>,
}

struct IfEntry {
    iface: Arc<dyn NetInterface>,
    /// Attached devices, in attach order.
    listeners: Vec<DeviceHandle>,
}

pub struct DeviceRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    interfaces: Vec<Option<IfEntry>>,
    timers: TimerQueue<DeviceHandle>,
    replies: VecDeque<Reply>,
    clock: Arc<dyn Clock>,
    /// Statistics of devices already closed.
    retired: BpfStat,
}

impl DeviceRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(NR_BPFDEV, clock)
    }

    pub fn with_capacity(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                device: None,
            })
            .collect();
        // lowest index is handed out first
        let free = (0..capacity as u32).rev().collect();
        Self {
            slots,
            free,
            interfaces: Vec::new(),
            timers: TimerQueue::new(),
            replies: VecDeque::new(),
            clock,
            retired: BpfStat::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn open(&mut self) -> Result<DeviceHandle, DeviceError> {
        let index = self.free.pop().ok_or(DeviceError::NoFreeSlots)?;
        let slot = &mut self.slots[index as usize];
        slot.device = Some(CaptureDevice::new());
        log::debug!("opened capture device {index}");
        Ok(DeviceHandle::new(index, slot.generation))
    }

    /// Close a device and return its slot to the pool.
    ///
    /// A suspended read must be cancelled first.
    pub fn close(&mut self, handle: DeviceHandle) -> Result<(), DeviceError> {
        let slot = self.slot_mut(handle)?;
        let Some(device) = slot.device.as_mut() else {
            return Err(DeviceError::BadHandle);
        };
        let ifindex = device.ifindex();
        let stats = device.close()?;
        slot.device = None;
        slot.generation = slot.generation.wrapping_add(1);

        self.retired.recv += stats.recv;
        self.retired.drop += stats.drop;
        self.retired.capt += stats.capt;
        if let Some(entry) = ifindex.and_then(|idx| self.entry_mut(idx)) {
            entry.listeners.retain(|h| *h != handle);
        }
        self.free.push(handle.index);
        Ok(())
    }

    fn slot_mut(&mut self, handle: DeviceHandle) -> Result<&mut Slot, DeviceError> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.device.is_some())
            .ok_or(DeviceError::BadHandle)
    }

    fn entry_mut(&mut self, ifindex: IfIndex) -> Option<&mut IfEntry> {
        self.interfaces.get_mut(ifindex.0 as usize)?.as_mut()
    }

    /// Borrow a device together with the shared state it may touch.
    fn split(
        &mut self,
        handle: DeviceHandle,
    ) -> Result<(&mut CaptureDevice, DeviceCtx<'_>), DeviceError> {
        let now = self.clock.now();
        let device = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.device.as_mut())
            .ok_or(DeviceError::BadHandle)?;
        let ctx = DeviceCtx {
            now,
            owner: handle,
            timers: &mut self.timers,
            replies: &mut self.replies,
        };
        Ok((device, ctx))
    }

    pub fn device(&self, handle: DeviceHandle) -> Result<&CaptureDevice, DeviceError> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.device.as_ref())
            .ok_or(DeviceError::BadHandle)
    }

    pub fn control(
        &mut self,
        handle: DeviceHandle,
        request: Control<'_>,
    ) -> Result<ControlReply, DeviceError> {
        let Control::SetInterface(name) = request else {
            let (device, _) = self.split(handle)?;
            return device.control(request);
        };

        if !self.device(handle)?.is_unbound() {
            return Err(DeviceError::InvalidArgument);
        }
        let (ifindex, iface) = self
            .interfaces
            .iter()
            .enumerate()
            .find_map(|(idx, entry)| {
                let entry = entry.as_ref()?;
                (entry.iface.name() == name).then(|| (IfIndex(idx as u32), entry.iface.clone()))
            })
            .ok_or(DeviceError::NoSuchInterface)?;

        let (device, _) = self.split(handle)?;
        device.attach(ifindex, iface)?;
        if let Some(entry) = self.entry_mut(ifindex) {
            entry.listeners.push(handle);
        }
        Ok(ControlReply::Done)
    }

    pub fn read(
        &mut self,
        handle: DeviceHandle,
        request: ReadRequest,
    ) -> Result<ReadStatus, DeviceError> {
        let (device, mut ctx) = self.split(handle)?;
        device.read(request, &mut ctx)
    }

    /// Cancel a suspended read. Returns false when no such read exists.
    pub fn cancel(
        &mut self,
        handle: DeviceHandle,
        consumer: ConsumerId,
        id: RequestId,
    ) -> Result<bool, DeviceError> {
        let (device, mut ctx) = self.split(handle)?;
        Ok(device.cancel(consumer, id, &mut ctx))
    }

    pub fn select(
        &mut self,
        handle: DeviceHandle,
        consumer: ConsumerId,
        ops: SelectOps,
        notify: bool,
    ) -> Result<SelectOps, DeviceError> {
        let (device, _) = self.split(handle)?;
        Ok(device.select(consumer, ops, notify))
    }

    /// Send a frame and offer it back to the devices on the same interface.
    pub fn write(&mut self, handle: DeviceHandle, frame: &[u8]) -> Result<usize, DeviceError> {
        let (device, _) = self.split(handle)?;
        let Some(sent) = device.write(frame)? else {
            return Ok(0);
        };
        let direction = if sent.feedback {
            Direction::Inbound
        } else {
            Direction::Outbound
        };
        self.tap(sent.ifindex, &Packet::new(frame), direction);
        Ok(frame.len())
    }

    pub fn add_interface(&mut self, iface: Arc<dyn NetInterface>) -> IfIndex {
        log::debug!("interface {} registered", iface.name());
        let entry = IfEntry {
            iface,
            listeners: Vec::new(),
        };
        if let Some(idx) = self.interfaces.iter().position(Option::is_none) {
            self.interfaces[idx] = Some(entry);
            IfIndex(idx as u32)
        } else {
            self.interfaces.push(Some(entry));
            IfIndex(self.interfaces.len() as u32 - 1)
        }
    }

    /// Unregister an interface, detaching every device attached to it.
    pub fn remove_interface(&mut self, ifindex: IfIndex) -> Result<(), DeviceError> {
        let entry = self
            .interfaces
            .get_mut(ifindex.0 as usize)
            .and_then(Option::take)
            .ok_or(DeviceError::NoSuchInterface)?;
        log::debug!(
            "interface {} removed, detaching {} devices",
            entry.iface.name(),
            entry.listeners.len()
        );
        for handle in entry.listeners {
            if let Ok((device, mut ctx)) = self.split(handle) {
                device.detach(&mut ctx);
            }
        }
        Ok(())
    }

    /// Deliver one packet to every device attached to `ifindex`.
    pub fn tap(&mut self, ifindex: IfIndex, packet: &Packet<'_>, direction: Direction) {
        let count = self.entry_mut(ifindex).map_or(0, |e| e.listeners.len());
        for i in 0..count {
            let Some(handle) = self.entry_mut(ifindex).map(|e| e.listeners[i]) else {
                break;
            };
            if let Ok((device, mut ctx)) = self.split(handle) {
                device.ingest(packet, direction, &mut ctx);
            }
        }
    }

    /// Fire every read timeout that is due. Returns how many fired.
    pub fn expire_timers(&mut self) -> usize {
        let fired = self.timers.expire(self.clock.now());
        for &handle in &fired {
            if let Ok((device, mut ctx)) = self.split(handle) {
                device.timer_expired(&mut ctx);
            }
        }
        fired.len()
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.timers.next_deadline()
    }

    /// Completions produced since the last call, oldest first.
    pub fn take_replies(&mut self) -> Vec<Reply> {
        self.replies.drain(..).collect()
    }

    /// Statistics summed over open and closed devices.
    pub fn totals(&self) -> BpfStat {
        self.slots
            .iter()
            .filter_map(|slot| slot.device.as_ref())
            .map(CaptureDevice::stats)
            .fold(self.retired, |mut acc, s| {
                acc.recv += s.recv;
                acc.drop += s.drop;
                acc.capt += s.capt;
                acc
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::Loopback;
    use crate::timer::ManualClock;

    fn registry(capacity: usize) -> DeviceRegistry {
        let clock = Arc::new(ManualClock::new(Timestamp::UNIX_EPOCH));
        DeviceRegistry::with_capacity(capacity, clock)
    }

    #[test]
    fn slots_are_reused_with_new_generation() {
        let mut reg = registry(2);
        let a = reg.open().unwrap();
        let b = reg.open().unwrap();
        assert_eq!(reg.open(), Err(DeviceError::NoFreeSlots));

        reg.close(a).unwrap();
        assert_eq!(reg.close(a), Err(DeviceError::BadHandle));
        let c = reg.open().unwrap();
        assert_eq!(c.index(), a.index());
        assert_ne!(c, a);
        assert_eq!(reg.control(a, Control::GetBufferLen), Err(DeviceError::BadHandle));
        assert!(reg.device(b).is_ok());
    }

    #[test]
    fn attach_by_name() {
        let mut reg = registry(2);
        reg.add_interface(Arc::new(Loopback::new("lo0")));
        let h = reg.open().unwrap();
        assert_eq!(
            reg.control(h, Control::SetInterface("eth0")),
            Err(DeviceError::NoSuchInterface)
        );
        assert_eq!(reg.control(h, Control::SetInterface("lo0")), Ok(ControlReply::Done));
        assert_eq!(
            reg.control(h, Control::SetInterface("lo0")),
            Err(DeviceError::InvalidArgument)
        );
    }

    #[test]
    fn totals_include_closed_devices() {
        let mut reg = registry(2);
        let lo = reg.add_interface(Arc::new(Loopback::new("lo0")));
        let a = reg.open().unwrap();
        let b = reg.open().unwrap();
        reg.control(a, Control::SetInterface("lo0")).unwrap();
        reg.control(b, Control::SetInterface("lo0")).unwrap();

        reg.tap(lo, &Packet::new(&[1, 2, 3]), Direction::Inbound);
        reg.close(a).unwrap();
        reg.tap(lo, &Packet::new(&[1, 2, 3]), Direction::Inbound);

        let totals = reg.totals();
        assert_eq!(totals.recv, 3);
        assert_eq!(totals.capt, 3);
    }

    #[test]
    fn interface_slots_are_reused() {
        let mut reg = registry(1);
        let first = reg.add_interface(Arc::new(Loopback::new("lo0")));
        reg.remove_interface(first).unwrap();
        assert_eq!(reg.remove_interface(first), Err(DeviceError::NoSuchInterface));
        assert_eq!(reg.add_interface(Arc::new(Loopback::new("lo1"))), first);
    }
}
