//! Capture Device
//!
//! One device per open. A device starts unbound, gains buffers and an
//! interface on attach, and keeps its buffers after the interface goes
//! away so the last packets can still be read.
//!
//! ```text
//!  Unbound ──attach──▶ Live ──detach──▶ Gone
//!     │                  │                │
//!     └──────────────────┴──── close ─────┘
//! ```
//!
//! Reads that cannot be satisfied are suspended and completed later
//! through the reply outbox of the [`DeviceCtx`] they were issued with.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::time::Duration;

use bitflags::bitflags;
use jiff::Timestamp;
use kernel_abi::{BPF_DFLTBUFSIZE, BpfStat, BpfTimeval, SelectOps};
use kernel_bpf::bytecode::decode_program;
use kernel_bpf::{Packet, Program, filter};

use crate::buffer::{Append, CaptureBuffers};
use crate::interface::{Direction, IfIndex, NetInterface};
use crate::request::{
    ConsumerId, DeviceCtx, PendingRead, PendingSelect, ReadRequest, ReadStatus, RequestId,
};
use crate::timer::deadline_after;
use crate::DeviceError;

bitflags! {
    /// Per-device configuration.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct DeviceFlags: u32 {
        /// The interface was put in promiscuous mode for this device
        const PROMISC = 1 << 0;
        /// Satisfy reads as soon as any packet is buffered
        const IMMEDIATE = 1 << 1;
        /// Also capture locally generated traffic
        const SEE_SENT = 1 << 2;
        /// Written frames carry a complete link header
        const HDR_COMPLETE = 1 << 3;
        /// Written frames are also received
        const FEEDBACK = 1 << 4;
    }
}

impl Default for DeviceFlags {
    fn default() -> Self {
        Self::SEE_SENT
    }
}

pub(crate) enum Attachment {
    Unbound,
    Live {
        ifindex: IfIndex,
        iface: Arc<dyn NetInterface>,
    },
    /// The interface disappeared. Buffers are kept for draining.
    Gone,
}

/// A frame accepted by an interface, to be offered back to listeners.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Transmitted {
    pub ifindex: IfIndex,
    pub feedback: bool,
}

pub struct CaptureDevice {
    pub(crate) attachment: Attachment,
    pub(crate) bufsize: u32,
    buffers: Option<CaptureBuffers>,
    program: Option<Program>,
    pub(crate) flags: DeviceFlags,
    pub(crate) read_timeout: Option<Duration>,
    pending_read: Option<PendingRead>,
    pending_select: Option<PendingSelect>,
    pub(crate) stats: BpfStat,
}

impl Default for CaptureDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice {
    pub fn new() -> Self {
        Self {
            attachment: Attachment::Unbound,
            bufsize: BPF_DFLTBUFSIZE,
            buffers: None,
            program: None,
            flags: DeviceFlags::default(),
            read_timeout: None,
            pending_read: None,
            pending_select: None,
            stats: BpfStat::default(),
        }
    }

    pub fn flags(&self) -> DeviceFlags {
        self.flags
    }

    pub fn stats(&self) -> BpfStat {
        self.stats
    }

    pub fn buffer_len(&self) -> u32 {
        self.bufsize
    }

    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    pub fn is_unbound(&self) -> bool {
        matches!(self.attachment, Attachment::Unbound)
    }

    /// True after the interface has gone away.
    pub fn is_gone(&self) -> bool {
        matches!(self.attachment, Attachment::Gone)
    }

    /// Interface this device is attached to, while it exists.
    pub fn ifindex(&self) -> Option<IfIndex> {
        match self.attachment {
            Attachment::Live { ifindex, .. } => Some(ifindex),
            _ => None,
        }
    }

    /// Bytes in (store, hold).
    pub fn buffered(&self) -> (usize, usize) {
        self.buffers
            .as_ref()
            .map_or((0, 0), |b| (b.store_len(), b.hold_len()))
    }

    pub fn has_pending_read(&self) -> bool {
        self.pending_read.is_some()
    }

    pub(crate) fn live_iface(&self) -> Result<&Arc<dyn NetInterface>, DeviceError> {
        match &self.attachment {
            Attachment::Live { iface, .. } => Ok(iface),
            _ => Err(DeviceError::InvalidArgument),
        }
    }

    /// Bind to an interface and allocate the buffers.
    ///
    /// Allowed once per device lifetime.
    pub fn attach(
        &mut self,
        ifindex: IfIndex,
        iface: Arc<dyn NetInterface>,
    ) -> Result<(), DeviceError> {
        if !self.is_unbound() {
            return Err(DeviceError::InvalidArgument);
        }
        self.buffers = Some(CaptureBuffers::allocate(self.bufsize as usize)?);
        log::debug!(
            "capture device attached to {} with {} byte buffers",
            iface.name(),
            self.bufsize
        );
        self.attachment = Attachment::Live { ifindex, iface };
        Ok(())
    }

    /// Install a filter from its wire encoding. An empty encoding, or one
    /// with zero instructions, removes the filter.
    ///
    /// On success buffers and statistics are reset. On failure nothing
    /// changes.
    pub fn set_filter(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        let program = if bytes.is_empty() {
            None
        } else {
            let raw = decode_program(bytes)?;
            if raw.is_empty() {
                None
            } else {
                Some(Program::new(&raw)?)
            }
        };
        log::debug!(
            "installing filter of {} instructions",
            program.as_ref().map_or(0, Program::len)
        );
        self.program = program;
        self.flush();
        Ok(())
    }

    /// Discard buffered packets and zero the statistics.
    pub fn flush(&mut self) {
        if let Some(buffers) = self.buffers.as_mut() {
            buffers.reset();
        }
        self.stats = BpfStat::default();
    }

    /// Offer one packet to the device.
    pub fn ingest(&mut self, packet: &Packet<'_>, direction: Direction, ctx: &mut DeviceCtx<'_>) {
        if direction == Direction::Outbound && !self.flags.contains(DeviceFlags::SEE_SENT) {
            return;
        }
        let Some(buffers) = self.buffers.as_mut() else {
            return;
        };
        self.stats.recv += 1;

        let snaplen = filter(self.program.as_ref(), packet);
        if snaplen == 0 {
            return;
        }

        let wake = match buffers.append(packet, snaplen, timeval(ctx.now)) {
            Append::Dropped => {
                self.stats.drop += 1;
                log::trace!("dropped {} byte packet, both buffers full", packet.wirelen());
                return;
            }
            Append::Stored { rotated } => {
                self.stats.capt += 1;
                rotated || buffers.is_store_full() || self.flags.contains(DeviceFlags::IMMEDIATE)
            }
        };
        if wake {
            self.wake(ctx);
        }
    }

    /// Whether a read issued now would return without suspending.
    pub fn read_ready(&self) -> bool {
        if !matches!(self.attachment, Attachment::Live { .. }) {
            return true;
        }
        let Some(buffers) = self.buffers.as_ref() else {
            return true;
        };
        buffers.hold_len() > 0
            || buffers.is_store_full()
            || (self.flags.contains(DeviceFlags::IMMEDIATE) && buffers.store_len() > 0)
    }

    /// Bytes a read would return right now.
    pub fn bytes_available(&self) -> usize {
        let Some(buffers) = self.buffers.as_ref() else {
            return 0;
        };
        if buffers.hold_len() > 0 {
            buffers.hold_len()
        } else if self.flags.contains(DeviceFlags::IMMEDIATE) {
            buffers.store_len()
        } else {
            0
        }
    }

    /// Rotate when allowed and take the hold buffer.
    fn take_readable(&mut self, force: bool) -> Result<Option<Vec<u8>>, DeviceError> {
        let Some(buffers) = self.buffers.as_mut() else {
            return Ok(None);
        };
        if buffers.hold_len() == 0
            && buffers.store_len() > 0
            && (force || buffers.is_store_full())
        {
            buffers.rotate();
        }
        buffers.take_hold()
    }

    pub fn read(
        &mut self,
        request: ReadRequest,
        ctx: &mut DeviceCtx<'_>,
    ) -> Result<ReadStatus, DeviceError> {
        let Some(buffers) = self.buffers.as_ref() else {
            return Err(DeviceError::InvalidArgument);
        };
        if request.size != buffers.capacity() {
            return Err(DeviceError::InvalidArgument);
        }
        if self.pending_read.is_some() {
            return Err(DeviceError::Busy);
        }

        let gone = self.is_gone();
        let force = request.nonblock || gone || self.flags.contains(DeviceFlags::IMMEDIATE);
        if let Some(data) = self.take_readable(force)? {
            return Ok(ReadStatus::Ready(data));
        }
        if gone {
            return Err(DeviceError::Io);
        }
        if request.nonblock {
            return Err(DeviceError::WouldBlock);
        }

        let timer = match self.read_timeout {
            Some(timeout) => Some(ctx.timers.arm(deadline_after(ctx.now, timeout)?, ctx.owner)),
            None => None,
        };
        self.pending_read = Some(PendingRead {
            consumer: request.consumer,
            id: request.id,
            timer,
        });
        Ok(ReadStatus::Suspended)
    }

    /// Cancel the suspended read if it is the one named. The read is
    /// completed with [`DeviceError::Interrupted`].
    pub fn cancel(&mut self, consumer: ConsumerId, id: RequestId, ctx: &mut DeviceCtx<'_>) -> bool {
        let Some(pending) = self
            .pending_read
            .take_if(|p| p.consumer == consumer && p.id == id)
        else {
            return false;
        };
        ctx.reply_read(pending, Err(DeviceError::Interrupted));
        true
    }

    /// Report which of `ops` are ready. With `notify`, the rest are
    /// remembered and reported once through the outbox, replacing any
    /// earlier remembered query.
    pub fn select(&mut self, consumer: ConsumerId, ops: SelectOps, notify: bool) -> SelectOps {
        let mut ready = ops & SelectOps::WRITE;
        if ops.contains(SelectOps::READ) && self.read_ready() {
            ready |= SelectOps::READ;
        }
        let waiting = ops - ready;
        if notify && !waiting.is_empty() {
            self.pending_select = Some(PendingSelect {
                consumer,
                ops: waiting,
            });
        }
        ready
    }

    /// Complete whatever can be completed now.
    fn wake(&mut self, ctx: &mut DeviceCtx<'_>) {
        if self.pending_read.is_some() {
            let force = self.flags.contains(DeviceFlags::IMMEDIATE);
            if let Some(result) = self.take_readable(force).transpose() {
                if let Some(pending) = self.pending_read.take() {
                    ctx.reply_read(pending, result);
                }
            }
        }
        if self.read_ready() {
            if let Some(select) = self
                .pending_select
                .take_if(|s| s.ops.contains(SelectOps::READ))
            {
                ctx.reply_select(select.consumer, SelectOps::READ);
            }
        }
    }

    /// The read timeout fired. Whatever is buffered is returned, otherwise
    /// the read completes with [`DeviceError::TimedOut`].
    pub fn timer_expired(&mut self, ctx: &mut DeviceCtx<'_>) {
        let Some(mut pending) = self.pending_read.take_if(|p| p.timer.is_some()) else {
            return;
        };
        // already removed from the queue
        pending.timer = None;
        let result = self
            .take_readable(true)
            .and_then(|data| data.ok_or(DeviceError::TimedOut));
        ctx.reply_read(pending, result);
    }

    /// The interface went away.
    pub fn detach(&mut self, ctx: &mut DeviceCtx<'_>) {
        if !matches!(self.attachment, Attachment::Live { .. }) {
            return;
        }
        self.attachment = Attachment::Gone;
        self.flags.remove(DeviceFlags::PROMISC);
        log::debug!("capture device lost its interface");

        // no more packets will arrive
        if let Some(buffers) = self.buffers.as_mut() {
            if buffers.hold_len() == 0 && buffers.store_len() > 0 {
                buffers.rotate();
            }
        }

        if let Some(pending) = self.pending_read.take() {
            let result = self
                .take_readable(true)
                .and_then(|data| data.ok_or(DeviceError::Io));
            ctx.reply_read(pending, result);
        }
        if let Some(select) = self.pending_select.take() {
            if select.ops.contains(SelectOps::READ) {
                ctx.reply_select(select.consumer, SelectOps::READ);
            }
        }
    }

    /// Release the device. Fails while a read is suspended.
    ///
    /// Returns the final statistics.
    pub fn close(&mut self) -> Result<BpfStat, DeviceError> {
        if self.pending_read.is_some() {
            log::warn!("refusing to close capture device with a suspended read");
            return Err(DeviceError::Busy);
        }
        self.pending_select = None;
        if let Attachment::Live { iface, .. } = &self.attachment {
            if self.flags.contains(DeviceFlags::PROMISC) {
                if let Err(err) = iface.set_promiscuous(false) {
                    log::warn!("{}: failed to leave promiscuous mode: {err}", iface.name());
                }
            }
        }
        self.attachment = Attachment::Unbound;
        self.buffers = None;
        self.program = None;
        self.flags = DeviceFlags::default();
        log::debug!("capture device closed");
        Ok(self.stats)
    }

    /// Send one frame through the attached interface.
    ///
    /// Returns `None` for an empty frame, which is accepted and ignored.
    pub fn write(&mut self, frame: &[u8]) -> Result<Option<Transmitted>, DeviceError> {
        let (ifindex, iface) = match &self.attachment {
            Attachment::Unbound => return Err(DeviceError::InvalidArgument),
            Attachment::Gone => return Err(DeviceError::NotAttached),
            Attachment::Live { ifindex, iface } => (*ifindex, iface),
        };
        if frame.is_empty() {
            return Ok(None);
        }
        if frame.len() > iface.hdrlen() + iface.mtu() {
            return Err(DeviceError::MessageTooLong);
        }
        iface.transmit(frame, self.flags.contains(DeviceFlags::HDR_COMPLETE))?;
        Ok(Some(Transmitted {
            ifindex,
            feedback: self.flags.contains(DeviceFlags::FEEDBACK),
        }))
    }
}

fn timeval(ts: Timestamp) -> BpfTimeval {
    BpfTimeval::new(ts.as_second(), i64::from(ts.subsec_microsecond()))
}

#[cfg(test)]
mod tests {
    use alloc::collections::VecDeque;
    use alloc::vec;

    use kernel_abi::{BPF_HDRLEN, BPF_MINBUFSIZE};

    use super::*;
    use crate::loopback::Loopback;
    use crate::registry::DeviceHandle;
    use crate::request::Reply;
    use crate::timer::TimerQueue;

    struct Harness {
        timers: TimerQueue<DeviceHandle>,
        replies: VecDeque<Reply>,
        now: Timestamp,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                timers: TimerQueue::new(),
                replies: VecDeque::new(),
                now: Timestamp::UNIX_EPOCH,
            }
        }

        fn ctx(&mut self) -> DeviceCtx<'_> {
            DeviceCtx {
                now: self.now,
                owner: DeviceHandle::new(0, 0),
                timers: &mut self.timers,
                replies: &mut self.replies,
            }
        }
    }

    fn bound(bufsize: u32) -> (CaptureDevice, Arc<Loopback>) {
        let lo = Arc::new(Loopback::new("lo0"));
        let mut dev = CaptureDevice::new();
        dev.bufsize = bufsize;
        dev.attach(IfIndex(0), lo.clone()).unwrap();
        (dev, lo)
    }

    fn request(size: u32) -> ReadRequest {
        ReadRequest::new(ConsumerId(1), RequestId(1), size as usize)
    }

    #[test]
    fn attach_only_once() {
        let (mut dev, lo) = bound(BPF_MINBUFSIZE);
        assert_eq!(dev.attach(IfIndex(1), lo), Err(DeviceError::InvalidArgument));
    }

    #[test]
    fn outbound_needs_see_sent() {
        let mut h = Harness::new();
        let (mut dev, _lo) = bound(1024);
        let pkt = [1u8; 8];
        dev.ingest(&Packet::new(&pkt), Direction::Outbound, &mut h.ctx());
        assert_eq!(dev.stats().recv, 1);

        dev.flags.remove(DeviceFlags::SEE_SENT);
        dev.ingest(&Packet::new(&pkt), Direction::Outbound, &mut h.ctx());
        assert_eq!(dev.stats().recv, 1);
        assert_eq!(dev.stats().capt, 1);
    }

    #[test]
    fn nonblocking_read_rotates_store() {
        let mut h = Harness::new();
        let (mut dev, _lo) = bound(1024);
        dev.ingest(&Packet::new(&[7u8; 4]), Direction::Inbound, &mut h.ctx());
        assert_eq!(dev.buffered(), (BPF_HDRLEN + 4, 0));

        let status = dev.read(request(1024).nonblocking(), &mut h.ctx()).unwrap();
        let ReadStatus::Ready(data) = status else {
            panic!("expected data");
        };
        assert_eq!(data.len(), BPF_HDRLEN + 4);
        assert_eq!(
            dev.read(request(1024).nonblocking(), &mut h.ctx()),
            Err(DeviceError::WouldBlock)
        );
    }

    #[test]
    fn read_size_must_match_buffer() {
        let mut h = Harness::new();
        let (mut dev, _lo) = bound(1024);
        assert_eq!(dev.read(request(512), &mut h.ctx()), Err(DeviceError::InvalidArgument));
        let mut unbound = CaptureDevice::new();
        assert_eq!(
            unbound.read(request(BPF_DFLTBUFSIZE), &mut h.ctx()),
            Err(DeviceError::InvalidArgument)
        );
    }

    #[test]
    fn second_read_is_busy() {
        let mut h = Harness::new();
        let (mut dev, _lo) = bound(1024);
        assert_eq!(dev.read(request(1024), &mut h.ctx()), Ok(ReadStatus::Suspended));
        assert_eq!(dev.read(request(1024), &mut h.ctx()), Err(DeviceError::Busy));
        assert_eq!(dev.close(), Err(DeviceError::Busy));
    }

    #[test]
    fn immediate_ingest_completes_suspended_read() {
        let mut h = Harness::new();
        let (mut dev, _lo) = bound(1024);
        dev.flags.insert(DeviceFlags::IMMEDIATE);
        assert_eq!(dev.read(request(1024), &mut h.ctx()), Ok(ReadStatus::Suspended));
        dev.ingest(&Packet::new(&[1, 2, 3]), Direction::Inbound, &mut h.ctx());

        let reply = h.replies.pop_front().unwrap();
        let Reply::Read { result: Ok(data), .. } = reply else {
            panic!("expected data, got {reply:?}");
        };
        assert_eq!(data.len(), BPF_HDRLEN + 3);
        assert!(!dev.has_pending_read());
    }

    #[test]
    fn timeout_fires_with_no_data() {
        let mut h = Harness::new();
        let (mut dev, _lo) = bound(1024);
        dev.read_timeout = Some(Duration::from_millis(10));
        assert_eq!(dev.read(request(1024), &mut h.ctx()), Ok(ReadStatus::Suspended));
        assert_eq!(h.timers.len(), 1);

        let later = h.now.checked_add(jiff::SignedDuration::from_millis(10)).unwrap();
        assert_eq!(h.timers.expire(later).len(), 1);
        dev.timer_expired(&mut h.ctx());
        assert!(matches!(
            h.replies.pop_front(),
            Some(Reply::Read { result: Err(DeviceError::TimedOut), .. })
        ));
    }

    #[test]
    fn cancel_matches_exact_request() {
        let mut h = Harness::new();
        let (mut dev, _lo) = bound(1024);
        dev.read_timeout = Some(Duration::from_secs(1));
        dev.read(request(1024), &mut h.ctx()).unwrap();
        assert!(!dev.cancel(ConsumerId(1), RequestId(2), &mut h.ctx()));
        assert!(!dev.cancel(ConsumerId(2), RequestId(1), &mut h.ctx()));
        assert!(dev.cancel(ConsumerId(1), RequestId(1), &mut h.ctx()));
        assert!(h.timers.is_empty());
        assert!(matches!(
            h.replies.pop_front(),
            Some(Reply::Read { result: Err(DeviceError::Interrupted), .. })
        ));
    }

    #[test]
    fn select_remembers_unready_ops() {
        let mut h = Harness::new();
        let (mut dev, _lo) = bound(1024);
        let all = SelectOps::READ | SelectOps::WRITE;
        assert_eq!(dev.select(ConsumerId(3), all, true), SelectOps::WRITE);

        dev.flags.insert(DeviceFlags::IMMEDIATE);
        dev.ingest(&Packet::new(&[1]), Direction::Inbound, &mut h.ctx());
        assert_eq!(
            h.replies.pop_front(),
            Some(Reply::Select {
                device: DeviceHandle::new(0, 0),
                consumer: ConsumerId(3),
                ready: SelectOps::READ
            })
        );
        assert_eq!(dev.select(ConsumerId(3), all, false), all);
    }

    #[test]
    fn detach_drains_then_fails() {
        let mut h = Harness::new();
        let (mut dev, _lo) = bound(1024);
        dev.ingest(&Packet::new(&[9; 5]), Direction::Inbound, &mut h.ctx());
        dev.read(request(1024), &mut h.ctx()).unwrap();
        dev.detach(&mut h.ctx());

        assert!(matches!(
            h.replies.pop_front(),
            Some(Reply::Read { result: Ok(ref data), .. }) if data.len() == BPF_HDRLEN + 5
        ));
        assert_eq!(dev.read(request(1024), &mut h.ctx()), Err(DeviceError::Io));
        assert_eq!(dev.write(&[1]), Err(DeviceError::NotAttached));
    }

    #[test]
    fn detach_rotates_store_for_later_reads() {
        let mut h = Harness::new();
        let (mut dev, _lo) = bound(1024);
        dev.ingest(&Packet::new(&[3; 40]), Direction::Inbound, &mut h.ctx());
        assert_eq!(dev.bytes_available(), 0);

        dev.detach(&mut h.ctx());
        assert_eq!(dev.buffered(), (0, BPF_HDRLEN + 40));
        assert_eq!(dev.bytes_available(), BPF_HDRLEN + 40);
        assert!(matches!(
            dev.read(request(1024), &mut h.ctx()),
            Ok(ReadStatus::Ready(ref data)) if data.len() == BPF_HDRLEN + 40
        ));
        assert_eq!(dev.read(request(1024), &mut h.ctx()), Err(DeviceError::Io));
    }

    #[test]
    fn read_reports_failed_buffer_allocation() {
        let mut h = Harness::new();
        let (mut dev, _lo) = bound(1024);
        dev.buffers = Some(CaptureBuffers::with_hold(usize::MAX, vec![0; 8]));
        let request = ReadRequest::new(ConsumerId(1), RequestId(1), usize::MAX).nonblocking();
        assert_eq!(dev.read(request, &mut h.ctx()), Err(DeviceError::OutOfMemory));
        assert!(dev.read_ready());
        assert_eq!(dev.buffered(), (0, 8));
    }

    #[test]
    fn write_limits() {
        let (mut dev, lo) = bound(1024);
        assert_eq!(dev.write(&[]), Ok(None));
        let big = vec![0u8; crate::loopback::LOOPBACK_MTU + 1];
        assert_eq!(dev.write(&big), Err(DeviceError::MessageTooLong));
        assert_eq!(
            dev.write(&[1, 2]),
            Ok(Some(Transmitted {
                ifindex: IfIndex(0),
                feedback: false
            }))
        );
        assert_eq!(lo.drain(), vec![vec![1, 2]]);
        assert_eq!(CaptureDevice::new().write(&[1]), Err(DeviceError::InvalidArgument));
    }
}
