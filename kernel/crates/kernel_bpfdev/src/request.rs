//! Suspended requests and their completions.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use jiff::Timestamp;
use kernel_abi::SelectOps;

use crate::registry::DeviceHandle;
use crate::timer::{TimerHandle, TimerQueue};
use crate::DeviceError;

/// Identity of the process issuing requests.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub u64);

/// Sequence number a consumer attaches to a read so it can cancel it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub consumer: ConsumerId,
    pub id: RequestId,
    /// Must equal the device's buffer length.
    pub size: usize,
    pub nonblock: bool,
}

impl ReadRequest {
    pub fn new(consumer: ConsumerId, id: RequestId, size: usize) -> Self {
        Self {
            consumer,
            id,
            size,
            nonblock: false,
        }
    }

    pub fn nonblocking(mut self) -> Self {
        self.nonblock = true;
        self
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct PendingRead {
    pub consumer: ConsumerId,
    pub id: RequestId,
    pub timer: Option<TimerHandle>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct PendingSelect {
    pub consumer: ConsumerId,
    pub ops: SelectOps,
}

/// Outcome of a read that did not complete synchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Read {
        device: DeviceHandle,
        consumer: ConsumerId,
        id: RequestId,
        result: Result<Vec<u8>, DeviceError>,
    },
    Select {
        device: DeviceHandle,
        consumer: ConsumerId,
        ready: SelectOps,
    },
}

/// Synchronous outcome of a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    /// The hold buffer, as is.
    Ready(Vec<u8>),
    /// Completion will arrive as a [`Reply::Read`].
    Suspended,
}

/// What a device may touch outside itself while handling one call.
pub struct DeviceCtx<'a> {
    pub(crate) now: Timestamp,
    pub(crate) owner: DeviceHandle,
    pub(crate) timers: &'a mut TimerQueue<DeviceHandle>,
    pub(crate) replies: &'a mut VecDeque<Reply>,
}

impl DeviceCtx<'_> {
    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub(crate) fn reply_read(&mut self, pending: PendingRead, result: Result<Vec<u8>, DeviceError>) {
        if let Some(timer) = pending.timer {
            self.timers.cancel(timer);
        }
        self.replies.push_back(Reply::Read {
            device: self.owner,
            consumer: pending.consumer,
            id: pending.id,
            result,
        });
    }

    pub(crate) fn reply_select(&mut self, consumer: ConsumerId, ready: SelectOps) {
        self.replies.push_back(Reply::Select {
            device: self.owner,
            consumer,
            ready,
        });
    }
}
