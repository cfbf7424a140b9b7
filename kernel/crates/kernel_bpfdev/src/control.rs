//! Control requests.
//!
//! Every configuration change and query a consumer can make on an open
//! device. Attaching by name needs the interface table and is resolved
//! by [`DeviceRegistry::control`](crate::DeviceRegistry::control).

extern crate alloc;

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use kernel_abi::{
    BPF_MAXBUFSIZE, BPF_MINBUFSIZE, BPF_TIMEOUT_TICK, BpfStat, BpfTimeval, BpfVersion,
};

use crate::device::{CaptureDevice, DeviceFlags};
use crate::DeviceError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Control<'a> {
    GetBufferLen,
    /// Clamped to the supported range. Only before attaching.
    SetBufferLen(u32),
    /// Wire-encoded program; empty removes the filter.
    SetFilter(&'a [u8]),
    Flush,
    Promisc,
    GetDlt,
    GetDltList,
    SetDlt(u32),
    GetInterface,
    SetInterface(&'a str),
    GetStats,
    GetImmediate,
    SetImmediate(bool),
    Version,
    GetHdrComplete,
    SetHdrComplete(bool),
    GetSeeSent,
    SetSeeSent(bool),
    GetReadTimeout,
    /// Zero disables the timeout.
    SetReadTimeout(BpfTimeval),
    GetFeedback,
    SetFeedback(bool),
    BytesAvailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    Done,
    Len(u32),
    Dlt(u32),
    DltList(Vec<u32>),
    Interface(String),
    Stats(BpfStat),
    Flag(bool),
    Version(BpfVersion),
    Timeout(BpfTimeval),
}

impl CaptureDevice {
    pub fn control(&mut self, request: Control<'_>) -> Result<ControlReply, DeviceError> {
        use ControlReply::*;

        let reply = match request {
            Control::GetBufferLen => Len(self.bufsize),
            Control::SetBufferLen(len) => {
                if !self.is_unbound() {
                    return Err(DeviceError::InvalidArgument);
                }
                self.bufsize = len.clamp(BPF_MINBUFSIZE, BPF_MAXBUFSIZE);
                Len(self.bufsize)
            }
            Control::SetFilter(bytes) => {
                self.set_filter(bytes)?;
                Done
            }
            Control::Flush => {
                self.flush();
                Done
            }
            Control::Promisc => {
                let iface = self.live_iface()?;
                if !self.flags.contains(DeviceFlags::PROMISC) {
                    iface.set_promiscuous(true)?;
                    self.flags.insert(DeviceFlags::PROMISC);
                }
                Done
            }
            Control::GetDlt => Dlt(self.live_iface()?.dlt()),
            Control::GetDltList => DltList(vec![self.live_iface()?.dlt()]),
            Control::SetDlt(dlt) => {
                if self.live_iface()?.dlt() != dlt {
                    return Err(DeviceError::InvalidArgument);
                }
                Done
            }
            Control::GetInterface => Interface(String::from(self.live_iface()?.name())),
            Control::SetInterface(name) => {
                log::debug!("attach to {name} must go through the registry");
                return Err(DeviceError::InvalidArgument);
            }
            Control::GetStats => Stats(self.stats),
            Control::GetImmediate => Flag(self.flags.contains(DeviceFlags::IMMEDIATE)),
            Control::SetImmediate(on) => self.set_flag(DeviceFlags::IMMEDIATE, on),
            Control::Version => Version(BpfVersion::CURRENT),
            Control::GetHdrComplete => Flag(self.flags.contains(DeviceFlags::HDR_COMPLETE)),
            Control::SetHdrComplete(on) => self.set_flag(DeviceFlags::HDR_COMPLETE, on),
            Control::GetSeeSent => Flag(self.flags.contains(DeviceFlags::SEE_SENT)),
            Control::SetSeeSent(on) => self.set_flag(DeviceFlags::SEE_SENT, on),
            Control::GetReadTimeout => Timeout(BpfTimeval::from_duration(
                self.read_timeout.unwrap_or_default(),
            )),
            Control::SetReadTimeout(tv) => {
                self.set_read_timeout(tv)?;
                Done
            }
            Control::GetFeedback => Flag(self.flags.contains(DeviceFlags::FEEDBACK)),
            Control::SetFeedback(on) => self.set_flag(DeviceFlags::FEEDBACK, on),
            Control::BytesAvailable => {
                Len(u32::try_from(self.bytes_available()).unwrap_or(u32::MAX))
            }
        };
        Ok(reply)
    }

    fn set_flag(&mut self, flag: DeviceFlags, on: bool) -> ControlReply {
        self.flags.set(flag, on);
        ControlReply::Done
    }

    /// Timeouts are kept as a whole number of ticks, rounded up.
    fn set_read_timeout(&mut self, tv: BpfTimeval) -> Result<(), DeviceError> {
        let timeout = tv.to_duration().ok_or(DeviceError::InvalidArgument)?;
        let ticks = timeout.as_nanos().div_ceil(BPF_TIMEOUT_TICK.as_nanos());
        let ticks = i32::try_from(ticks).map_err(|_| DeviceError::OutOfRange)?;
        self.read_timeout = (ticks > 0).then(|| BPF_TIMEOUT_TICK * ticks as u32);
        Ok(())
    }
}
