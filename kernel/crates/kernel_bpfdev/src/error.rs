use kernel_abi::Errno;
use kernel_bpf::ProgramError;
use thiserror::Error;

/// Errors returned by capture devices and the device registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("no such interface")]
    NoSuchInterface,
    #[error("device is no longer attached")]
    NotAttached,
    #[error("out of memory")]
    OutOfMemory,
    #[error("interface gone and no data left")]
    Io,
    #[error("no data available")]
    WouldBlock,
    #[error("read timed out")]
    TimedOut,
    #[error("request interrupted")]
    Interrupted,
    #[error("packet too large for interface")]
    MessageTooLong,
    #[error("value out of range")]
    OutOfRange,
    #[error("device busy")]
    Busy,
    #[error("no free capture devices")]
    NoFreeSlots,
    #[error("stale or unknown device handle")]
    BadHandle,
    #[error("invalid filter: {0}")]
    InvalidFilter(#[source] ProgramError),
    #[error("interface failed to transmit")]
    Transmit,
}

impl From<ProgramError> for DeviceError {
    fn from(err: ProgramError) -> Self {
        match err {
            ProgramError::OutOfMemory => Self::OutOfMemory,
            err => Self::InvalidFilter(err),
        }
    }
}

impl DeviceError {
    /// Error number reported to consumers.
    pub fn errno(&self) -> Errno {
        match self {
            Self::InvalidArgument | Self::InvalidFilter(_) => Errno::EINVAL,
            Self::NoSuchInterface | Self::NotAttached => Errno::ENXIO,
            Self::OutOfMemory => Errno::ENOMEM,
            Self::Io | Self::Transmit => Errno::EIO,
            // a timed out read asks the consumer to try again
            Self::WouldBlock | Self::TimedOut => Errno::EAGAIN,
            Self::Interrupted => Errno::EINTR,
            Self::MessageTooLong => Errno::EMSGSIZE,
            Self::OutOfRange => Errno::EDOM,
            Self::Busy => Errno::EBUSY,
            Self::NoFreeSlots => Errno::ENFILE,
            Self::BadHandle => Errno::EBADF,
        }
    }
}
