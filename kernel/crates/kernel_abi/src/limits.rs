use core::time::Duration;

/// Maximum number of instructions in a filter program.
pub const BPF_MAXINSNS: usize = 512;

/// Number of scratch memory words available to a filter program.
pub const BPF_MEMWORDS: usize = 16;

pub const BPF_MINBUFSIZE: u32 = 32;
pub const BPF_DFLTBUFSIZE: u32 = 32 * 1024;
pub const BPF_MAXBUFSIZE: u32 = 256 * 1024;

/// Number of capture device slots in the default registry.
pub const NR_BPFDEV: usize = 16;

/// Granularity of read timeouts. Requested timeouts are rounded up to it.
pub const BPF_TIMEOUT_TICK: Duration = Duration::from_millis(1);
