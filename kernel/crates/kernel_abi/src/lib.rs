#![no_std]

mod bpf;
mod errno;
mod limits;
mod time;

pub use bpf::*;
pub use errno::*;
pub use limits::*;
pub use time::*;
