//! Stack unwinding for native processes from a single register snapshot.
//!
//! A kernel probe samples the registers of a thread ([`event::ProbeEvent`]).
//! [`Context::capture`] turns that snapshot into frames: the first one from
//! the registers alone, every further one by replaying the DWARF call frame
//! information of the module against the thread's stack.

#[macro_use]
extern crate tracing;

pub mod arch;
pub mod cache;
pub mod config;
pub mod dwarf;
pub mod elf;
pub mod event;
pub mod memory;
pub mod stack_reader;
pub mod status;
pub mod unwind;

mod stdext;

#[cfg(test)]
mod testutil;

pub use arch::{Arch, RegisterSet};
pub use config::Config;
pub use event::ProbeEvent;
pub use memory::{MemoryReader, StackSnapshot};
pub use status::{Error, Result, Status};
pub use unwind::{capture, CaptureRequest, CaptureResult, Context, Frame, FrameFlags, StopReason};
