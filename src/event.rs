//! The sample record emitted by the kernel probe.
//!
//! ```text
//! offset  size  field
//!      0     4  pid
//!      4     4  tid
//!      8     2  arch
//!     10     2  reg_version
//!     12     4  (padding)
//!     16     8  timestamp_ns
//!     24     8  sp
//!     32     8  pc
//!     40   256  regs[32]
//!    296     8  cookie
//!    304    16  comm
//! ```
//!
//! Everything is little endian.

use std::borrow::Cow;
use std::path::Path;

use crate::arch::{Arch, RegisterSet};
use crate::config::{REGSET_SLOTS, REGSET_VERSION};
use crate::status::{Error, Result};
use crate::unwind::CaptureRequest;

pub const PROBE_EVENT_SIZE: usize = 320;

const COMM_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeEvent {
    pub pid: u32,
    pub tid: u32,
    pub arch: u16,
    pub reg_version: u16,
    pub timestamp_ns: u64,
    pub sp: u64,
    pub pc: u64,
    pub regs: [u64; REGSET_SLOTS],
    pub cookie: u64,
    pub comm: [u8; COMM_LEN],
}

struct Fields<'a> {
    data: &'a [u8],
    at: usize,
}

impl Fields<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self
            .data
            .get(self.at..self.at + N)
            .and_then(|bytes| <[u8; N]>::try_from(bytes).ok())
            .ok_or_else(|| Error::bad_format(format!("probe event truncated at {}", self.at)))?;
        self.at += N;
        Ok(bytes)
    }

    fn u16(&mut self) -> Result<u16> {
        self.take().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64> {
        self.take().map(u64::from_le_bytes)
    }
}

impl ProbeEvent {
    /// Decode one record. Bytes past the record (ring buffer padding) are
    /// ignored.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < PROBE_EVENT_SIZE {
            return Err(Error::bad_format(format!(
                "probe event of {} bytes, expected {PROBE_EVENT_SIZE}",
                data.len()
            )));
        }

        let mut fields = Fields { data, at: 0 };
        let pid = fields.u32()?;
        let tid = fields.u32()?;
        let arch = fields.u16()?;
        let reg_version = fields.u16()?;
        fields.take::<4>()?;
        let timestamp_ns = fields.u64()?;
        let sp = fields.u64()?;
        let pc = fields.u64()?;
        let mut regs = [0; REGSET_SLOTS];
        for reg in &mut regs {
            *reg = fields.u64()?;
        }
        let cookie = fields.u64()?;
        let comm = fields.take()?;

        Ok(ProbeEvent {
            pid,
            tid,
            arch,
            reg_version,
            timestamp_ns,
            sp,
            pc,
            regs,
            cookie,
            comm,
        })
    }

    /// The registers of the sample, after checking that this build
    /// understands them.
    pub fn register_set(&self) -> Result<RegisterSet> {
        let arch = Arch::from_tag(self.arch)?;
        if self.reg_version != REGSET_VERSION {
            return Err(Error::invalid(format!(
                "register format version {} (expected {REGSET_VERSION})",
                self.reg_version
            )));
        }

        let mut registers = RegisterSet::prepare(arch)?;
        registers.sp = self.sp;
        registers.pc = self.pc;
        registers.regs = self.regs;
        Ok(registers)
    }

    pub fn process_name(&self) -> Cow<'_, str> {
        let len = self
            .comm
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.comm.len());
        String::from_utf8_lossy(&self.comm[..len])
    }

    /// A capture of this sample against `module_path`, reading the stack of
    /// the sampled thread.
    pub fn capture_request<'a>(&self, module_path: &'a Path) -> Result<CaptureRequest<'a>> {
        let pid = i32::try_from(self.pid)
            .map_err(|_| Error::invalid(format!("pid {}", self.pid)))?;
        let tid = i32::try_from(self.tid)
            .map_err(|_| Error::invalid(format!("tid {}", self.tid)))?;
        Ok(CaptureRequest::new(module_path, self.register_set()?).process(pid, tid))
    }
}
