//! Reading the stack of a live, ptrace-stopped process.
//!
//! Reads go through `process_vm_readv` first. Kernels or sandboxes that refuse
//! it make the session switch to positioned reads of `/proc/<pid>/mem` for the
//! rest of its lifetime.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::{io, ptr};

use crate::memory::MemoryReader;
use crate::stdext::{cvt, cvt_r};
use crate::status::{Error, Result};

/// Hands out [`Session`]s, if allowed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackReader {
    enabled: bool,
}

impl StackReader {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Stop `tid` (or `pid` when `tid <= 0`) with `PTRACE_ATTACH` and wait
    /// until it is stopped. On failure the target is left untraced.
    #[instrument(skip(self))]
    pub fn attach(&self, pid: i32, tid: i32) -> Result<Session> {
        if !self.enabled {
            return Err(Error::invalid("stack reader is disabled"));
        }
        if pid <= 0 {
            return Err(Error::invalid(format!("pid {pid}")));
        }
        let tid = if tid <= 0 { pid } else { tid };

        // SAFETY: PTRACE_ATTACH takes no pointers.
        cvt(unsafe {
            libc::ptrace(
                libc::PTRACE_ATTACH,
                tid,
                ptr::null_mut::<libc::c_void>(),
                ptr::null_mut::<libc::c_void>(),
            )
        })
        .map_err(|e| Error::io(format!("PTRACE_ATTACH {tid}"), e))?;

        let mut status = 0;
        // SAFETY: status is a valid out pointer.
        let waited = cvt_r(|| unsafe { libc::waitpid(tid, &mut status, libc::__WALL) });
        let stopped = match waited {
            Ok(_) if libc::WIFSTOPPED(status) => Ok(()),
            Ok(_) => Err(io::Error::other(format!(
                "thread {tid} did not stop (wait status {status:#x})"
            ))),
            Err(e) => Err(e),
        };
        if let Err(e) = stopped {
            ptrace_detach(tid);
            return Err(Error::io(format!("waiting for {tid} to stop"), e));
        }

        debug!(pid, tid, "attached");
        Ok(Session {
            pid,
            tid,
            backend: Backend::ProcessVm,
            mem: None,
            attached: true,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    ProcessVm,
    ProcMem,
    /// Detached; nothing can be read.
    None,
}

/// A stopped target. Detaches when dropped.
#[derive(Debug)]
pub struct Session {
    pid: i32,
    tid: i32,
    backend: Backend,
    mem: Option<File>,
    attached: bool,
}

fn ptrace_detach(tid: i32) {
    // SAFETY: PTRACE_DETACH takes no pointers; a zero data argument resumes
    // the thread without a signal.
    if let Err(e) = cvt(unsafe {
        libc::ptrace(
            libc::PTRACE_DETACH,
            tid,
            ptr::null_mut::<libc::c_void>(),
            ptr::null_mut::<libc::c_void>(),
        )
    }) {
        warn!(tid, "PTRACE_DETACH failed: {e}");
    }
}

/// `process_vm_readv` failures that mean "this call is not available to us",
/// as opposed to a bad address range.
fn wants_fallback(errno: i32) -> bool {
    matches!(
        errno,
        libc::ENOSYS | libc::EPERM | libc::ESRCH | libc::EFAULT
    )
}

impl Session {
    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn tid(&self) -> i32 {
        self.tid
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    fn short_read(&self, address: u64, wanted: usize, got: usize) -> Error {
        Error::io(
            format!("memory of {}", self.pid),
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read {got} of {wanted} bytes at {address:#x}"),
            ),
        )
    }

    fn read_process_vm(&self, address: u64, buf: &mut [u8]) -> io::Result<usize> {
        let local = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };
        let remote = libc::iovec {
            iov_base: address as usize as *mut libc::c_void,
            iov_len: buf.len(),
        };
        // SAFETY: the local iovec covers exactly `buf`; the remote one is only
        // dereferenced by the kernel in the target's address space.
        cvt(unsafe { libc::process_vm_readv(self.pid, &local, 1, &remote, 1, 0) })
            .map(|n| n as usize)
    }

    fn read_proc_mem(&mut self, address: u64, buf: &mut [u8]) -> Result<usize> {
        let mem = match &mut self.mem {
            Some(mem) => mem,
            slot @ None => {
                let path = format!("/proc/{}/mem", self.pid);
                let file = File::open(&path).map_err(|e| Error::io(path, e))?;
                slot.insert(file)
            }
        };
        mem.read_at(buf, address)
            .map_err(|e| Error::io(format!("/proc/{}/mem at {address:#x}", self.pid), e))
    }

    /// Fill `buf` from `address` in the target.
    pub fn read(&mut self, address: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Err(Error::invalid("zero-length read"));
        }
        if !self.attached {
            return Err(Error::invalid(format!("session for {} is detached", self.pid)));
        }

        if self.backend == Backend::ProcessVm {
            match self.read_process_vm(address, buf) {
                Ok(n) if n == buf.len() => return Ok(()),
                Ok(n) => return Err(self.short_read(address, buf.len(), n)),
                Err(e) if e.raw_os_error().is_some_and(wants_fallback) => {
                    debug!(pid = self.pid, "process_vm_readv failed ({e}), using /proc/pid/mem");
                    self.backend = Backend::ProcMem;
                }
                Err(e) => {
                    return Err(Error::io(
                        format!("process_vm_readv {} at {address:#x}", self.pid),
                        e,
                    ))
                }
            }
        }

        let n = self.read_proc_mem(address, buf)?;
        if n != buf.len() {
            return Err(self.short_read(address, buf.len(), n));
        }
        Ok(())
    }

    /// Close the mem file and let the target run again. Only the first call
    /// does anything.
    pub fn detach(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        self.mem = None;
        self.backend = Backend::None;
        ptrace_detach(self.tid);
        trace!(pid = self.pid, tid = self.tid, "detached");
    }
}

impl MemoryReader for Session {
    fn read(&mut self, address: u64, buf: &mut [u8]) -> Result<()> {
        Session::read(self, address, buf)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests;
