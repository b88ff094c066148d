//! Turning one register snapshot into a call stack.
//!
//! # how it works
//! Frame 0 is always derived from the snapshot alone, through the
//! architecture table. Every further frame needs the CFI of the module and a
//! way to read the target's stack: either the caller's [`MemoryReader`], or a
//! ptrace [`Session`](crate::stack_reader::Session) opened for the duration of
//! the capture. The walk ends, successfully, at the first frame it cannot
//! produce; [`CaptureResult::stop`] says why.

use std::path::Path;
use std::sync::Arc;

use bitflags::bitflags;

use crate::arch::{FrameWindow, RegisterSet};
use crate::cache::ModuleCache;
use crate::config::Config;
use crate::dwarf::Module;
use crate::memory::MemoryReader;
use crate::stack_reader::StackReader;
use crate::status::{Error, Result, Status};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u32 {
        /// The frame was derived from registers alone, without CFI.
        const PARTIAL = 1 << 0;
    }
}

impl Default for FrameFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub pc: u64,
    pub sp: u64,
    pub cfa: u64,
    pub ra: u64,
    pub flags: FrameFlags,
    /// The module whose CFI the frame was attributed to.
    pub module: Option<Arc<Path>>,
}

pub struct CaptureRequest<'a> {
    pub module_path: &'a Path,
    pub registers: RegisterSet,
    /// Stack memory of the target. Without one, a live `pid` lets the capture
    /// attach to the process itself.
    pub reader: Option<&'a mut dyn MemoryReader>,
    pub pid: i32,
    /// `<= 0` means the main thread.
    pub tid: i32,
}

impl<'a> CaptureRequest<'a> {
    pub fn new(module_path: &'a Path, registers: RegisterSet) -> Self {
        Self {
            module_path,
            registers,
            reader: None,
            pid: 0,
            tid: 0,
        }
    }

    pub fn reader(mut self, reader: &'a mut dyn MemoryReader) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn process(mut self, pid: i32, tid: i32) -> Self {
        self.pid = pid;
        self.tid = tid;
        self
    }
}

impl std::fmt::Debug for CaptureRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureRequest")
            .field("module_path", &self.module_path)
            .field("registers", &self.registers)
            .field("reader", &self.reader.is_some())
            .field("pid", &self.pid)
            .field("tid", &self.tid)
            .finish()
    }
}

/// Why a capture produced no further frames.
#[derive(Debug)]
pub enum StopReason {
    BufferFull,
    NoMemoryReader,
    /// The module has no usable call frame information.
    NoCfi,
    NoCoveringFde(u64),
    Replay(Error),
}

#[derive(Debug)]
pub struct CaptureResult {
    pub status: Status,
    pub frames_written: usize,
    /// `None` when the capture failed before a walk started.
    pub stop: Option<StopReason>,
}

impl CaptureResult {
    fn failed(err: Error) -> Self {
        debug!("capture failed: {err}");
        Self {
            status: err.status(),
            frames_written: 0,
            stop: None,
        }
    }
}

/// Everything that outlives a single capture.
#[derive(Debug)]
pub struct Context {
    config: Config,
    /// `None` once shut down.
    cache: Option<ModuleCache>,
    stack_reader: StackReader,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cache: Some(ModuleCache::new(config.effective_capacity())),
            stack_reader: StackReader::new(config.stack_reader),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> Option<&ModuleCache> {
        self.cache.as_ref()
    }

    pub fn is_shut_down(&self) -> bool {
        self.cache.is_none()
    }

    /// Unload every module. Captures on a shut down context fail.
    pub fn shutdown(&mut self) {
        if let Some(mut cache) = self.cache.take() {
            cache.flush();
        }
    }

    /// Unwind `request`, writing at most `frames.len()` frames.
    #[instrument(skip_all, fields(module = %request.module_path.display(), max_frames = frames.len()))]
    pub fn capture(&mut self, request: CaptureRequest<'_>, frames: &mut [Frame]) -> CaptureResult {
        let stack_reader = self.stack_reader;
        let Some(cache) = self.cache.as_mut() else {
            return CaptureResult::failed(Error::invalid("context is shut down"));
        };
        if request.module_path.as_os_str().is_empty() {
            return CaptureResult::failed(Error::invalid("empty module path"));
        }
        if frames.is_empty() {
            return CaptureResult::failed(Error::invalid("no room for frames"));
        }

        let CaptureRequest {
            module_path,
            registers,
            reader,
            pid,
            tid,
        } = request;

        let mut session = None;
        let mut attach_error = None;
        if reader.is_none() && stack_reader.enabled() && pid > 0 && frames.len() > 1 {
            match stack_reader.attach(pid, tid) {
                Ok(attached) => session = Some(attached),
                Err(err) => {
                    debug!("unwinding a single frame, attach failed: {err}");
                    attach_error = Some(err);
                }
            }
        }

        let handle = match cache.acquire(module_path) {
            Ok(handle) => handle,
            Err(err) => return CaptureResult::failed(err),
        };

        let walked = cache.get(handle).and_then(|module| {
            let path = cache.path(handle)?;
            match reader {
                Some(reader) => walk(module, path, registers, Some(reader), frames),
                None => {
                    let session = session
                        .as_mut()
                        .map(|session| session as &mut dyn MemoryReader);
                    walk(module, path, registers, session, frames)
                }
            }
        });

        if let Err(err) = cache.release(handle) {
            warn!("releasing {handle:?}: {err}");
        }
        if let Some(mut session) = session {
            session.detach();
        }

        let (frames_written, stop) = match walked {
            Ok(walked) => walked,
            Err(err) => return CaptureResult::failed(err),
        };
        debug!(frames_written, ?stop, "walk finished");

        CaptureResult {
            status: attach_error.map_or(Status::Ok, |err| err.status()),
            frames_written,
            stop: Some(stop),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

/// Frame 0: the snapshot itself, with CFA and return address from the
/// architecture table where it knows how to derive them.
fn root_frame(registers: &RegisterSet) -> Result<Frame> {
    let ops = registers.ops()?;
    let window = match ops.open_frame(registers) {
        Ok(window) => window,
        Err(Error::NotImplemented(what)) => {
            trace!("falling back to sp/pc: {what}");
            FrameWindow {
                cfa: ops.compute_cfa(registers).unwrap_or(registers.sp),
                ra: ops.read_return_address(registers).unwrap_or(registers.pc),
            }
        }
        Err(err) => return Err(err),
    };

    Ok(Frame {
        pc: registers.pc,
        sp: registers.sp,
        cfa: window.cfa,
        ra: window.ra,
        flags: FrameFlags::PARTIAL,
        module: None,
    })
}

fn walk(
    module: &Module,
    path: Arc<Path>,
    mut registers: RegisterSet,
    mut reader: Option<&mut (dyn MemoryReader + '_)>,
    frames: &mut [Frame],
) -> Result<(usize, StopReason)> {
    let ops = registers.ops()?;
    ops.normalize(&mut registers)?;

    frames[0] = Frame {
        module: Some(path.clone()),
        ..root_frame(&registers)?
    };
    let mut written = 1;

    let stop = loop {
        if written == frames.len() {
            break StopReason::BufferFull;
        }
        let Some(reader) = reader.as_deref_mut() else {
            break StopReason::NoMemoryReader;
        };
        if !module.index().has_cfi() {
            break StopReason::NoCfi;
        }
        let Some(fde) = module.index().find_fde(registers.pc) else {
            break StopReason::NoCoveringFde(registers.pc);
        };

        // CFA rules name the stack pointer by its DWARF column.
        if let Some(slot) = registers.regs.get_mut(usize::from(ops.sp_column)) {
            *slot = registers.sp;
        }
        match module.eval(fde, registers.pc, &mut registers, reader) {
            Ok(frame) => {
                frames[written] = Frame {
                    module: Some(path.clone()),
                    ..frame
                };
                written += 1;
                ops.normalize(&mut registers)?;
            }
            Err(err) => break StopReason::Replay(err),
        }
    };

    Ok((written, stop))
}

/// [`Context::capture`] for callers holding optional pointers: a missing
/// context or request is an invalid argument.
pub fn capture(
    context: Option<&mut Context>,
    request: Option<CaptureRequest<'_>>,
    frames: &mut [Frame],
) -> CaptureResult {
    match (context, request) {
        (Some(context), Some(request)) => context.capture(request, frames),
        (None, _) => CaptureResult::failed(Error::invalid("no context")),
        (_, None) => CaptureResult::failed(Error::invalid("no request")),
    }
}
