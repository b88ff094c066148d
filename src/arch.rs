//! Per-ISA register semantics.
//!
//! Every supported instruction set gets exactly one [`ArchOps`] record in a
//! static table. Nothing is dispatched through traits; callers resolve the
//! record from the tag stored in a [`RegisterSet`] and the record's data
//! decides how the canonical frame address and return address of a sampled
//! frame are derived.

use crate::config::{REGSET_SLOTS, REGSET_VERSION};
use crate::status::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Arch {
    X86_64 = 1,
    Arm64 = 2,
    Mips32 = 3,
}

impl Arch {
    pub const ALL: [Arch; 3] = [Arch::X86_64, Arch::Arm64, Arch::Mips32];

    pub fn from_tag(tag: u16) -> Result<Self> {
        match tag {
            1 => Ok(Arch::X86_64),
            2 => Ok(Arch::Arm64),
            3 => Ok(Arch::Mips32),
            other => Err(Error::UnsupportedArchitecture(other)),
        }
    }

    pub fn tag(self) -> u16 {
        self as u16
    }

    pub fn ops(self) -> &'static ArchOps {
        match self {
            Arch::X86_64 => &X86_64,
            Arch::Arm64 => &ARM64,
            Arch::Mips32 => &MIPS32,
        }
    }
}

/// A register snapshot. Slot `n` of `regs` holds DWARF register `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSet {
    pub arch: u16,
    pub version: u16,
    pub flags: u32,
    pub sp: u64,
    pub pc: u64,
    pub regs: [u64; REGSET_SLOTS],
}

impl RegisterSet {
    /// An all-zero register set tagged for `arch`.
    pub fn prepare(arch: Arch) -> Result<Self> {
        let mut regs = RegisterSet {
            arch: arch.tag(),
            version: REGSET_VERSION,
            flags: 0,
            sp: 0,
            pc: 0,
            regs: [0; REGSET_SLOTS],
        };
        arch.ops().normalize(&mut regs)?;
        Ok(regs)
    }

    pub fn arch(&self) -> Result<Arch> {
        Arch::from_tag(self.arch)
    }

    pub fn ops(&self) -> Result<&'static ArchOps> {
        self.arch().map(Arch::ops)
    }

    /// Value of a DWARF register column. Columns past the snapshot read as 0.
    pub fn column(&self, column: u16) -> u64 {
        self.regs.get(usize::from(column)).copied().unwrap_or(0)
    }
}

/// CFA and return address of the frame a register set was sampled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameWindow {
    pub cfa: u64,
    pub ra: u64,
}

/// Where the canonical frame address of a sampled frame comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfaSource {
    StackPointer,
    /// A `{saved fp, saved return address}` record sits at the frame pointer;
    /// the CFA is just above it. A zero frame pointer falls back to `sp`.
    FrameRecord { fp: usize, record_size: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnAddressSource {
    /// The probe already sits on the return path, so `pc` is the address.
    ProgramCounter,
    /// Link register, falling back to `pc` when it reads zero.
    LinkRegister(usize),
}

/// One record of the architecture table.
///
/// A `None` source means the operation is unknown for the ISA: the operation
/// reports [`Error::NotImplemented`] and callers use `sp`/`pc` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchOps {
    pub arch: Arch,
    pub name: &'static str,
    /// DWARF column of the stack pointer.
    pub sp_column: u16,
    pub cfa: Option<CfaSource>,
    pub return_address: Option<ReturnAddressSource>,
}

static X86_64: ArchOps = ArchOps {
    arch: Arch::X86_64,
    name: "x86_64",
    sp_column: 7,
    cfa: Some(CfaSource::StackPointer),
    return_address: Some(ReturnAddressSource::ProgramCounter),
};

// AAPCS64: x29 is the frame pointer, x30 the link register.
static ARM64: ArchOps = ArchOps {
    arch: Arch::Arm64,
    name: "arm64",
    sp_column: 31,
    cfa: Some(CfaSource::FrameRecord {
        fp: 29,
        record_size: 16,
    }),
    return_address: Some(ReturnAddressSource::LinkRegister(30)),
};

// o32: $fp is r30, $ra is r31, words are 4 bytes.
static MIPS32: ArchOps = ArchOps {
    arch: Arch::Mips32,
    name: "mips32",
    sp_column: 29,
    cfa: Some(CfaSource::FrameRecord {
        fp: 30,
        record_size: 8,
    }),
    return_address: Some(ReturnAddressSource::LinkRegister(31)),
};

impl ArchOps {
    /// Stamp the tag and format version. Running it twice changes nothing.
    pub fn normalize(&self, regs: &mut RegisterSet) -> Result<()> {
        if regs.version == 0 {
            regs.version = REGSET_VERSION;
        } else if regs.version != REGSET_VERSION {
            return Err(Error::invalid(format!(
                "register set version {} (expected {REGSET_VERSION})",
                regs.version
            )));
        }
        regs.arch = self.arch.tag();
        Ok(())
    }

    pub fn compute_cfa(&self, regs: &RegisterSet) -> Result<u64> {
        match self.cfa {
            Some(CfaSource::StackPointer) => Ok(regs.sp),
            Some(CfaSource::FrameRecord { fp, record_size }) => {
                let fp = regs.regs.get(fp).copied().unwrap_or(0);
                if fp == 0 {
                    Ok(regs.sp)
                } else {
                    Ok(fp.wrapping_add(record_size))
                }
            }
            None => Err(Error::not_implemented(format!(
                "{}: CFA derivation",
                self.name
            ))),
        }
    }

    pub fn read_return_address(&self, regs: &RegisterSet) -> Result<u64> {
        match self.return_address {
            Some(ReturnAddressSource::ProgramCounter) => Ok(regs.pc),
            Some(ReturnAddressSource::LinkRegister(lr)) => {
                match regs.regs.get(lr).copied().unwrap_or(0) {
                    0 => Ok(regs.pc),
                    ra => Ok(ra),
                }
            }
            None => Err(Error::not_implemented(format!(
                "{}: return address",
                self.name
            ))),
        }
    }

    pub fn open_frame(&self, regs: &RegisterSet) -> Result<FrameWindow> {
        Ok(FrameWindow {
            cfa: self.compute_cfa(regs)?,
            ra: self.read_return_address(regs)?,
        })
    }
}
