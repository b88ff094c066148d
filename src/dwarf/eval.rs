//! Replays CIE/FDE programs to recover the caller's registers.


use crate::arch::RegisterSet;
use crate::config::REGSET_SLOTS;
use crate::memory::MemoryReader;
use crate::status::{Error, Result};
use crate::unwind::{Frame, FrameFlags};

use super::parse::{Cie, Fde, InstrIter, Instruction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterRule {
    /// A register that has this rule has no recoverable value in the previous
    /// frame. (By convention, it is not preserved by a callee.)
    Undefined,
    /// This register has not been modified from the previous frame.
    /// (By convention, it is preserved by the callee, but the callee has not
    /// modified it.)
    SameValue,
    /// The previous value of this register is saved at the address CFA+N where
    /// CFA is the current CFA value and N is a signed offset.
    Offset(i64),
}

/// One row of the rule table: the state of the CFA virtual machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfaState {
    /// `None` until the program names a CFA register.
    pub cfa_register: Option<u64>,
    pub cfa_offset: i64,
    pub rules: [RegisterRule; REGSET_SLOTS],
}

impl Default for CfaState {
    fn default() -> Self {
        Self {
            cfa_register: None,
            cfa_offset: 0,
            rules: [RegisterRule::SameValue; REGSET_SLOTS],
        }
    }
}

impl CfaState {
    fn set_rule(&mut self, register: u64, rule: RegisterRule) {
        // Columns we do not carry in a RegisterSet have nowhere to go.
        if let Some(slot) = usize::try_from(register)
            .ok()
            .and_then(|register| self.rules.get_mut(register))
        {
            *slot = rule;
        }
    }

    fn restore(&mut self, register: u64, initial: &CfaState) {
        if let Some(&rule) = usize::try_from(register)
            .ok()
            .and_then(|register| initial.rules.get(register))
        {
            self.set_rule(register, rule);
        }
    }

    /// Run `program` starting at `pc_begin`, stopping before the first row
    /// that starts past `target_pc`.
    fn execute(
        &mut self,
        program: &[u8],
        cie: &Cie,
        pc_begin: u64,
        target_pc: u64,
        initial: &CfaState,
    ) -> Result<()> {
        let data_align = cie.data_alignment_factor;
        let factored = |n: i64| n.wrapping_mul(data_align);
        let advance =
            |location: u64, delta: u64| location.wrapping_add(delta.wrapping_mul(cie.code_alignment_factor));
        let mut location = pc_begin;

        for instruction in InstrIter::new(program, cie.address_size) {
            let instruction = instruction?;
            trace!(location, ?instruction);

            match instruction {
                Instruction::SetLoc(address) => location = address,
                Instruction::AdvanceLoc(delta) | Instruction::AdvanceLoc1(delta) => {
                    location = advance(location, u64::from(delta));
                }
                Instruction::AdvanceLoc2(delta) => location = advance(location, u64::from(delta)),
                Instruction::AdvanceLoc4(delta) => location = advance(location, u64::from(delta)),
                Instruction::DefCfa { register, offset } => {
                    self.cfa_register = Some(register);
                    self.cfa_offset = offset as i64;
                }
                Instruction::DefCfaSf {
                    register,
                    factored_offset,
                } => {
                    self.cfa_register = Some(register);
                    self.cfa_offset = factored(factored_offset);
                }
                Instruction::DefCfaRegister(register) => self.cfa_register = Some(register),
                Instruction::DefCfaOffset(offset) => self.cfa_offset = offset as i64,
                Instruction::DefCfaOffsetSf(factored_offset) => {
                    self.cfa_offset = factored(factored_offset);
                }
                Instruction::Undefined(register) => {
                    self.set_rule(register, RegisterRule::Undefined);
                }
                Instruction::SameValue(register) => {
                    self.set_rule(register, RegisterRule::SameValue);
                }
                Instruction::Offset {
                    register,
                    factored_offset,
                } => self.set_rule(
                    u64::from(register),
                    RegisterRule::Offset(factored(factored_offset as i64)),
                ),
                Instruction::OffsetExtended {
                    register,
                    factored_offset,
                } => self.set_rule(
                    register,
                    RegisterRule::Offset(factored(factored_offset as i64)),
                ),
                Instruction::OffsetExtendedSf {
                    register,
                    factored_offset,
                } => self.set_rule(register, RegisterRule::Offset(factored(factored_offset))),
                Instruction::Restore(register) => self.restore(u64::from(register), initial),
                Instruction::RestoreExtended(register) => self.restore(register, initial),
                Instruction::Nop => {}
            }

            if location > target_pc {
                break;
            }
        }

        Ok(())
    }
}

/// Work out the rule row in effect at `target_pc`.
pub fn rules_at(image: &[u8], cie: &Cie, fde: &Fde, target_pc: u64) -> Result<CfaState> {
    let program = |range: &std::ops::Range<usize>| {
        image
            .get(range.clone())
            .ok_or_else(|| Error::bad_format("instruction range outside image"))
    };

    let defaults = CfaState::default();
    let mut state = CfaState::default();
    state.execute(program(&cie.initial_instructions)?, cie, fde.pc_begin, u64::MAX, &defaults)?;
    let initial = state.clone();
    state.execute(program(&fde.instructions)?, cie, fde.pc_begin, target_pc, &initial)?;

    Ok(state)
}

/// Unwind one frame.
///
/// `regs` holds the callee's registers on entry and the caller's on
/// success. The returned frame is the caller's: `pc` and `ra` are the return
/// address, `sp` and `cfa` the canonical frame address.
#[instrument(skip(image, cie, regs, reader), fields(fde = fde.offset))]
pub fn eval(
    image: &[u8],
    cie: &Cie,
    fde: &Fde,
    target_pc: u64,
    regs: &mut RegisterSet,
    reader: &mut dyn MemoryReader,
) -> Result<Frame> {
    if !fde.covers(target_pc) {
        return Err(Error::invalid(format!(
            "pc {target_pc:#x} outside FDE [{:#x}, {:#x})",
            fde.pc_begin,
            fde.pc_end()
        )));
    }

    let state = rules_at(image, cie, fde, target_pc)?;

    let cfa_register = state
        .cfa_register
        .ok_or_else(|| Error::not_implemented("no CFA rule at this pc"))?;
    let cfa_base = usize::try_from(cfa_register)
        .ok()
        .and_then(|register| regs.regs.get(register))
        .copied()
        .ok_or_else(|| Error::not_implemented(format!("CFA based on register {cfa_register}")))?;
    let cfa = cfa_base.wrapping_add_signed(state.cfa_offset);

    let ra_column = usize::try_from(cie.return_address_register)
        .ok()
        .filter(|column| *column < REGSET_SLOTS)
        .ok_or_else(|| {
            Error::not_implemented(format!(
                "return address in column {}",
                cie.return_address_register
            ))
        })?;
    let ra = match state.rules[ra_column] {
        RegisterRule::SameValue => regs.regs[ra_column],
        RegisterRule::Offset(offset) => reader.read_u64(cfa.wrapping_add_signed(offset))?,
        RegisterRule::Undefined => {
            return Err(Error::not_implemented("return address is undefined"))
        }
    };

    // `regs` is left alone unless every saved register could be read.
    let mut caller = regs.regs;
    for (value, rule) in caller.iter_mut().zip(state.rules) {
        match rule {
            RegisterRule::SameValue => {}
            RegisterRule::Offset(offset) => {
                *value = reader.read_u64(cfa.wrapping_add_signed(offset))?;
            }
            RegisterRule::Undefined => *value = 0,
        }
    }
    regs.regs = caller;
    regs.pc = ra;
    regs.sp = cfa;

    trace!(cfa, ra, "unwound");
    Ok(Frame {
        pc: ra,
        sp: cfa,
        cfa,
        ra,
        flags: FrameFlags::empty(),
        module: None,
    })
}
