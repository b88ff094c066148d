//! Decoding of DWARF call frame information.
//!
//! Source: https://dwarfstd.org/doc/DWARF5.pdf §6.4 Call Frame Information,
//! and the LSB `.eh_frame` description for the GNU flavour.
//!
//! Conceptually the CFI is a table with one row per code address and one
//! column per register (plus the CFA), each cell holding the rule that
//! recovers that register in the caller.
//!
//! Nothing in the sections spells the table out: every CIE carries a program
//! that sets up the first row, and every FDE carries a program that derives
//! the rows for one function from it. This module only splits the sections
//! into [`Cie`]s and [`Fde`]s and decodes the instruction streams; running
//! them is [`super::eval`]'s job.
#![allow(non_upper_case_globals)]


use core::fmt;
use std::ops::Range;

use crate::elf::SectionView;
use crate::status::{Error, Result};

/// Which flavour of frame section a record came from. The two differ in how
/// CIEs are tagged and how FDEs point at them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameSection {
    /// `.eh_frame`: CIE id 0, FDEs point back relative to their id field.
    EhFrame,
    /// `.debug_frame`: CIE id `0xffffffff`, FDEs hold absolute section offsets.
    DebugFrame,
}

impl FrameSection {
    fn is_cie_id(self, id: u32) -> bool {
        match self {
            FrameSection::EhFrame => id == 0,
            FrameSection::DebugFrame => id == 0xffff_ffff,
        }
    }
}

/// Common Information Entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cie {
    pub section: FrameSection,
    /// Offset of the record's length field within its section.
    pub offset: usize,
    pub version: u8,
    /// Only a leading `z` changes how the records are laid out; of the
    /// augmentation data itself only the `R` argument is kept.
    pub augmentation: String,
    /// A constant that is factored out of all advance location instructions.
    /// The resulting value is (operand * code_alignment_factor).
    pub code_alignment_factor: u64,
    /// A constant that is factored out of certain offset instructions. The
    /// resulting value is (operand * data_alignment_factor).
    pub data_alignment_factor: i64,
    /// The column in the rule table that represents the return address of the
    /// function. Note that this column might not correspond to an actual
    /// machine register.
    pub return_address_register: u64,
    /// How the FDEs of this CIE encode their addresses (augmentation `R`).
    pub pointer_encoding: Encoding,
    /// Size of a target address: `DW_CFA_set_loc` operands and `absptr`
    /// pointers are this wide.
    pub address_size: u8,
    /// Image offsets of the initial instructions, the program that creates the
    /// first row of every table described by this CIE.
    pub initial_instructions: Range<usize>,
}

impl Cie {
    pub fn has_augmentation_data(&self) -> bool {
        self.augmentation.starts_with('z')
    }
}

/// Frame Description Entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fde {
    /// Index of the owning CIE in the table the FDE was parsed into.
    pub cie: usize,
    pub section: FrameSection,
    /// Offset of the record's length field within its section.
    pub offset: usize,
    pub pc_begin: u64,
    /// Length in bytes of the covered code.
    pub pc_range: u64,
    /// Image offsets of the table defining instructions.
    pub instructions: Range<usize>,
}

impl Fde {
    pub fn pc_end(&self) -> u64 {
        self.pc_begin.saturating_add(self.pc_range)
    }

    pub fn covers(&self, pc: u64) -> bool {
        pc >= self.pc_begin && pc < self.pc_end()
    }
}

/// CIEs and FDEs of one module. FDEs refer to CIEs by index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameTable {
    pub cies: Vec<Cie>,
    pub fdes: Vec<Fde>,
}

struct Cursor<'a>(&'a [u8]);

/// Where a record sits, needed to resolve `pcrel` pointers inside it.
#[derive(Debug, Clone, Copy)]
struct RecordPosition {
    /// `sh_addr` of the section.
    section_address: u64,
    /// Section offset of the first byte after the record.
    end: usize,
}

impl RecordPosition {
    /// Section offset of the next byte `data` will yield.
    fn offset_of(&self, data: &Cursor<'_>) -> usize {
        self.end - data.0.len()
    }
}

impl FrameTable {
    /// Split one frame section into CIEs and FDEs and append them.
    ///
    /// `image` is the whole ELF image `view` points into; the instruction
    /// ranges recorded are offsets into it. `address_size` is the size of an
    /// `absptr` in CIEs that do not state one, i.e. the ELF class.
    #[instrument(skip(self, image))]
    pub fn parse_section(
        &mut self,
        image: &[u8],
        view: SectionView,
        section: FrameSection,
        address_size: u8,
    ) -> Result<()> {
        let data = image
            .get(view.range())
            .ok_or_else(|| Error::bad_format("frame section outside image"))?;

        let mut offset = 0;
        while data.len() - offset >= 4 {
            let record_start = offset;
            let length = read_u32(&mut Cursor(&data[offset..]))?;
            offset += 4;

            if length == 0 {
                trace!(record_start, "zero terminator");
                break;
            }
            if length == 0xffff_ffff {
                return Err(Error::not_implemented(format!(
                    "64-bit DWARF record at {record_start:#x}"
                )));
            }
            let end = offset
                .checked_add(length as usize)
                .filter(|end| *end <= data.len())
                .ok_or_else(|| {
                    Error::bad_format(format!(
                        "record at {record_start:#x} with length {length:#x} overruns section of {:#x} bytes",
                        data.len()
                    ))
                })?;

            let record = &mut Cursor(&data[offset..end]);
            let position = RecordPosition {
                section_address: view.address,
                end,
            };
            let id_offset = offset;
            let id = read_u32(record)?;

            if section.is_cie_id(id) {
                let cie = parse_cie(record, section, record_start, view.offset + end, address_size)?;
                trace!("CIE: {cie:?}");
                self.cies.push(cie);
            } else {
                let cie_offset = match section {
                    FrameSection::DebugFrame => Some(id as usize),
                    FrameSection::EhFrame => id_offset.checked_sub(id as usize),
                };
                let cie = cie_offset
                    .and_then(|cie_offset| self.find_cie(section, cie_offset))
                    .ok_or_else(|| {
                        Error::bad_format(format!(
                            "FDE at {record_start:#x} refers to unknown CIE (id {id:#x})"
                        ))
                    })?;
                let fde = parse_fde(
                    record,
                    &self.cies[cie],
                    cie,
                    record_start,
                    view.offset + end,
                    position,
                )?;
                trace!("FDE: {fde:?}");
                self.fdes.push(fde);
            }

            offset = end;
        }

        Ok(())
    }

    fn find_cie(&self, section: FrameSection, offset: usize) -> Option<usize> {
        self.cies
            .iter()
            .position(|cie| cie.section == section && cie.offset == offset)
    }
}

#[instrument(skip(data))]
fn parse_cie(
    data: &mut Cursor<'_>,
    section: FrameSection,
    offset: usize,
    image_end: usize,
    default_address_size: u8,
) -> Result<Cie> {
    let version = read_u8(data)?;
    if !matches!(version, 1 | 3 | 4) {
        return Err(Error::bad_format(format!("CIE version {version}")));
    }

    let augmentation = read_utf8_cstr(data)?;
    let code_alignment_factor = read_uleb128(data)?;
    let data_alignment_factor = read_ileb128(data)?;
    let return_address_register = read_uleb128(data)?;

    let mut address_size = default_address_size;
    if section == FrameSection::DebugFrame && version >= 3 {
        address_size = read_u8(data)?;
        let _segment_selector_size = read_u8(data)?;
    }

    let mut pointer_encoding = Encoding::ABSPTR;
    if augmentation.starts_with('z') {
        let aug_len = read_uleb128(data)?;
        let aug_data = read_bytes(data, usize::try_from(aug_len).unwrap_or(usize::MAX))?;
        let aug = parse_augmentation_data(augmentation, aug_data, address_size)?;
        trace!("augmentation {aug:?}");
        if let Some(encoding) = aug.pointer_encoding {
            pointer_encoding = encoding;
        }
    }
    // .debug_frame addresses are never encoded, whatever the augmentation says.
    if section == FrameSection::DebugFrame {
        pointer_encoding = Encoding::ABSPTR;
    }

    Ok(Cie {
        section,
        offset,
        version,
        augmentation: augmentation.to_owned(),
        code_alignment_factor,
        data_alignment_factor,
        return_address_register,
        pointer_encoding,
        address_size,
        initial_instructions: image_end - data.0.len()..image_end,
    })
}

#[instrument(skip(data, cie, position))]
fn parse_fde(
    data: &mut Cursor<'_>,
    cie: &Cie,
    cie_index: usize,
    offset: usize,
    image_end: usize,
    position: RecordPosition,
) -> Result<Fde> {
    let encoding = cie.pointer_encoding;
    let pc_begin = read_encoded(data, encoding, cie.address_size, position)?;
    // The range is a length, never relative to anything.
    let pc_range = read_encoded(data, encoding.without_application(), cie.address_size, position)?;

    if cie.has_augmentation_data() {
        let aug_len = read_uleb128(data)?;
        let aug_data = read_bytes(data, usize::try_from(aug_len).unwrap_or(usize::MAX))?;
        trace!("skipping FDE augmentation data {aug_data:x?}");
    }

    Ok(Fde {
        cie: cie_index,
        section: cie.section,
        offset,
        pc_begin,
        pc_range,
        instructions: image_end - data.0.len()..image_end,
    })
}

#[derive(Debug, PartialEq)]
pub struct AugmentationData {
    pub(super) lsda_pointer_encoding: Option<Encoding>,
    pub(super) pointer_encoding: Option<Encoding>,
    pub(super) personality_encoding: Option<Encoding>,
    pub(super) signal_frame: bool,
}

/// Walks the augmentation letters after the leading `z`. The first letter
/// that is not understood ends the walk; the rest of the block is skipped by
/// the caller through its length prefix.
fn parse_augmentation_data(string: &str, data: &[u8], address_size: u8) -> Result<AugmentationData> {
    let data = &mut Cursor(data);

    let mut aug_data = AugmentationData {
        pointer_encoding: None,
        lsda_pointer_encoding: None,
        personality_encoding: None,
        signal_frame: false,
    };

    for code in string.bytes().skip(1) {
        match code {
            // A 1-byte pointer encoding for the LSDA pointer in every FDE's
            // augmentation data.
            b'L' => {
                aug_data.lsda_pointer_encoding = Some(Encoding(read_u8(data)?));
            }
            // The encoding of the personality routine pointer, then the
            // pointer itself. Only its size matters here.
            b'P' => {
                let encoding = Encoding(read_u8(data)?);
                let unused = RecordPosition {
                    section_address: 0,
                    end: data.0.len(),
                };
                read_encoded(data, encoding.without_application(), address_size, unused)?;
                aug_data.personality_encoding = Some(encoding);
            }
            // The pointer encoding for the address pointers used in the FDE.
            b'R' => {
                aug_data.pointer_encoding = Some(Encoding(read_u8(data)?));
            }
            b'S' => aug_data.signal_frame = true,
            other => {
                trace!("unknown augmentation {:?}, skipping the rest", other as char);
                break;
            }
        }
    }

    Ok(aug_data)
}

/// Decode a `DW_EH_PE_*` encoded pointer.
fn read_encoded(
    data: &mut Cursor<'_>,
    encoding: Encoding,
    address_size: u8,
    position: RecordPosition,
) -> Result<u64> {
    let field_offset = position.offset_of(data);

    let value = match encoding.format()? {
        ValueFormat::DW_EH_PE_absptr => read_address(data, address_size)?,
        ValueFormat::DW_EH_PE_uleb128 => read_uleb128(data)?,
        ValueFormat::DW_EH_PE_udata2 => u64::from(read_u16(data)?),
        ValueFormat::DW_EH_PE_udata4 => u64::from(read_u32(data)?),
        ValueFormat::DW_EH_PE_udata8 => read_u64(data)?,
        ValueFormat::DW_EH_PE_sleb128 => read_ileb128(data)? as u64,
        ValueFormat::DW_EH_PE_sdata2 => i64::from(read_u16(data)? as i16) as u64,
        ValueFormat::DW_EH_PE_sdata4 => i64::from(read_u32(data)? as i32) as u64,
        ValueFormat::DW_EH_PE_sdata8 => read_u64(data)?,
    };

    match encoding.application()? {
        ValueApplication::DW_EH_PE_absptr => Ok(value),
        // Relative to the link-time address of the field itself.
        ValueApplication::DW_EH_PE_pcrel => Ok(position
            .section_address
            .wrapping_add(field_offset as u64)
            .wrapping_add(value)),
        other => Err(Error::not_implemented(format!(
            "pointer application {other:?}"
        ))),
    }
}

#[derive(PartialEq, Eq, Clone, Copy)]
#[repr(transparent)]
pub struct Encoding(pub u8);

impl Encoding {
    pub const ABSPTR: Encoding = Encoding(0x00);
    const DW_EH_PE_omit: u8 = 0xff;
    const DW_EH_PE_indirect: u8 = 0x80;

    fn without_application(self) -> Encoding {
        Encoding(self.0 & 0x0f)
    }

    fn format(&self) -> Result<ValueFormat> {
        Ok(match self.0 & 0x0f {
            0x00 => ValueFormat::DW_EH_PE_absptr,
            0x01 => ValueFormat::DW_EH_PE_uleb128,
            0x02 => ValueFormat::DW_EH_PE_udata2,
            0x03 => ValueFormat::DW_EH_PE_udata4,
            0x04 => ValueFormat::DW_EH_PE_udata8,
            0x09 => ValueFormat::DW_EH_PE_sleb128,
            0x0A => ValueFormat::DW_EH_PE_sdata2,
            0x0B => ValueFormat::DW_EH_PE_sdata4,
            0x0C => ValueFormat::DW_EH_PE_sdata8,
            other => {
                return Err(Error::not_implemented(format!(
                    "pointer format {other:#x} in encoding {:#04x}",
                    self.0
                )))
            }
        })
    }

    fn application(&self) -> Result<ValueApplication> {
        if self.0 == Self::DW_EH_PE_omit || self.0 & Self::DW_EH_PE_indirect != 0 {
            return Err(Error::not_implemented(format!(
                "pointer encoding {:#04x}",
                self.0
            )));
        }
        Ok(match self.0 & 0x70 {
            0x00 => ValueApplication::DW_EH_PE_absptr,
            0x10 => ValueApplication::DW_EH_PE_pcrel,
            0x20 => ValueApplication::DW_EH_PE_textrel,
            0x30 => ValueApplication::DW_EH_PE_datarel,
            0x40 => ValueApplication::DW_EH_PE_funcrel,
            _ => ValueApplication::DW_EH_PE_aligned,
        })
    }
}

impl fmt::Debug for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.application(), self.format()) {
            (Ok(application), Ok(format)) => write!(f, "{application:?} | {format:?}"),
            _ => write!(f, "Encoding({:#04x})", self.0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
#[allow(non_camel_case_types)]
enum ValueFormat {
    /// Address sized.
    DW_EH_PE_absptr = 0x00,
    DW_EH_PE_uleb128 = 0x01,
    DW_EH_PE_udata2 = 0x02,
    DW_EH_PE_udata4 = 0x03,
    DW_EH_PE_udata8 = 0x04,
    DW_EH_PE_sleb128 = 0x09,
    DW_EH_PE_sdata2 = 0x0A,
    DW_EH_PE_sdata4 = 0x0B,
    DW_EH_PE_sdata8 = 0x0C,
}

/// What a decoded value is added to. Only `pcrel` is resolved; the bases of
/// the others are not known from the frame section alone.
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
#[allow(non_camel_case_types)]
enum ValueApplication {
    DW_EH_PE_absptr = 0x00,
    /// The address of the encoded field itself.
    DW_EH_PE_pcrel = 0x10,
    DW_EH_PE_textrel = 0x20,
    DW_EH_PE_datarel = 0x30,
    DW_EH_PE_funcrel = 0x40,
    DW_EH_PE_aligned = 0x50,
}

fn read_bytes<'a>(data: &mut Cursor<'a>, amount: usize) -> Result<&'a [u8]> {
    if data.0.len() < amount {
        Err(Error::bad_format(format!(
            "record truncated: {amount} bytes wanted, {} left",
            data.0.len()
        )))
    } else {
        let (result, rest) = data.0.split_at(amount);
        data.0 = rest;
        Ok(result)
    }
}

fn read_array<const N: usize>(data: &mut Cursor<'_>) -> Result<[u8; N]> {
    let bytes = read_bytes(data, N)?;
    let mut array = [0; N];
    array.copy_from_slice(bytes);
    Ok(array)
}

fn read_u8(data: &mut Cursor<'_>) -> Result<u8> {
    read_array::<1>(data).map(|[b]| b)
}
fn read_u16(data: &mut Cursor<'_>) -> Result<u16> {
    read_array(data).map(u16::from_le_bytes)
}
fn read_u32(data: &mut Cursor<'_>) -> Result<u32> {
    read_array(data).map(u32::from_le_bytes)
}
fn read_u64(data: &mut Cursor<'_>) -> Result<u64> {
    read_array(data).map(u64::from_le_bytes)
}
fn read_address(data: &mut Cursor<'_>, address_size: u8) -> Result<u64> {
    match address_size {
        1 => read_u8(data).map(u64::from),
        2 => read_u16(data).map(u64::from),
        4 => read_u32(data).map(u64::from),
        8 => read_u64(data),
        other => Err(Error::bad_format(format!("address size {other}"))),
    }
}
fn read_utf8_cstr<'a>(data: &mut Cursor<'a>) -> Result<&'a str> {
    let len = data
        .0
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| Error::bad_format("no null terminator found for string"))?;
    let utf8 = core::str::from_utf8(&data.0[..len])
        .map_err(|e| Error::bad_format(format!("invalid utf8: {e:?}")))?;
    data.0 = &data.0[len + 1..];
    Ok(utf8)
}
fn read_uleb128(data: &mut Cursor<'_>) -> Result<u64> {
    let mut result = 0;
    let mut shift = 0;
    loop {
        let byte = read_u8(data)?;
        if shift >= 64 {
            return Err(Error::bad_format("uleb128 does not fit 64 bits"));
        }
        result |= u64::from(byte & 0b0111_1111) << shift;
        if (byte >> 7) == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}
fn read_ileb128(data: &mut Cursor<'_>) -> Result<i64> {
    let mut result = 0;
    let mut shift = 0;
    loop {
        let byte = read_u8(data)?;
        if shift >= 64 {
            return Err(Error::bad_format("sleb128 does not fit 64 bits"));
        }
        result |= i64::from(byte & 0b0111_1111) << shift;
        shift += 7;
        if (byte >> 7) == 0 {
            if shift < 64 && (byte >> 6) & 1 == 1 {
                result |= -1 << shift;
            }
            return Ok(result);
        }
    }
}

/// A decoded call frame instruction. Operands are raw: factoring by the
/// alignment factors happens when the instruction is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    //-------- 6.4.2.1 Row Creation Instructions
    //
    /// Create a new row at the given target address.
    SetLoc(u64),
    /// Create a new row at the current location plus
    /// delta * code_alignment_factor. The delta is packed into the opcode.
    AdvanceLoc(u8),
    AdvanceLoc1(u8),
    AdvanceLoc2(u16),
    AdvanceLoc4(u32),
    //
    //-------- 6.4.2.2 CFA Definition Instructions
    //
    /// The CFA is now `register + offset`.
    DefCfa { register: u64, offset: u64 },
    /// Like [`Instruction::DefCfa`] with a signed, factored offset.
    DefCfaSf { register: u64, factored_offset: i64 },
    /// Keep the CFA offset, change the register.
    DefCfaRegister(u64),
    /// Keep the CFA register, change the offset.
    DefCfaOffset(u64),
    DefCfaOffsetSf(i64),
    //
    //-------- 6.4.2.3 Register Rule Instructions
    //
    Undefined(u64),
    SameValue(u64),
    /// The previous value of the register is saved at CFA + N, where N is
    /// factored_offset * data_alignment_factor. The register is packed into
    /// the opcode.
    Offset { register: u8, factored_offset: u64 },
    OffsetExtended { register: u64, factored_offset: u64 },
    OffsetExtendedSf { register: u64, factored_offset: i64 },
    /// Back to the rule the CIE's initial instructions left for the register.
    Restore(u8),
    RestoreExtended(u64),
    //
    //-------- 6.4.2.5 Padding Instruction
    //
    Nop,
}

const DW_CFA_advance_loc_hi: u8 = 0x01;
const DW_CFA_offset_hi: u8 = 0x02;
const DW_CFA_restore_hi: u8 = 0x03;

const DW_CFA_nop: u8 = 0;
const DW_CFA_set_loc: u8 = 0x01;
const DW_CFA_advance_loc1: u8 = 0x02;
const DW_CFA_advance_loc2: u8 = 0x03;
const DW_CFA_advance_loc4: u8 = 0x04;
const DW_CFA_offset_extended: u8 = 0x05;
const DW_CFA_restore_extended: u8 = 0x06;
const DW_CFA_undefined: u8 = 0x07;
const DW_CFA_same_value: u8 = 0x08;
const DW_CFA_def_cfa: u8 = 0x0c;
const DW_CFA_def_cfa_register: u8 = 0x0d;
const DW_CFA_def_cfa_offset: u8 = 0x0e;
const DW_CFA_def_cfa_expression: u8 = 0x0f;
const DW_CFA_expression: u8 = 0x10;
const DW_CFA_offset_extended_sf: u8 = 0x11;
const DW_CFA_def_cfa_sf: u8 = 0x12;
const DW_CFA_def_cfa_offset_sf: u8 = 0x13;

/// Decodes an instruction stream. Yields an error for the first opcode it
/// cannot decode and stops there.
pub struct InstrIter<'a> {
    data: Cursor<'a>,
    address_size: u8,
}

impl<'a> InstrIter<'a> {
    pub fn new(data: &'a [u8], address_size: u8) -> Self {
        Self {
            data: Cursor(data),
            address_size,
        }
    }

    fn decode(&mut self, b: u8) -> Result<Instruction> {
        let data = &mut self.data;
        let low_6 = b & (u8::MAX >> 2);
        Ok(match b >> 6 {
            DW_CFA_advance_loc_hi => Instruction::AdvanceLoc(low_6),
            DW_CFA_offset_hi => Instruction::Offset {
                register: low_6,
                factored_offset: read_uleb128(data)?,
            },
            DW_CFA_restore_hi => Instruction::Restore(low_6),
            _ => match b {
                DW_CFA_nop => Instruction::Nop,
                DW_CFA_set_loc => Instruction::SetLoc(read_address(data, self.address_size)?),
                DW_CFA_advance_loc1 => Instruction::AdvanceLoc1(read_u8(data)?),
                DW_CFA_advance_loc2 => Instruction::AdvanceLoc2(read_u16(data)?),
                DW_CFA_advance_loc4 => Instruction::AdvanceLoc4(read_u32(data)?),
                DW_CFA_offset_extended => Instruction::OffsetExtended {
                    register: read_uleb128(data)?,
                    factored_offset: read_uleb128(data)?,
                },
                DW_CFA_restore_extended => Instruction::RestoreExtended(read_uleb128(data)?),
                DW_CFA_undefined => Instruction::Undefined(read_uleb128(data)?),
                DW_CFA_same_value => Instruction::SameValue(read_uleb128(data)?),
                DW_CFA_def_cfa => Instruction::DefCfa {
                    register: read_uleb128(data)?,
                    offset: read_uleb128(data)?,
                },
                DW_CFA_def_cfa_register => Instruction::DefCfaRegister(read_uleb128(data)?),
                DW_CFA_def_cfa_offset => Instruction::DefCfaOffset(read_uleb128(data)?),
                DW_CFA_offset_extended_sf => Instruction::OffsetExtendedSf {
                    register: read_uleb128(data)?,
                    factored_offset: read_ileb128(data)?,
                },
                DW_CFA_def_cfa_sf => Instruction::DefCfaSf {
                    register: read_uleb128(data)?,
                    factored_offset: read_ileb128(data)?,
                },
                DW_CFA_def_cfa_offset_sf => Instruction::DefCfaOffsetSf(read_ileb128(data)?),
                DW_CFA_def_cfa_expression | DW_CFA_expression => {
                    return Err(Error::not_implemented(format!(
                        "DWARF expression (DW_CFA {b:#04x})"
                    )))
                }
                other => {
                    return Err(Error::not_implemented(format!(
                        "call frame instruction {other:#04x}"
                    )))
                }
            },
        })
    }
}

impl Iterator for InstrIter<'_> {
    type Item = Result<Instruction>;

    fn next(&mut self) -> Option<Self::Item> {
        let b = read_u8(&mut self.data).ok()?;
        let instruction = self.decode(b);
        if instruction.is_err() {
            self.data.0 = &[];
        }
        Some(instruction)
    }
}
