//! Call frame information of one module.
//!
//! # how it works
//! The ELF loader hands us `.eh_frame` and `.debug_frame`. Both are split into
//! CIEs and FDEs once, when the module is loaded ([`parse`]). To unwind a
//! frame, the FDE covering the pc is looked up and the CIE and FDE programs are
//! replayed up to that pc ([`eval`]), which gives the rules for recovering the
//! caller's registers. DWARF expressions are not interpreted.

pub mod eval;
pub mod parse;

use std::path::Path;

use crate::arch::RegisterSet;
use crate::elf::{DwarfSections, ElfImage};
use crate::memory::MemoryReader;
use crate::status::{Error, Result};
use crate::unwind::Frame;

pub use parse::{Cie, Fde, FrameSection, FrameTable};

/// The parsed frame tables of a module, plus the section views they came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DwarfIndex {
    sections: DwarfSections,
    table: FrameTable,
}

/// Parse `.eh_frame`, then `.debug_frame`. A module without a single FDE is
/// [`Error::NoDebugData`].
pub fn build_cfi(image: &ElfImage, sections: &DwarfSections) -> Result<FrameTable> {
    let address_size = image.class().address_size();
    let mut table = FrameTable::default();
    if !sections.eh_frame.is_empty() {
        table.parse_section(image.data(), sections.eh_frame, FrameSection::EhFrame, address_size)?;
    }
    if !sections.debug_frame.is_empty() {
        table.parse_section(
            image.data(),
            sections.debug_frame,
            FrameSection::DebugFrame,
            address_size,
        )?;
    }

    if table.fdes.is_empty() {
        return Err(Error::NoDebugData(image.path().to_path_buf()));
    }
    Ok(table)
}

impl DwarfIndex {
    /// An index with no frame tables; only the first frame of a capture can
    /// be produced from it.
    pub fn empty(sections: DwarfSections) -> Self {
        Self {
            sections,
            table: FrameTable::default(),
        }
    }

    /// Index `image`. A missing `.debug_info` fails; CFI that is absent,
    /// malformed or uses unsupported features leaves the index empty.
    #[instrument(skip(image), fields(path = %image.path().display()))]
    pub fn build(image: &ElfImage) -> Result<Self> {
        let sections = image.collect_dwarf()?;

        match build_cfi(image, &sections) {
            Ok(table) => {
                debug!(
                    cies = table.cies.len(),
                    fdes = table.fdes.len(),
                    "parsed call frame information"
                );
                Ok(Self { sections, table })
            }
            Err(
                err @ (Error::NoDebugData(_) | Error::BadFormat(_) | Error::NotImplemented(_)),
            ) => {
                debug!("no usable call frame information: {err}");
                Ok(Self::empty(sections))
            }
            Err(err) => Err(err),
        }
    }

    pub fn sections(&self) -> &DwarfSections {
        &self.sections
    }

    pub fn cies(&self) -> &[Cie] {
        &self.table.cies
    }

    pub fn fdes(&self) -> &[Fde] {
        &self.table.fdes
    }

    pub fn has_cfi(&self) -> bool {
        !self.table.fdes.is_empty()
    }

    /// The first FDE whose range covers `pc`.
    pub fn find_fde(&self, pc: u64) -> Option<&Fde> {
        self.table.fdes.iter().find(|fde| fde.covers(pc))
    }

    pub fn cie_of(&self, fde: &Fde) -> Result<&Cie> {
        self.table
            .cies
            .get(fde.cie)
            .ok_or_else(|| Error::bad_format(format!("FDE at {:#x} has no CIE", fde.offset)))
    }
}

/// A loaded module: the file image and its frame tables.
#[derive(Debug)]
pub struct Module {
    image: ElfImage,
    index: DwarfIndex,
}

impl Module {
    pub fn load(path: &Path) -> Result<Self> {
        let image = ElfImage::open(path)?;
        let index = DwarfIndex::build(&image)?;
        Ok(Self { image, index })
    }

    pub fn path(&self) -> &Path {
        self.image.path()
    }

    pub fn index(&self) -> &DwarfIndex {
        &self.index
    }

    /// Replay `fde` for `pc`, turning `regs` into the caller's registers.
    pub fn eval(
        &self,
        fde: &Fde,
        pc: u64,
        regs: &mut RegisterSet,
        reader: &mut dyn MemoryReader,
    ) -> Result<Frame> {
        let cie = self.index.cie_of(fde)?;
        eval::eval(self.image.data(), cie, fde, pc, regs, reader)
    }
}

#[cfg(test)]
mod tests;
