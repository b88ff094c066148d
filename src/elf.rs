//! Just enough ELF to find the DWARF sections of a module.
//!
//! The whole file is read into memory once; sections are handed out as
//! [`SectionView`]s (offset and length into that buffer) so nothing is copied
//! and the owning [`ElfImage`] stays the single owner of the bytes.

use std::{
    fs::File,
    io,
    ops::Range,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use crate::status::{Error, Result};

const ELF_MAGIC: [u8; 4] = *b"\x7fELF";
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_NIDENT: usize = 16;
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl ElfClass {
    fn header_size(self) -> usize {
        match self {
            ElfClass::Elf32 => 52,
            ElfClass::Elf64 => 64,
        }
    }

    fn section_header_size(self) -> usize {
        match self {
            ElfClass::Elf32 => 40,
            ElfClass::Elf64 => 64,
        }
    }

    pub fn address_size(self) -> u8 {
        match self {
            ElfClass::Elf32 => 4,
            ElfClass::Elf64 => 8,
        }
    }
}

/// A section inside an [`ElfImage`]. Always lies within the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionView {
    pub offset: usize,
    pub len: usize,
    /// Link-time virtual address of the first byte (`sh_addr`).
    pub address: u64,
}

impl SectionView {
    pub const EMPTY: SectionView = SectionView {
        offset: 0,
        len: 0,
        address: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DwarfSections {
    pub debug_info: SectionView,
    pub debug_frame: SectionView,
    pub eh_frame: SectionView,
}

struct SectionHeader {
    name: u32,
    address: u64,
    offset: u64,
    size: u64,
}

pub struct ElfImage {
    path: PathBuf,
    data: Box<[u8]>,
    class: ElfClass,
    shoff: usize,
    shentsize: usize,
    shnum: usize,
    shstrtab: Range<usize>,
}

impl std::fmt::Debug for ElfImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElfImage")
            .field("path", &self.path)
            .field("size", &self.data.len())
            .field("class", &self.class)
            .field("shnum", &self.shnum)
            .finish()
    }
}

fn read_array<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N]> {
    offset
        .checked_add(N)
        .and_then(|end| data.get(offset..end))
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| {
            Error::bad_format(format!(
                "{N} byte read at {offset:#x} past end of image ({:#x})",
                data.len()
            ))
        })
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    read_array(data, offset).map(u16::from_le_bytes)
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    read_array(data, offset).map(u32::from_le_bytes)
}

fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    read_array(data, offset).map(u64::from_le_bytes)
}

fn to_usize(value: u64, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::bad_format(format!("{what} {value:#x} overflows")))
}

impl ElfImage {
    /// Read `path` in one positioned read and index its section table.
    #[instrument]
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path.display().to_string(), e))?;
        let size = file
            .metadata()
            .map_err(|e| Error::io(path.display().to_string(), e))?
            .len();
        if size == 0 {
            return Err(Error::bad_format(format!("{} is empty", path.display())));
        }
        let size = usize::try_from(size).map_err(|_| {
            Error::io(
                path.display().to_string(),
                io::Error::new(io::ErrorKind::OutOfMemory, "file too large"),
            )
        })?;

        let mut data = vec![0u8; size];
        let read = file
            .read_at(&mut data, 0)
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        if read != size {
            return Err(Error::io(
                path.display().to_string(),
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("read {read} of {size} bytes"),
                ),
            ));
        }
        trace!("read {size} bytes");

        Self::from_bytes(path.to_path_buf(), data)
    }

    /// Index an image that is already in memory.
    pub fn from_bytes(path: PathBuf, data: Vec<u8>) -> Result<Self> {
        let data = data.into_boxed_slice();

        if data.len() < EI_NIDENT || data[..4] != ELF_MAGIC {
            return Err(Error::bad_format("missing ELF magic"));
        }
        if data[EI_DATA] != ELFDATA2LSB {
            return Err(Error::bad_format(format!(
                "unsupported byte order {} (only little endian is read)",
                data[EI_DATA]
            )));
        }
        let class = match data[EI_CLASS] {
            ELFCLASS32 => ElfClass::Elf32,
            ELFCLASS64 => ElfClass::Elf64,
            other => return Err(Error::bad_format(format!("unknown ELF class {other}"))),
        };
        if data.len() < class.header_size() {
            return Err(Error::bad_format("truncated ELF header"));
        }

        let (shoff, shentsize, shnum, shstrndx) = match class {
            ElfClass::Elf64 => (
                to_usize(read_u64(&data, 0x28)?, "e_shoff")?,
                read_u16(&data, 0x3a)?,
                read_u16(&data, 0x3c)?,
                read_u16(&data, 0x3e)?,
            ),
            ElfClass::Elf32 => (
                to_usize(u64::from(read_u32(&data, 0x20)?), "e_shoff")?,
                read_u16(&data, 0x2e)?,
                read_u16(&data, 0x30)?,
                read_u16(&data, 0x32)?,
            ),
        };
        let (shentsize, shnum, shstrndx) = (
            usize::from(shentsize),
            usize::from(shnum),
            usize::from(shstrndx),
        );

        if shoff == 0 || shnum == 0 {
            return Err(Error::bad_format("no section header table"));
        }
        if shentsize < class.section_header_size() {
            return Err(Error::bad_format(format!(
                "section header entry size {shentsize} too small"
            )));
        }
        let table_end = shentsize
            .checked_mul(shnum)
            .and_then(|len| len.checked_add(shoff))
            .ok_or_else(|| Error::bad_format("section header table overflows"))?;
        if table_end > data.len() {
            return Err(Error::bad_format(format!(
                "section header table ends at {table_end:#x}, image is {:#x}",
                data.len()
            )));
        }
        if shstrndx >= shnum {
            return Err(Error::bad_format(format!(
                "string table index {shstrndx} out of {shnum} sections"
            )));
        }

        let mut image = ElfImage {
            path,
            data,
            class,
            shoff,
            shentsize,
            shnum,
            shstrtab: 0..0,
        };
        let strtab = image.header(shstrndx)?;
        image.shstrtab = image.view_of(&strtab)?.range();

        debug!(
            path = %image.path.display(),
            ?class,
            sections = shnum,
            "indexed ELF image"
        );
        Ok(image)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn class(&self) -> ElfClass {
        self.class
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The whole file.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes of a view handed out by this image.
    pub fn bytes(&self, view: SectionView) -> &[u8] {
        &self.data[view.range()]
    }

    fn header(&self, index: usize) -> Result<SectionHeader> {
        let at = self.shoff + index * self.shentsize;
        let data = &self.data;
        Ok(match self.class {
            ElfClass::Elf64 => SectionHeader {
                name: read_u32(data, at)?,
                address: read_u64(data, at + 16)?,
                offset: read_u64(data, at + 24)?,
                size: read_u64(data, at + 32)?,
            },
            ElfClass::Elf32 => SectionHeader {
                name: read_u32(data, at)?,
                address: u64::from(read_u32(data, at + 12)?),
                offset: u64::from(read_u32(data, at + 16)?),
                size: u64::from(read_u32(data, at + 20)?),
            },
        })
    }

    fn view_of(&self, header: &SectionHeader) -> Result<SectionView> {
        let end = header
            .offset
            .checked_add(header.size)
            .filter(|end| *end <= self.data.len() as u64)
            .ok_or_else(|| {
                Error::bad_format(format!(
                    "section [{:#x}, +{:#x}) outside image of {:#x} bytes",
                    header.offset,
                    header.size,
                    self.data.len()
                ))
            })?;
        let offset = to_usize(header.offset, "sh_offset")?;
        Ok(SectionView {
            offset,
            len: to_usize(end, "section end")? - offset,
            address: header.address,
        })
    }

    fn section_name(&self, header: &SectionHeader) -> Result<&[u8]> {
        let strtab = &self.data[self.shstrtab.clone()];
        let start = usize::try_from(header.name)
            .ok()
            .filter(|start| *start < strtab.len())
            .ok_or_else(|| Error::bad_format(format!("section name {:#x}", header.name)))?;
        let len = strtab[start..]
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| Error::bad_format("unterminated section name"))?;
        Ok(&strtab[start..start + len])
    }

    /// Find a section by name. `Ok(None)` means the image has no such section.
    pub fn section(&self, name: &str) -> Result<Option<SectionView>> {
        for index in 0..self.shnum {
            let header = self.header(index)?;
            if self.section_name(&header)? != name.as_bytes() {
                continue;
            }
            let view = self.view_of(&header)?;
            trace!(name, offset = view.offset, len = view.len, "found section");
            return Ok(Some(view));
        }
        Ok(None)
    }

    /// `.debug_info` is required; the frame sections come back empty when
    /// missing.
    pub fn collect_dwarf(&self) -> Result<DwarfSections> {
        let debug_info = self
            .section(".debug_info")?
            .ok_or_else(|| Error::NoDebugData(self.path.clone()))?;
        let debug_frame = self.section(".debug_frame")?.unwrap_or(SectionView::EMPTY);
        let eh_frame = self.section(".eh_frame")?.unwrap_or(SectionView::EMPTY);

        Ok(DwarfSections {
            debug_info,
            debug_frame,
            eh_frame,
        })
    }
}
