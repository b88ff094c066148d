//! Fixtures shared by the unit tests.

use std::io::Write;

use tempfile::NamedTempFile;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::elf::ElfClass;

/// Route `tracing` output to the test harness. `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::Registry::default()
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::WARN.into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A `.debug_frame` with one CIE (`CFA = r7 + 16`, return address in column
/// 16 at `CFA + 8`) and one FDE covering `[0x1000, 0x1040)`.
#[rustfmt::skip]
pub const DEBUG_FRAME: [u8; 42] = [
    0x0e, 0, 0, 0,
    0xff, 0xff, 0xff, 0xff,
    1, 0,
    1, 8, 0x10,
    0x0c, 7, 0x10,
    0x90, 1,
    0x14, 0, 0, 0,
    0, 0, 0, 0,
    0x00, 0x10, 0, 0, 0, 0, 0, 0,
    0x40, 0, 0, 0, 0, 0, 0, 0,
];

/// Writes minimal relocatable ELF files: a null section, the given sections
/// and a section name table, nothing else.
#[derive(Debug, Clone)]
pub struct ElfBuilder {
    class: ElfClass,
    sections: Vec<(String, u64, Vec<u8>)>,
}

impl Default for ElfBuilder {
    fn default() -> Self {
        Self {
            class: ElfClass::Elf64,
            sections: Vec::new(),
        }
    }
}

impl ElfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elf32(mut self) -> Self {
        self.class = ElfClass::Elf32;
        self
    }

    pub fn section(mut self, name: &str, address: u64, data: &[u8]) -> Self {
        self.sections.push((name.to_owned(), address, data.to_vec()));
        self
    }

    /// A module with `.debug_info` and [`DEBUG_FRAME`].
    pub fn with_cfi() -> Self {
        Self::new()
            .section(".text", 0x1000, &[0x90; 0x40])
            .section(".debug_info", 0, &[0; 16])
            .section(".debug_frame", 0, &DEBUG_FRAME)
    }

    pub fn build(&self) -> Vec<u8> {
        let (ehsize, shentsize) = match self.class {
            ElfClass::Elf64 => (64, 64),
            ElfClass::Elf32 => (52, 40),
        };

        let mut out = vec![0u8; ehsize];
        let mut headers = Vec::new();
        let mut shstrtab = vec![0u8];

        // (name offset, type, address, file offset, size)
        headers.push((0u32, 0u32, 0u64, 0u64, 0u64));
        for (name, address, data) in &self.sections {
            let name_offset = shstrtab.len() as u32;
            shstrtab.extend_from_slice(name.as_bytes());
            shstrtab.push(0);
            headers.push((name_offset, 1, *address, out.len() as u64, data.len() as u64));
            out.extend_from_slice(data);
        }
        let name_offset = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab\0");
        headers.push((name_offset, 3, 0, out.len() as u64, shstrtab.len() as u64));
        out.extend_from_slice(&shstrtab);

        while out.len() % 8 != 0 {
            out.push(0);
        }
        let shoff = out.len();
        let shnum = headers.len() as u16;
        for (name, kind, address, offset, size) in headers {
            out.extend_from_slice(&name.to_le_bytes());
            out.extend_from_slice(&kind.to_le_bytes());
            match self.class {
                ElfClass::Elf64 => {
                    out.extend_from_slice(&0u64.to_le_bytes());
                    out.extend_from_slice(&address.to_le_bytes());
                    out.extend_from_slice(&offset.to_le_bytes());
                    out.extend_from_slice(&size.to_le_bytes());
                    out.extend_from_slice(&[0; 24]);
                }
                ElfClass::Elf32 => {
                    out.extend_from_slice(&0u32.to_le_bytes());
                    out.extend_from_slice(&(address as u32).to_le_bytes());
                    out.extend_from_slice(&(offset as u32).to_le_bytes());
                    out.extend_from_slice(&(size as u32).to_le_bytes());
                    out.extend_from_slice(&[0; 16]);
                }
            }
        }

        out[..4].copy_from_slice(b"\x7fELF");
        out[4] = match self.class {
            ElfClass::Elf32 => 1,
            ElfClass::Elf64 => 2,
        };
        out[5] = 1;
        out[6] = 1;
        let put_u16 = |out: &mut Vec<u8>, at: usize, value: u16| {
            out[at..at + 2].copy_from_slice(&value.to_le_bytes())
        };
        put_u16(&mut out, 16, 1);
        match self.class {
            ElfClass::Elf64 => {
                put_u16(&mut out, 18, 62);
                out[20..24].copy_from_slice(&1u32.to_le_bytes());
                out[0x28..0x30].copy_from_slice(&(shoff as u64).to_le_bytes());
                put_u16(&mut out, 0x34, ehsize as u16);
                put_u16(&mut out, 0x3a, shentsize as u16);
                put_u16(&mut out, 0x3c, shnum);
                put_u16(&mut out, 0x3e, shnum - 1);
            }
            ElfClass::Elf32 => {
                put_u16(&mut out, 18, 8);
                out[20..24].copy_from_slice(&1u32.to_le_bytes());
                out[0x20..0x24].copy_from_slice(&(shoff as u32).to_le_bytes());
                put_u16(&mut out, 0x28, ehsize as u16);
                put_u16(&mut out, 0x2e, shentsize as u16);
                put_u16(&mut out, 0x30, shnum);
                put_u16(&mut out, 0x32, shnum - 1);
            }
        }

        out
    }

    pub fn write(&self) -> NamedTempFile {
        write_file(&self.build())
    }
}

pub fn write_file(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}
