use super::*;
use crate::arch::Arch;
use crate::memory::StackSnapshot;
use crate::status::Status;
use crate::testutil::{init_tracing, ElfBuilder, DEBUG_FRAME};

fn index_of(builder: ElfBuilder) -> Result<DwarfIndex> {
    let image = ElfImage::from_bytes("test.elf".into(), builder.build())?;
    DwarfIndex::build(&image)
}

#[test]
fn indexes_debug_frame() {
    init_tracing();
    let index = index_of(ElfBuilder::with_cfi()).unwrap();

    assert!(index.has_cfi());
    assert_eq!(index.cies().len(), 1);
    assert_eq!(index.fdes().len(), 1);
    assert_eq!(index.sections().debug_info.len, 16);

    let fde = index.find_fde(0x1000).unwrap();
    assert_eq!((fde.pc_begin, fde.pc_end()), (0x1000, 0x1040));
    assert_eq!(index.find_fde(0x103f), Some(fde));
    assert_eq!(index.find_fde(0x1040), None);
    assert_eq!(index.find_fde(0xfff), None);

    let cie = index.cie_of(fde).unwrap();
    assert_eq!(cie.section, FrameSection::DebugFrame);
    assert_eq!(cie.return_address_register, 16);
}

#[test]
fn overlapping_fdes_resolve_to_the_first() {
    // Same CIE, two FDEs: [0x1000, 0x1040) then [0x1020, 0x1080).
    let mut frame = DEBUG_FRAME.to_vec();
    #[rustfmt::skip]
    frame.extend_from_slice(&[
        0x14, 0, 0, 0,
        0, 0, 0, 0,
        0x20, 0x10, 0, 0, 0, 0, 0, 0,
        0x60, 0, 0, 0, 0, 0, 0, 0,
    ]);
    let index = index_of(
        ElfBuilder::new()
            .section(".debug_info", 0, &[0; 4])
            .section(".debug_frame", 0, &frame),
    )
    .unwrap();

    assert_eq!(index.fdes().len(), 2);
    assert_eq!(index.find_fde(0x1030).unwrap().pc_begin, 0x1000);
    assert_eq!(index.find_fde(0x1040).unwrap().pc_begin, 0x1020);
}

#[test]
fn unusable_cfi_leaves_the_index_empty() {
    init_tracing();
    let base = || ElfBuilder::new().section(".debug_info", 0, &[0; 4]);

    // no frame sections
    let index = index_of(base()).unwrap();
    assert!(!index.has_cfi());
    assert_eq!(index.find_fde(0x1000), None);

    // a CIE without FDEs
    let index = index_of(base().section(".debug_frame", 0, &DEBUG_FRAME[..18])).unwrap();
    assert!(!index.has_cfi());
    assert!(index.cies().is_empty());

    // a record running off the section
    let index = index_of(base().section(".debug_frame", 0, &[0x40, 0, 0, 0, 0xff])).unwrap();
    assert!(!index.has_cfi());

    // 64-bit DWARF
    let index = index_of(base().section(".eh_frame", 0x2000, &[0xff; 12])).unwrap();
    assert!(!index.has_cfi());
    assert_eq!(index.sections().eh_frame.address, 0x2000);
}

#[test]
fn build_cfi_reports_missing_fdes() {
    let image = ElfImage::from_bytes(
        "cie-only.elf".into(),
        ElfBuilder::new()
            .section(".debug_info", 0, &[0; 4])
            .section(".debug_frame", 0, &DEBUG_FRAME[..18])
            .build(),
    )
    .unwrap();
    let sections = image.collect_dwarf().unwrap();

    let err = build_cfi(&image, &sections).unwrap_err();
    assert!(matches!(&err, Error::NoDebugData(path) if path == image.path()));
}

#[test]
fn missing_debug_info_fails_the_index() {
    let err = index_of(ElfBuilder::new().section(".debug_frame", 0, &DEBUG_FRAME)).unwrap_err();
    assert_eq!(err.status(), Status::NoDebugData);
}

#[test]
fn module_unwinds_one_frame() {
    init_tracing();
    let file = ElfBuilder::with_cfi().write();
    let module = Module::load(file.path()).unwrap();
    assert_eq!(module.path(), file.path());
    assert!(module.index().has_cfi());

    let mut regs = RegisterSet::prepare(Arch::X86_64).unwrap();
    regs.pc = 0x1020;
    regs.sp = 0x7f00;
    regs.regs[7] = 0x7f00;
    let mut stack = vec![0; 0x20];
    stack[0x18..].copy_from_slice(&0x4242u64.to_le_bytes());
    let mut stack = StackSnapshot::new(0x7f00, stack);

    let fde = module.index().find_fde(regs.pc).unwrap().clone();
    let frame = module.eval(&fde, regs.pc, &mut regs, &mut stack).unwrap();
    assert_eq!((frame.cfa, frame.ra), (0x7f10, 0x4242));
    assert_eq!((regs.sp, regs.pc), (0x7f10, 0x4242));
}

#[test]
fn module_load_propagates_file_errors() {
    let dir = tempfile::tempdir().unwrap();
    let err = Module::load(&dir.path().join("missing.so")).unwrap_err();
    assert_eq!(err.status(), Status::Io);
}

#[rustfmt::skip]
const EH_FRAME_ABSPTR: [u8; 41] = [
    // CIE, "zR" with absptr, CFA = r29
    0x10, 0, 0, 0,
    0, 0, 0, 0,
    1, b'z', b'R', 0,
    1, 0x7c, 31,
    1, 0x00,
    0x0c, 29, 0,
    // FDE: [0x1000, 0x1040) as 4-byte addresses
    0x0d, 0, 0, 0,
    0x18, 0, 0, 0,
    0x00, 0x10, 0, 0,
    0x40, 0, 0, 0,
    0,
    // terminator
    0, 0, 0, 0,
];

#[test]
fn absptr_follows_the_elf_class() {
    init_tracing();
    let index = index_of(
        ElfBuilder::new()
            .elf32()
            .section(".debug_info", 0, &[0; 4])
            .section(".eh_frame", 0x800, &EH_FRAME_ABSPTR),
    )
    .unwrap();

    assert!(index.has_cfi());
    assert_eq!(index.cies()[0].address_size, 4);
    let fde = index.find_fde(0x1010).unwrap();
    assert_eq!((fde.pc_begin, fde.pc_range), (0x1000, 0x40));

    // Read as 8-byte pointers the FDE runs off its record.
    let index = index_of(
        ElfBuilder::new()
            .section(".debug_info", 0, &[0; 4])
            .section(".eh_frame", 0x800, &EH_FRAME_ABSPTR),
    )
    .unwrap();
    assert!(!index.has_cfi());
}

/// `.eh_frame_hdr` search table of a linked binary: the start address of
/// every FDE, as the linker computed it.
fn search_table(image: &ElfImage) -> Vec<u64> {
    let view = image.section(".eh_frame_hdr").unwrap().unwrap();
    let hdr = image.bytes(view);
    let u32_at = |at: usize| u32::from_le_bytes(hdr[at..at + 4].try_into().unwrap());

    // version 1; eh_frame_ptr pcrel|sdata4, fde_count udata4, table datarel|sdata4
    assert_eq!(&hdr[..4], &[1, 0x1b, 0x03, 0x3b]);
    let count = u32_at(8) as usize;
    (0..count)
        .map(|i| view.address.wrapping_add_signed(i64::from(u32_at(12 + i * 8) as i32)))
        .collect()
}

#[test]
fn pcrel_starts_match_the_linker() {
    init_tracing();
    let image = ElfImage::open(&std::env::current_exe().unwrap()).unwrap();
    let eh_frame = image.section(".eh_frame").unwrap().unwrap();

    let mut table = FrameTable::default();
    table
        .parse_section(
            image.data(),
            eh_frame,
            FrameSection::EhFrame,
            image.class().address_size(),
        )
        .unwrap();

    let starts: std::collections::BTreeSet<u64> =
        table.fdes.iter().map(|fde| fde.pc_begin).collect();
    let expected = search_table(&image);
    assert!(!expected.is_empty());
    assert_eq!(table.fdes.len(), expected.len());
    let missing: Vec<_> = expected.iter().filter(|pc| !starts.contains(pc)).collect();
    assert!(
        missing.is_empty(),
        "{} FDE starts differ, first {:#x?}",
        missing.len(),
        &missing[..missing.len().min(4)]
    );
}
