use std::path::PathBuf;

use object::write::{Object, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};

use pmcview_symbols::ImageCache;

/// Write a small ELF with a .text section and a few function symbols, no
/// debug info. Resolution has to fall back to the symbol table.
fn write_symbols_elf(dir: &std::path::Path) -> PathBuf {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    obj.append_section_data(text, &[0x90u8; 0x1000], 16);

    for (name, value) in [
        (&b"start"[..], 0x100u64),
        (&b"main"[..], 0x500),
        (&b"_Z4workIiEvT_"[..], 0x800),
    ] {
        obj.add_symbol(Symbol {
            name: name.to_vec(),
            value,
            size: 0x100,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(text),
            flags: SymbolFlags::None,
        });
    }

    let path = dir.join("symbols-only.elf");
    std::fs::write(&path, obj.write().expect("emit ELF")).expect("write ELF");
    path
}

#[test]
fn elf_symbol_fallback_maps_to_nearest_symbol() {
    let dir = tempfile::tempdir().unwrap();
    let elf_path = write_symbols_elf(dir.path());
    let elf_path_str = elf_path.to_str().unwrap();

    let mut cache = ImageCache::new(false);
    let image = cache.get_image(elf_path_str);
    let in_main = cache.get_frame(image, 0x53f);
    let in_work = cache.get_frame(image, 0x802);
    cache.map_all();

    let frame = cache.frame(in_main).unwrap();
    assert!(!frame.is_unmapped());
    assert_eq!(frame.inline_frames().len(), 1);
    let inline = &frame.inline_frames()[0];
    assert_eq!(inline.func().as_str(), "main");
    assert_eq!(inline.demangled().as_str(), "main");
    assert_eq!(inline.file().as_str(), elf_path_str);
    assert_eq!(inline.code_line(), -1);
    assert_eq!(inline.func_line(), -1);
    assert_eq!(inline.offset(), 0x53f);

    let inline = &cache.frame(in_work).unwrap().inline_frames()[0];
    assert_eq!(inline.func().as_str(), "_Z4workIiEvT_");
    assert_eq!(inline.demangled().as_str(), "work(int)");
}

#[test]
fn frames_before_the_first_symbol_are_unmapped() {
    let dir = tempfile::tempdir().unwrap();
    let elf_path = write_symbols_elf(dir.path());

    let mut cache = ImageCache::new(false);
    let image = cache.get_image(elf_path.to_str().unwrap());
    let early = cache.get_frame(image, 0x10);
    cache.map_all();

    let frame = cache.frame(early).unwrap();
    assert!(frame.is_unmapped());
    assert_eq!(
        frame.inline_frames()[0].func().as_str(),
        "[unmapped_function]"
    );
}

#[test]
fn repeated_map_all_does_not_disturb_resolved_frames() {
    let dir = tempfile::tempdir().unwrap();
    let elf_path = write_symbols_elf(dir.path());

    let mut cache = ImageCache::new(false);
    let image = cache.get_image(elf_path.to_str().unwrap());
    let frame_ref = cache.get_frame(image, 0x53f);
    cache.map_all();

    // Delete the backing file; a second pass must not need it.
    std::fs::remove_file(&elf_path).unwrap();
    cache.map_all();

    let frame = cache.frame(frame_ref).unwrap();
    assert_eq!(frame.inline_frames()[0].func().as_str(), "main");
}

#[test]
fn garbage_file_resolves_to_unmapped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not-an-elf");
    std::fs::write(&path, b"this is not an object file").unwrap();

    let mut cache = ImageCache::new(false);
    let image = cache.get_image(path.to_str().unwrap());
    let frame_ref = cache.get_frame(image, 0x123);
    cache.map_all();

    assert!(cache.frame(frame_ref).unwrap().is_unmapped());
}
