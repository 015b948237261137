// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod context;
pub mod dbglog;
pub mod demangle;
pub mod dwarf;
pub mod funcmap;
pub mod ldtrace;
pub mod objfile;
pub mod pattern;
pub mod procmaps;

mod request;
mod resolve;

/// Type-erased error type.
///
/// We primarily use this to hand out errors from third-party libraries where
/// lifting them into distinct error variants didn't make sense because no
/// consumer cares about differentiating between different error variants.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// Virtual address in the ELF address space or in process memory.
pub type VirtAddr = u64;

#[cfg(test)]
mod tests {
    use object::write::{Object, Symbol, SymbolSection};
    use object::{
        Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope,
    };
    use std::io::Write as _;

    /// Symbol to be placed into a [`synthetic_elf`] fixture.
    pub struct SynthSym {
        pub name: &'static str,
        pub value: u64,
        pub size: u64,
        pub undefined: bool,
    }

    impl SynthSym {
        /// Function symbol defined in `.text` at the given section offset.
        pub fn func(name: &'static str, value: u64, size: u64) -> Self {
            Self {
                name,
                value,
                size,
                undefined: false,
            }
        }

        /// Undefined function symbol, as produced by a dynamic import.
        pub fn undef(name: &'static str) -> Self {
            Self {
                name,
                value: 0,
                size: 0,
                undefined: true,
            }
        }
    }

    /// Builds a minimal ELF with a `.text` section of `text_size` NOP bytes,
    /// a small `.data` section and the given function symbols.
    pub fn synthetic_elf(text_size: u64, syms: &[SynthSym]) -> Vec<u8> {
        let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);

        let text = obj.add_section(vec![], b".text".to_vec(), SectionKind::Text);
        obj.append_section_data(text, &vec![0x90_u8; text_size as usize], 16);

        let data = obj.add_section(vec![], b".data".to_vec(), SectionKind::Data);
        obj.append_section_data(data, &[0_u8; 8], 8);

        // A data symbol that function-symbol iteration must never yield.
        obj.add_symbol(Symbol {
            name: b"some_data".to_vec(),
            value: 0,
            size: 8,
            kind: SymbolKind::Data,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(data),
            flags: SymbolFlags::None,
        });

        for sym in syms {
            obj.add_symbol(Symbol {
                name: sym.name.as_bytes().to_vec(),
                value: sym.value,
                size: sym.size,
                kind: SymbolKind::Text,
                scope: SymbolScope::Linkage,
                weak: false,
                section: if sym.undefined {
                    SymbolSection::Undefined
                } else {
                    SymbolSection::Section(text)
                },
                flags: SymbolFlags::None,
            });
        }

        obj.write().expect("synthetic ELF must serialize")
    }

    /// Persists fixture bytes to a temporary file so that path-based APIs can
    /// open them. The file lives for as long as the returned handle.
    pub fn write_temp_elf(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file creation must succeed");
        file.write_all(bytes).expect("temp file write must succeed");
        file
    }

    /// File offset of the `.text` contents within a [`synthetic_elf`] image.
    pub fn text_file_offset(elf: &[u8]) -> u64 {
        use object::{Object as _, ObjectSection as _};

        let obj = object::File::parse(elf).expect("fixture must parse");
        let text = obj.section_by_name(".text").expect("fixture has .text");
        text.file_range().expect("fixture .text is not virtual").0
    }
}
