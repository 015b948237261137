// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! High-level abstractions for working with large object files.

use crate::{AnyError, VirtAddr};

use std::io::Read as _;
use std::{fmt, fs, io, ops, path};

use flate2::read::ZlibDecoder;
use memmap2::{Mmap, MmapMut};
use object::{CompressionFormat, Object as _, ObjectSection as _, ObjectSymbol as _};
use zstd::stream::read::Decoder as ZstdDecoder;

/// Maximum size of an individual object section to keep in memory.
///
/// All sections where the decompressed representation is larger than this
/// constant are instead read into anonymous temporary files and `mmap`ed.
const SWAP_THRESH: usize = 16 * 1024 * 1024;

/// Result type shorthand.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors that can occur during object file parsing.
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Sections are compressed in an unsupported format")]
    UnsupportedCompressionFormat,

    #[error("Object file is too big to be loaded")]
    FileTooBig,

    #[error("IO error")]
    IO(#[from] io::Error),

    #[error(transparent)]
    Other(AnyError),
}

/// Conversion of [`object`] errors into ours, with type erasure.
///
/// The type is erased to keep [`object`] library types out of our public
/// interface. If code needs to special-case particular [`object`] errors,
/// they should be lifted into custom error variants instead.
impl From<object::Error> for Error {
    fn from(e: object::Error) -> Self {
        Self::Other(Box::new(e))
    }
}

/// Maps an object file or executable into memory.
///
/// This currently supports ELF and mach-O files. The backing file is `mmap`ed
/// to make reading more efficient. This currently uses the [`object`] library
/// to perform the actual heavy lifting, however this should be considered an
/// implementation detail.
pub struct File(Mmap);

impl File {
    /// Map the file at the given path into memory.
    pub fn load(path: &path::Path) -> Result<Self> {
        Self::load_file(&fs::File::open(path)?)
    }

    /// Map the given file into memory.
    pub fn load_file(file: &fs::File) -> Result<Self> {
        Ok(Self(unsafe { Mmap::map(file)? }))
    }

    /// Parse the header and create a reader.
    pub fn parse(&self) -> Result<Reader> {
        Ok(Reader(object::File::parse(&self.0[..])?))
    }
}

/// Provides read access to the data in an object file.
///
/// Created via [`File::parse`].
pub struct Reader<'obj>(object::File<'obj>);

impl<'obj> Reader<'obj> {
    /// Loads the section with the given name into memory.
    ///
    /// Depending on whether the section is compressed in the input file or not,
    /// this can be an expensive operation. Callers should store and retrieve
    /// the returned instance if it is needed more than once.
    pub fn load_section(&self, name: &[u8]) -> Result<Option<Section<'obj>>> {
        let Some(obj_sec) = self.0.section_by_name_bytes(name) else {
            return Ok(None);
        };

        Section::load_from_obj_section(&obj_sec).map(Some)
    }

    /// Checks whether this file has little-endian byte-order.
    pub fn is_little_endian(&self) -> bool {
        self.0.is_little_endian()
    }

    /// Whether the load address of this file is only decided at runtime.
    ///
    /// True for shared libraries and position-independent executables. Their
    /// symbol addresses are link-time addresses and need the load bias added
    /// to obtain runtime addresses. `ET_EXEC` executables are always loaded
    /// at their link address and must not be rebased.
    pub fn has_relocatable_load_addr(&self) -> bool {
        self.0.kind() == object::ObjectKind::Dynamic
    }

    /// Iterate over function symbols in this executable.
    ///
    /// Zero-sized symbols are kept: hand-written assembly routines often
    /// lack size information but remain perfectly valid probe targets.
    pub fn function_symbols(&self, source: SymbolSource) -> impl Iterator<Item = Symbol<'_>> {
        let iter = match source {
            SymbolSource::Debug => self.0.symbols(),
            SymbolSource::Dynamic => self.0.dynamic_symbols(),
        };

        iter.filter(|x| x.kind() == object::SymbolKind::Text)
            // Dynamic symbols with addr = 0 are imports. Also, compilers
            // often generate bogus debug symbol records at 0.
            .filter(|x| x.address() != 0)
            .filter_map(|x| {
                Some(Symbol {
                    name: x.name().ok()?, // just skip non-utf8 symbols
                    virt_addr: x.address(),
                    length: x.size(),
                })
            })
    }

    /// Iterate over the executable sections of this file.
    ///
    /// Sections without contents in the file (`SHT_NOBITS`) are skipped.
    pub fn code_sections(&self) -> impl Iterator<Item = CodeSection> + '_ {
        self.0
            .sections()
            .filter(|x| x.kind() == object::SectionKind::Text)
            .filter_map(|x| {
                let (file_offset, _) = x.file_range()?;
                Some(CodeSection {
                    virt_addr: x.address(),
                    virt_size: x.size(),
                    file_offset,
                })
            })
    }
}

/// Information and raw data of an object file section.
#[derive(Debug)]
pub struct Section<'obj> {
    virt_addr: VirtAddr,
    virt_size: u64,
    data: SectionData<'obj>,
}

impl<'obj> Section<'obj> {
    /// Construction from an [`object::Section`].
    fn load_from_obj_section(obj_sec: &object::Section<'obj, '_>) -> Result<Self> {
        Ok(Section {
            virt_addr: obj_sec.address(),
            virt_size: obj_sec.size(),
            data: SectionData::load_from_obj_sec(obj_sec)?,
        })
    }

    /// Returns the virtual address range of the section.
    pub fn va_range(&self) -> ops::Range<VirtAddr> {
        self.virt_addr..self.virt_addr + self.virt_size
    }

    /// Returns the virtual address of the first byte of this section.
    pub fn virt_addr(&self) -> VirtAddr {
        self.virt_addr
    }

    /// Returns the virtual size of the section.
    ///
    /// Can be larger than the actual data, padding must be assumed to be zeroed.
    pub fn virt_size(&self) -> u64 {
        self.virt_size
    }

    /// Tries borrowing the section data as a slice with `'obj` lifetime.
    ///
    /// This only works for sections where the data is not owned by the
    /// section thus has the larger `'obj` lifetime (instead of "`'self`").
    pub fn as_obj_slice(&self) -> Option<&'obj [u8]> {
        if let SectionData::Borrowed(slice) = self.data {
            Some(slice)
        } else {
            None
        }
    }
}

/// Allow using section objects where slices are expected.
impl ops::Deref for Section<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match &self.data {
            SectionData::Borrowed(x) => x,
            SectionData::InMemory(x) => &x[..],
            SectionData::Swapped(x) => &x[..],
        }
    }
}

/// Storage for object file sections.
pub enum SectionData<'obj> {
    /// Section was uncompressed in the input file and we simply kept a ref.
    Borrowed(&'obj [u8]),

    /// Section was originally compressed and we decompressed it into memory.
    InMemory(Vec<u8>),

    /// Section was originally compressed and we decompressed it into a
    /// memory-mapped temporary file.
    Swapped(MmapMut),
}

impl<'obj> SectionData<'obj> {
    /// Create [`Self::InMemory`] variant from a reader.
    fn read_into_memory(final_size: usize, mut reader: impl io::Read) -> Result<Self> {
        let mut mem_buf = Vec::with_capacity(final_size);
        reader.read_to_end(&mut mem_buf)?;
        Ok(SectionData::InMemory(mem_buf))
    }

    /// Create [`Self::Swapped`] variant from a reader.
    fn read_into_swap(mut reader: impl io::Read) -> Result<Self> {
        let mut file = tempfile::tempfile()?;
        io::copy(&mut reader, &mut file)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(SectionData::Swapped(mmap))
    }

    /// Creates a variant of the [`SectionData`] enum most appropriate for the
    /// given size.
    ///
    /// Small sections are decoded into memory, large ones into `mmap`ed
    /// temporary files.
    fn read_smart(final_size: usize, reader: impl io::Read) -> Result<Self> {
        if final_size >= SWAP_THRESH {
            Self::read_into_swap(reader)
        } else {
            Self::read_into_memory(final_size, reader)
        }
    }

    /// Load the data from the given [`object::Section`].
    fn load_from_obj_sec(sec: &object::Section<'obj, '_>) -> Result<Self> {
        let data = sec.compressed_data()?;

        // Ensure that the file fits into memory.
        let final_size: usize = data
            .uncompressed_size
            .try_into()
            .map_err(|_| Error::FileTooBig)?;

        if data.format == CompressionFormat::None {
            return Ok(SectionData::Borrowed(data.data));
        }

        Self::decompress(data.format, data.data, final_size)
    }

    /// Unpacks a compressed section into the storage fitting its final size.
    fn decompress(format: CompressionFormat, data: &[u8], final_size: usize) -> Result<Self> {
        let decoder: Box<dyn io::Read> = match format {
            CompressionFormat::Zlib => Box::new(ZlibDecoder::new(data)),
            CompressionFormat::Zstandard => Box::new(ZstdDecoder::new(data)?),
            _ => return Err(Error::UnsupportedCompressionFormat),
        };

        let decoder = decoder.take(final_size as u64);
        Self::read_smart(final_size, decoder)
    }
}

impl fmt::Debug for SectionData<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (storage, len) = match self {
            Self::Borrowed(x) => ("borrowed", x.len()),
            Self::InMemory(x) => ("in-memory", x.len()),
            Self::Swapped(x) => ("mmapped", x.len()),
        };

        write!(f, "SectionData([{} bytes, {}])", len, storage)
    }
}

/// Specifies an object symbol source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolSource {
    /// Debug symbol table (`.symtab`).
    Debug,

    /// Dynamic symbol table (`.dynsym`).
    Dynamic,
}

/// Basic executable function symbol.
#[derive(Debug, Clone)]
pub struct Symbol<'a> {
    /// Function name. Might be mangled.
    pub name: &'a str,
    /// Start address of the function.
    pub virt_addr: VirtAddr,
    /// Length of the function.
    pub length: u64,
}

impl Symbol<'_> {
    /// Constructs the address range for the symbol.
    pub fn range(&self) -> ops::Range<VirtAddr> {
        self.virt_addr..self.virt_addr.saturating_add(self.length)
    }
}

/// Location of an executable section within both the file and address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSection {
    /// Virtual address of the first byte of the section.
    pub virt_addr: VirtAddr,
    /// Size of the section in the address space.
    pub virt_size: u64,
    /// Offset of the section contents within the object file.
    pub file_offset: u64,
}

impl CodeSection {
    /// Returns the virtual address range of the section.
    pub fn va_range(&self) -> ops::Range<VirtAddr> {
        self.virt_addr..self.virt_addr + self.virt_size
    }

    /// Translates a link-time address within this section into a file offset.
    ///
    /// Returns [`None`] if the address lies outside of the section.
    pub fn file_offset_for(&self, link_addr: VirtAddr) -> Option<u64> {
        if self.va_range().contains(&link_addr) {
            Some(link_addr - self.virt_addr + self.file_offset)
        } else {
            None
        }
    }
}

/// Translates a link-time address into a runtime address.
///
/// ```
/// // Shared object loaded 0x7f00000000 bytes above its link address.
/// assert_eq!(probesym::objfile::to_runtime_addr(0x1234, 0x7f00000000), 0x7f00001234);
/// ```
pub fn to_runtime_addr(link_addr: VirtAddr, bias: i64) -> VirtAddr {
    link_addr.wrapping_add_signed(bias)
}

/// Translates a runtime address into a link-time address.
///
/// ```
/// assert_eq!(probesym::objfile::to_link_addr(0x7f00001234, 0x7f00000000), 0x1234);
/// ```
pub fn to_link_addr(runtime_addr: VirtAddr, bias: i64) -> VirtAddr {
    runtime_addr.wrapping_add_signed(bias.wrapping_neg())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{synthetic_elf, write_temp_elf, SynthSym};
    use std::io::Write as _;

    #[test]
    fn function_symbol_iteration() {
        let bytes = synthetic_elf(
            0x40,
            &[
                SynthSym::func("alpha", 0x10, 8),
                SynthSym::func("beta", 0x20, 4),
                SynthSym::func("asm_stub", 0x30, 0),
                SynthSym::undef("gamma"),
            ],
        );
        let temp = write_temp_elf(&bytes);
        let file = File::load(temp.path()).unwrap();
        let reader = file.parse().unwrap();

        let mut syms: Vec<_> = reader.function_symbols(SymbolSource::Debug).collect();
        syms.sort_by_key(|x| x.virt_addr);

        // `gamma` has no address and the data symbol isn't a function.
        assert_eq!(syms.len(), 3);
        assert_eq!(syms[0].name, "alpha");
        assert_eq!(syms[0].virt_addr, 0x10);
        assert_eq!(syms[0].length, 8);
        assert_eq!(syms[0].range(), 0x10..0x18);
        assert_eq!(syms[1].name, "beta");
        assert_eq!(syms[2].name, "asm_stub");
        assert_eq!(syms[2].range(), 0x30..0x30);

        // The fixture has no dynamic symbol table at all.
        assert_eq!(reader.function_symbols(SymbolSource::Dynamic).count(), 0);

        // Relocatable object: load address is fixed at link time.
        assert!(!reader.has_relocatable_load_addr());
    }

    #[test]
    fn executable_is_relocatable() {
        let exe = std::env::current_exe().unwrap();
        let file = File::load(&exe).unwrap();
        let reader = file.parse().unwrap();

        // Test binaries are position-independent executables.
        assert!(reader.has_relocatable_load_addr());
    }

    #[test]
    fn uncompressed_section() {
        let bytes = synthetic_elf(0x40, &[SynthSym::func("alpha", 0x10, 8)]);
        let temp = write_temp_elf(&bytes);
        let file = File::load(temp.path()).unwrap();
        let reader = file.parse().unwrap();

        let section = reader.load_section(b".text").unwrap().unwrap();
        assert!(matches!(section.data, SectionData::Borrowed(_)));
        assert_eq!(section.virt_addr(), 0);
        assert_eq!(section.va_range(), 0..0x40);
        assert_eq!(section.len(), 0x40);
        assert_eq!(section[..2], [0x90, 0x90]);
        assert!(section.as_obj_slice().is_some());

        assert!(reader.load_section(b".debug_info").unwrap().is_none());
    }

    #[test]
    fn code_section_file_offsets() {
        let bytes = synthetic_elf(0x40, &[SynthSym::func("alpha", 0x10, 8)]);

        // Expectations straight from the generic parser.
        let obj = object::File::parse(&bytes[..]).unwrap();
        let text = obj.section_by_name(".text").unwrap();
        let (expect_off, expect_size) = text.file_range().unwrap();

        let temp = write_temp_elf(&bytes);
        let file = File::load(temp.path()).unwrap();
        let reader = file.parse().unwrap();

        let secs: Vec<_> = reader.code_sections().collect();
        assert_eq!(secs.len(), 1);
        assert_eq!(secs[0].virt_addr, text.address());
        assert_eq!(secs[0].virt_size, expect_size);
        assert_eq!(secs[0].file_offset, expect_off);

        let addr = secs[0].virt_addr + 0x10;
        assert_eq!(secs[0].file_offset_for(addr), Some(expect_off + 0x10));

        let past_end = secs[0].virt_addr + secs[0].virt_size;
        assert_eq!(secs[0].file_offset_for(past_end), None);
    }

    #[test]
    fn storage_selection_by_size() {
        let data = SectionData::read_smart(4, &b"abcd"[..]).unwrap();
        assert!(matches!(data, SectionData::InMemory(_)));

        let zeros = io::repeat(0).take(SWAP_THRESH as u64);
        let data = SectionData::read_smart(SWAP_THRESH, zeros).unwrap();
        assert!(matches!(data, SectionData::Swapped(_)));
        assert_eq!(data_bytes(&data).len(), SWAP_THRESH);
    }

    #[test]
    fn decompression() {
        let original: Vec<u8> = (0..4096u32).flat_map(|x| x.to_le_bytes()).collect();

        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&original).unwrap();
        let zlib = enc.finish().unwrap();

        let data = SectionData::decompress(CompressionFormat::Zlib, &zlib, original.len()).unwrap();
        assert!(matches!(data, SectionData::InMemory(_)));
        assert_eq!(data_bytes(&data), &original[..]);

        let zst = zstd::stream::encode_all(&original[..], 0).unwrap();
        let data =
            SectionData::decompress(CompressionFormat::Zstandard, &zst, original.len()).unwrap();
        assert_eq!(data_bytes(&data), &original[..]);

        assert!(matches!(
            SectionData::decompress(CompressionFormat::Unknown, b"", 0),
            Err(Error::UnsupportedCompressionFormat)
        ));
    }

    #[test]
    fn addr_translation() {
        assert_eq!(to_runtime_addr(0x1234, 0x7f00000000), 0x7f00001234);
        assert_eq!(to_link_addr(0x7f00001234, 0x7f00000000), 0x1234);

        // Prelinked libraries can have a negative bias.
        assert_eq!(to_runtime_addr(0x7f00001234, -0x7f00000000), 0x1234);
        assert_eq!(to_link_addr(0x1234, -0x7f00000000), 0x7f00001234);
    }

    fn data_bytes<'a>(data: &'a SectionData<'_>) -> &'a [u8] {
        match data {
            SectionData::Borrowed(x) => x,
            SectionData::InMemory(x) => &x[..],
            SectionData::Swapped(x) => &x[..],
        }
    }
}
