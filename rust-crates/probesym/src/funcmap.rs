// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Address-indexed lookup tables for function and source line info.
//!
//! [`FuncMap`] answers "what function (and source line) is at this address"
//! queries against the link-time address space of one object file. DWARF
//! data is preferred because it also covers static functions and source
//! locations; files without it fall back to their symbol tables.

use crate::{debug, demangle, dwarf, objfile, VirtAddr};
use fallible_iterator::FallibleIterator;
use intervaltree::{Element, IntervalTree};
use smallvec::SmallVec;
use std::collections::HashSet;
use std::iter;
use std::ops::Range;
use std::rc::Rc;

/// Function and line lookup tables for a single object file.
pub struct FuncMap {
    funcs: IntervalTree<VirtAddr, Rc<FuncInfo>>,
    lines: IntervalTree<VirtAddr, SourceLine>,
}

/// Shared info for all address ranges of one function.
struct FuncInfo {
    /// Demangled function name.
    name: String,
    /// Link-time address of the function entry point.
    entry: VirtAddr,
}

/// Function found at a queried address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncHit<'map> {
    /// Demangled function name.
    pub name: &'map str,
    /// Link-time address of the function entry point.
    pub entry: VirtAddr,
}

/// Source location covering an address range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// Source file path.
    pub file: String,
    /// Line number, starting at `1`.
    pub line: Option<u32>,
}

impl FuncMap {
    /// Builds the lookup tables for the given object file.
    ///
    /// Never fails: files with broken or absent DWARF data fall back to
    /// their symbol tables, and files without those simply produce empty
    /// tables that never report a hit.
    pub fn build(reader: &objfile::Reader<'_>) -> Self {
        match Self::from_dwarf(reader) {
            Ok(map) if map.has_functions() => map,
            Ok(_) => {
                debug!("no DWARF function info, falling back to symbol tables");
                Self::from_symbols(reader)
            }
            Err(e) => {
                debug!("failed to read DWARF data ({e}), falling back to symbol tables");
                Self::from_symbols(reader)
            }
        }
    }

    /// Builds the tables from DWARF subprogram and line table data.
    fn from_dwarf(reader: &objfile::Reader<'_>) -> dwarf::Result<Self> {
        let sections = dwarf::Sections::load(reader)?;
        let units = sections.units()?;

        let mut funcs = Vec::new();
        let mut lines = Vec::new();

        let mut unit_iter = units.iter();
        while let Some(unit) = unit_iter.next()? {
            // A single bad unit must not discard the data from all others.
            if let Err(e) = collect_unit(&unit, &mut funcs, &mut lines) {
                debug!("skipping unit {unit:?}: {e}");
            }
        }

        Ok(Self {
            funcs: funcs.into_iter().collect(),
            lines: lines.into_iter().collect(),
        })
    }

    /// Builds the function table from the symbol tables. No line info.
    fn from_symbols(reader: &objfile::Reader<'_>) -> Self {
        use objfile::SymbolSource;

        let mut seen = HashSet::new();
        let mut funcs = Vec::new();

        // The debug symbol table is a superset of the dynamic one in
        // unstripped files; chaining both covers stripped files too.
        let debug_syms = reader.function_symbols(SymbolSource::Debug);
        let dynamic_syms = reader.function_symbols(SymbolSource::Dynamic);

        for sym in debug_syms.chain(dynamic_syms) {
            // Zero-sized symbols can't participate in range queries.
            if sym.range().is_empty() {
                continue;
            }
            if !seen.insert(sym.virt_addr) {
                continue;
            }

            funcs.push(Element {
                range: sym.range(),
                value: Rc::new(FuncInfo {
                    name: demangle::demangle(sym.name).into_owned(),
                    entry: sym.virt_addr,
                }),
            });
        }

        Self {
            funcs: funcs.into_iter().collect(),
            lines: iter::empty::<Element<VirtAddr, SourceLine>>().collect(),
        }
    }

    /// Finds the function covering the given link-time address.
    ///
    /// When covering ranges overlap (e.g. a local function emitted within
    /// the range of its parent), the smallest range wins, with the lower
    /// start address as the tie breaker.
    pub fn function_at(&self, addr: VirtAddr) -> Option<FuncHit<'_>> {
        self.funcs
            .query_point(addr)
            .min_by_key(|e| (e.range.end - e.range.start, e.range.start))
            .map(|e| FuncHit {
                name: &e.value.name,
                entry: e.value.entry,
            })
    }

    /// Finds the source location covering the given link-time address.
    pub fn source_at(&self, addr: VirtAddr) -> Option<&SourceLine> {
        self.lines
            .query_point(addr)
            .min_by_key(|e| (e.range.end - e.range.start, e.range.start))
            .map(|e| &e.value)
    }

    fn has_functions(&self) -> bool {
        self.funcs.iter().next().is_some()
    }
}

/// Collects the function ranges and line table entries of one unit.
fn collect_unit(
    unit: &dwarf::Unit<'_, '_>,
    funcs: &mut Vec<Element<VirtAddr, Rc<FuncInfo>>>,
    lines: &mut Vec<Element<VirtAddr, SourceLine>>,
) -> dwarf::Result {
    let mut sp_iter = unit.subprograms();
    while let Some(mut sp) = sp_iter.next()? {
        let Some(name) = sp.name()? else {
            continue;
        };

        let mut ranges: SmallVec<[Range<VirtAddr>; 4]> = SmallVec::new();
        if let Some(mut range_iter) = sp.take_ranges() {
            while let Some(rng) = range_iter.next()? {
                // Ranges at 0 or 1 belong to functions that the linker
                // discarded; indexing them would shadow real functions.
                if rng.start <= 1 || rng.is_empty() {
                    continue;
                }

                ranges.push(rng);
            }
        }

        if ranges.is_empty() {
            continue;
        }

        let entry = ranges.iter().map(|x| x.start).min().unwrap_or(0);
        let info = Rc::new(FuncInfo {
            name: demangle::demangle(&name).into_owned(),
            entry,
        });

        for range in ranges {
            funcs.push(Element {
                range,
                value: info.clone(),
            });
        }
    }

    if let Some(mut line_iter) = unit.line_iter() {
        while let Some(entry) = line_iter.next()? {
            if entry.rng.start <= 1 || entry.rng.is_empty() {
                continue;
            }

            lines.push(Element {
                range: entry.rng.clone(),
                value: SourceLine {
                    file: entry.file.to_string(),
                    line: entry.line.and_then(|x| u32::try_from(x.get()).ok()),
                },
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{synthetic_elf, write_temp_elf, SynthSym};

    fn map_for(syms: &[SynthSym]) -> FuncMap {
        let bytes = synthetic_elf(0x100, syms);
        let temp = write_temp_elf(&bytes);
        let file = objfile::File::load(temp.path()).unwrap();
        let reader = file.parse().unwrap();
        FuncMap::build(&reader)
    }

    #[test]
    fn lookup_from_symbols() {
        let map = map_for(&[
            SynthSym::func("alpha", 0x10, 8),
            SynthSym::func("beta", 0x20, 4),
        ]);

        let hit = map.function_at(0x10).unwrap();
        assert_eq!(hit.name, "alpha");
        assert_eq!(hit.entry, 0x10);

        // Last byte still belongs to `alpha`, one past it to nothing.
        assert_eq!(map.function_at(0x17).unwrap().name, "alpha");
        assert_eq!(map.function_at(0x18), None);
        assert_eq!(map.function_at(0x1f), None);

        assert_eq!(map.function_at(0x23).unwrap().name, "beta");

        // Symbol tables never provide line info.
        assert_eq!(map.source_at(0x10), None);
    }

    #[test]
    fn lookup_demangles() {
        let map = map_for(&[SynthSym::func("_ZN4base6Killer3runEv", 0x30, 4)]);
        assert_eq!(map.function_at(0x31).unwrap().name, "base::Killer::run()");
    }

    #[test]
    fn smallest_range_wins() {
        let map = map_for(&[
            SynthSym::func("outer", 0x10, 0x20),
            SynthSym::func("inner", 0x18, 0x8),
        ]);

        assert_eq!(map.function_at(0x11).unwrap().name, "outer");
        assert_eq!(map.function_at(0x19).unwrap().name, "inner");
        assert_eq!(map.function_at(0x28).unwrap().name, "outer");
    }

    #[test]
    fn empty_tables_never_hit() {
        let map = map_for(&[]);
        assert!(!map.has_functions());
        assert_eq!(map.function_at(0x10), None);
    }

    #[test]
    fn own_binary_uses_dwarf() {
        let exe = std::env::current_exe().unwrap();
        let file = objfile::File::load(&exe).unwrap();
        let reader = file.parse().unwrap();

        let map = FuncMap::from_dwarf(&reader).unwrap();
        assert!(map.has_functions());
    }
}
