// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Abstraction for extracting information from object files with DWARF data.
//!
//! The main type here is [`Sections`], created via [`Sections::load`].

// Compiler complains about using the gimli constants in match patterns.
#![allow(non_upper_case_globals)]

use crate::{debug, objfile, AnyError, VirtAddr};
use fallible_iterator::FallibleIterator;
use gimli::{constants::*, AttributeValue as AV};
use lru::LruCache;
use std::borrow::Cow;
use std::cell::RefCell;
use std::num::NonZeroU64;
use std::ops::Range;
use std::rc::Rc;
use std::{fmt, mem, slice};

/// Shorthand for the [`gimli`] reader type that we use everywhere.
///
/// Until BE binaries come back into favor we simply hard-code LE at
/// compile time, getting rid of a ton of unnecessary branching.
type R<'dwarf> = gimli::EndianSlice<'dwarf, gimli::LittleEndian>;

/// Maximum number of compilation units to process per object file.
const MAX_COMP_UNITS: usize = 256 * 1024;

/// Maximum size of the LRU cache for decoded units.
const UNIT_CACHE_SIZE: usize = 64;

/// Result type shorthand.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors that can occur during DWARF parsing.
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Reader currently doesn't support big endian binaries")]
    BigEndian,

    #[error("Reference points to non-existing unit")]
    BadUnitRef,

    #[error("Reference points to invalid offset within a unit")]
    BadUnitOffset,

    #[error("Reference attribute has unexpected type")]
    BadRefAttrType,

    #[error("DIE reference chain too long")]
    DieReferenceChainTooLong,

    #[error("The input file has too many translation units")]
    UnitLimitExceeded,

    #[error("File contains an invalid file index value `{}`", .0)]
    InvalidFileIndex(u64),

    #[error("File contains an invalid directory index value `{}`", .0)]
    InvalidDirectoryIndex(u64),

    #[error("objfile error")]
    Objfile(#[from] objfile::Error),

    #[error(transparent)]
    Other(AnyError),
}

/// Conversion of [`gimli`] errors into ours.
///
/// We erase the type here to prevent leaking [`gimli`] library types into our
/// public interface. If code needs to special-case based on particular gimli
/// errors, we should instead lift them into custom error variants.
impl From<gimli::Error> for Error {
    fn from(e: gimli::Error) -> Self {
        Self::Other(Box::new(e))
    }
}

/// Collection of DWARF sections of an object file.
///
/// Implements lazy decoding of DWARF information from object files. This is
/// currently a higher-level abstraction over the `gimli` library.
pub struct Sections<'obj> {
    main: gimli::DwarfSections<Option<objfile::Section<'obj>>>,
}

impl<'obj> Sections<'obj> {
    /// Reads the DWARF sections from the given object file.
    pub fn load(obj: &objfile::Reader<'obj>) -> Result<Self> {
        if !obj.is_little_endian() {
            return Err(Error::BigEndian);
        }

        Ok(Self {
            main: gimli::DwarfSections::load(|id| obj.load_section(id.name().as_bytes()))?,
        })
    }

    /// Collect a list of all translation units in the DWARF sections.
    pub fn units(&self) -> Result<Units<'_>> {
        // Create a borrowing DWARF instance from our owned one.
        fn borrow<'a>(section: &'a Option<objfile::Section<'a>>) -> R<'a> {
            let data = match section {
                Some(x) => x,
                None => &[][..],
            };

            R::new(data, gimli::LittleEndian)
        }

        let dwarf = self.main.borrow(borrow);

        // Collect all units now. We later need this to quickly seek to
        // different units when we encounter cross-unit references.
        let main = collect_unit_headers(&dwarf)?;

        let cache_size = UNIT_CACHE_SIZE
            .try_into()
            .expect("UNIT_CACHE_SIZE must be >0");

        let unit_cache = RefCell::new(LruCache::new(cache_size));

        Ok(Units {
            dwarf,
            main,
            unit_cache,
        })
    }
}

/// List of all translation units in a DWARF file.
///
/// Units can contain references to each other and this object serves as an
/// index that permits efficient lookups of other units for these cases.
pub struct Units<'dwarf> {
    /// Borrowed view into the DWARF sections held in the [`Sections`] object.
    dwarf: gimli::Dwarf<R<'dwarf>>,

    /// List of all unit headers in the DWARF file.
    main: Vec<gimli::UnitHeader<R<'dwarf>>>,

    /// Cache of decoded unit information.
    ///
    /// This significantly reduces the need to constantly re-decode units
    /// when resolving cross-unit references.
    unit_cache: RefCell<LruCache<gimli::DebugInfoOffset, Rc<gimli::Unit<R<'dwarf>>>>>,
}

impl<'dwarf> Units<'dwarf> {
    /// Iterate over all units in the DWARF file.
    pub fn iter<'units>(&'units self) -> UnitIter<'dwarf, 'units> {
        UnitIter {
            all: self,
            iter: self.main.iter(),
        }
    }

    /// Locates the unit that contains the given offset into the `.debug_info` section.
    fn unit_for_offset<'units>(
        &'units self,
        offset: gimli::DebugInfoOffset<usize>,
    ) -> Result<Option<Unit<'dwarf, 'units>>> {
        // Use binary search to locate the unit in question.
        let header = match self.main.binary_search_by_key(&offset, unit_start) {
            // Exact match.
            Ok(idx) => Some(&self.main[idx]),

            // Our unit array is empty.
            Err(0) => None,

            // Either found somewhere within a unit or outside of valid range.
            Err(idx) => {
                let matched = &self.main[idx - 1];
                if unit_range(matched).contains(&offset) {
                    Some(matched)
                } else {
                    None
                }
            }
        };

        // Compare with the result of a dumb linear search when compiled in debug mode.
        // Both variants must be equivalent in all cases.
        debug_assert_eq!(
            header.map(|x| x as *const _),
            self.main
                .iter()
                .find(|unit| unit_range(unit).contains(&offset))
                .map(|x| x as *const _)
        );

        match header {
            Some(header) => self.unit_for_header(header).map(Some),
            None => Ok(None),
        }
    }

    /// Creates a new `Unit` object for the given unit header.
    fn unit_for_header<'units>(
        &'units self,
        header: &'units gimli::UnitHeader<R<'dwarf>>,
    ) -> Result<Unit<'dwarf, 'units>> {
        let mut cache = self.unit_cache.borrow_mut();
        let cache_key = unit_start(header);

        // Fast path: if we have the decoded unit cached, just return it.
        if let Some(cached) = cache.get(&cache_key) {
            return Ok(Unit {
                all: self,
                unit: cached.clone(),
            });
        }

        // Slow path: decode the unit now and cache it for the next time.
        let unit = Rc::new(self.dwarf.unit(*header)?);
        cache.put(cache_key, unit.clone());

        Ok(Unit { all: self, unit })
    }
}

/// Iterator over the translation units in a DWARF file.
///
/// Created using [`Units::iter`]. Continuing iteration on errors is well-
/// defined and guaranteed not to run into infinite loops: units with bad
/// headers will simply be skipped.
#[derive(Clone)]
pub struct UnitIter<'dwarf, 'units> {
    all: &'units Units<'dwarf>,
    iter: slice::Iter<'units, gimli::UnitHeader<R<'dwarf>>>,
}

impl<'dwarf, 'units> FallibleIterator for UnitIter<'dwarf, 'units> {
    type Item = Unit<'dwarf, 'units>;
    type Error = Error;

    fn next(&mut self) -> Result<Option<Self::Item>> {
        match self.iter.next() {
            Some(header) => self.all.unit_for_header(header).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

/// References a translation unit in a DWARF section.
#[derive(Clone)]
pub struct Unit<'dwarf, 'units> {
    all: &'units Units<'dwarf>,
    unit: Rc<gimli::Unit<R<'dwarf>>>,
}

impl fmt::Debug for Unit<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // We add the header length here to obtain the offset of the first DIE.
        let hdr_len = self.unit.header.size_of_header();
        let offs = self.unit.header.offset().as_debug_info_offset();
        let offs = offs.expect("we don't inspect type sections").0 + hdr_len;

        let name = self.name().unwrap_or(Cow::Borrowed("<unnamed>"));
        write!(f, "Unit(\"{name}\" @ {offs:#08x})")
    }
}

impl<'dwarf, 'units> Unit<'dwarf, 'units> {
    /// Gets the DWARF object this unit belongs to.
    fn dwarf(&self) -> &'units gimli::Dwarf<R<'dwarf>> {
        &self.all.dwarf
    }

    /// Gets the name of the translation unit.
    pub fn name(&self) -> Option<Cow<'dwarf, str>> {
        self.unit.name.map(|x| x.to_string_lossy())
    }

    /// Iterate over subprograms in this translation unit.
    ///
    /// This yields all concrete subprograms, including functions nested
    /// within other functions (e.g. lambdas and closures).
    pub fn subprograms<'unit>(&'unit self) -> SubprogramIter<'dwarf, 'units, 'unit> {
        SubprogramIter {
            unit: self,
            die_iter: self.unit.entries(),
        }
    }

    /// Construct an iterator over the line table.
    pub fn line_iter(&self) -> Option<LineIter<'dwarf, 'units>> {
        let line_program = self.unit.line_program.as_ref()?.clone();
        Some(LineIter {
            unit: self.clone(),
            rows: line_program.rows(),
            state: LineTableIterState::Void,
        })
    }

    /// Resolves the given reference value.
    ///
    /// Currently supports the following [`AV`] types:
    /// - [`AV::UnitRef`]
    /// - [`AV::DebugInfoRef`]
    fn resolve_ref(
        &self,
        reference: AV<R<'dwarf>>,
    ) -> Result<(Unit<'dwarf, 'units>, gimli::UnitOffset<usize>)> {
        let offs = match reference {
            // Reference within same CU. Simple case, do early exit.
            AV::UnitRef(offs) => return Ok((self.clone(), offs)),

            // Reference into another CU within this file.
            AV::DebugInfoRef(offs) => offs,

            // Any other attribute type is a violation of the specification.
            // This includes references into supplementary DWARF files, which
            // we don't support.
            _ => return Err(Error::BadRefAttrType),
        };

        let Some(refd_unit) = self.all.unit_for_offset(offs)? else {
            return Err(Error::BadUnitRef);
        };
        let Some(offs) = offs.to_unit_offset(&refd_unit.unit.header) else {
            return Err(Error::BadUnitOffset);
        };

        Ok((refd_unit, offs))
    }
}

/// Iterator over the subprograms in a [`Unit`].
///
/// Created via [`Unit::subprograms`].
#[derive(Clone)]
pub struct SubprogramIter<'dwarf, 'units, 'unit: 'units> {
    unit: &'unit Unit<'dwarf, 'units>,
    die_iter: gimli::EntriesCursor<'unit, 'unit, R<'dwarf>>,
}

impl<'dwarf, 'units> FallibleIterator for SubprogramIter<'dwarf, 'units, '_> {
    type Item = SubprogramInfo<'dwarf, 'units>;
    type Error = Error;

    fn next(&mut self) -> Result<Option<Self::Item>> {
        loop {
            let die = match self.die_iter.next_dfs()? {
                Some(x) => x.1,
                None => return Ok(None),
            };

            // Skip irrelevant records, but not their children: they might
            // contain records that we do care about.
            if !matches!(die.tag(), DW_TAG_subprogram | DW_TAG_entry_point) {
                continue;
            }

            // Skip abstract records: they don't describe a location in the
            // executable by themselves and are instead pulled in through
            // references from the concrete DIEs.
            if die_is_abstract(die)? {
                continue;
            }

            // Still here? We have a relevant record that we want to yield.
            return Ok(Some(SubprogramInfo::from_die(self.unit.clone(), die)?));
        }
    }
}

/// Describes a concrete subprogram in the application.
pub struct SubprogramInfo<'dwarf, 'units> {
    name: Option<UnitAV<'dwarf, 'units>>,
    link_name: Option<UnitAV<'dwarf, 'units>>,
    die_ranges: Option<gimli::RangeIter<R<'dwarf>>>,
}

impl fmt::Debug for SubprogramInfo<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubprogramInfo(name = {:?})", self.name())
    }
}

impl<'dwarf, 'units> SubprogramInfo<'dwarf, 'units> {
    /// Merge this instance with another, preferring entries from `self`.
    fn merge_from(&mut self, other: Self) {
        if self.name.is_none() {
            self.name = other.name;
        }
        if self.link_name.is_none() {
            self.link_name = other.link_name;
        }
        if self.die_ranges.is_none() {
            self.die_ranges = other.die_ranges;
        }
    }

    /// Extract required information from a DIE.
    fn from_die(
        unit: Unit<'dwarf, 'units>,
        die: &gimli::DebuggingInformationEntry<'_, '_, R<'dwarf>>,
    ) -> Result<Self> {
        Self::from_die_impl(unit, die, 0)
    }

    fn from_die_impl(
        unit: Unit<'dwarf, 'units>,
        die: &gimli::DebuggingInformationEntry<'_, '_, R<'dwarf>>,
        recursion_depth: usize,
    ) -> Result<Self> {
        // Protect against theoretically-possible infinite reference loops
        // (from abstract origins & specifications). Chains longer than 2 are
        // rare and longer than 3 we have yet to see. Use > 4 to be safe.
        if recursion_depth > 4 {
            return Err(Error::DieReferenceChainTooLong);
        }

        // Iterate the attributes and pick what we need. This is faster than
        // calling `attr_value` for each attribute since this would internally
        // loop over all attributes for each call.
        let mut name = None;
        let mut link_name = None;
        let mut abstract_origin = None;
        let mut spec = None;
        let mut attrs = die.attrs();
        while let Some(attr) = attrs.next()? {
            match attr.name() {
                // Reading is expensive: save unit + attribute value and decode lazily.
                DW_AT_name => name = Some(UnitAV(unit.clone(), attr.value())),
                DW_AT_linkage_name => link_name = Some(UnitAV(unit.clone(), attr.value())),

                // Reading is cheap: decode immediately.
                DW_AT_abstract_origin => abstract_origin = Some(attr.value()),
                DW_AT_specification => spec = Some(attr.value()),

                // Ignore all other attribute types.
                _ => (),
            }
        }

        let mut info = SubprogramInfo {
            name,
            link_name,
            die_ranges: Some(unit.dwarf().die_ranges(&unit.unit, die)?),
        };

        // If an abstract origin or a specification are present, also recurse into these.
        // `merge_from` prefers properties from `self`, making sure that we use the most
        // concrete information for our current DIE.
        for ref_attr in abstract_origin.into_iter().chain(spec) {
            let (refd_unit, refd_offs) = unit.resolve_ref(ref_attr)?;
            let refd_die = refd_unit.unit.entry(refd_offs)?;
            info.merge_from(Self::from_die_impl(
                refd_unit.clone(),
                &refd_die,
                recursion_depth + 1,
            )?);
        }

        Ok(info)
    }

    /// Determine the name of this function.
    pub fn name(&self) -> Result<Option<Cow<'dwarf, str>>> {
        // Prefer the linkage name if it is present.
        if let Some(UnitAV(ref unit, av)) = self.link_name {
            let x = unit.dwarf().attr_string(&unit.unit, av)?;
            return Ok(Some(x.to_string_lossy()));
        };

        // Fallback to regular name.
        if let Some(UnitAV(ref unit, av)) = self.name {
            // TODO: must merge with containing namespaces and modules
            let x = unit.dwarf().attr_string(&unit.unit, av)?;
            let x = x.to_string_lossy();
            return Ok(Some(x));
        }

        Ok(None)
    }

    /// Destructively retrieve the DIE ranges for this routine.
    ///
    /// This consumes the range iterator on the first call, causing the next
    /// [`Self::take_ranges`] call to return [`None`]. This is a quirk that is
    /// required to work around gimli's DIE range iterator not implementing
    /// [`Clone`].
    pub fn take_ranges(&mut self) -> Option<RangeIter<'dwarf>> {
        self.die_ranges.take().map(RangeIter)
    }
}

/// Iterator yielding the PC ranges of a subroutine.
///
/// Thin wrapper around the corresponding gimli type to prevent leaking gimli
/// types into the public interface of this module.
pub struct RangeIter<'dwarf>(gimli::RangeIter<R<'dwarf>>);

impl FallibleIterator for RangeIter<'_> {
    type Item = Range<VirtAddr>;
    type Error = Error;

    fn next(&mut self) -> Result<Option<Self::Item>> {
        Ok(self.0.next()?.map(|x| x.begin..x.end))
    }
}

/// Opaque ID that uniquely identifies a file within a unit.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Copy)]
pub struct SourceFileId(u64);

/// File in the DWARF line table.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SourceFile<'dwarf> {
    /// Unique ID within a unit.
    pub id: SourceFileId,
    /// Directory component of the source path, if known.
    pub dir: Option<Cow<'dwarf, str>>,
    /// File name component of the source path.
    pub name: Cow<'dwarf, str>,
}

impl fmt::Display for SourceFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = self.dir.as_deref().unwrap_or("<unknown dir>");
        write!(f, "{}/{}", dir, self.name)
    }
}

impl<'dwarf> SourceFile<'dwarf> {
    fn read_from_linetab<'units>(
        unit: Unit<'dwarf, 'units>,
        header: &gimli::LineProgramHeader<R<'dwarf>>,
        id: SourceFileId,
    ) -> Result<Self> {
        let Some(file_entry) = header.file(id.0) else {
            return Err(Error::InvalidFileIndex(id.0));
        };

        let name_av = file_entry.path_name();
        let name_slice = unit.dwarf().attr_string(&unit.unit, name_av)?;
        let name = name_slice.to_string_lossy();

        let Some(dir_av) = file_entry.directory(header) else {
            // `0` refers to the `DW_AT_compdir` attribute of the CU: if we
            // ended up here, this means that the CU does not have the compdir
            // attribute. I don't think that the DWARF spec permits that, but
            // we've seen it in mainstream executables, so we allow it anyway.
            if file_entry.directory_index() == 0 {
                return Ok(Self {
                    id,
                    dir: None,
                    name,
                });
            }

            return Err(Error::InvalidDirectoryIndex(file_entry.directory_index()));
        };

        let dir_slice = unit.dwarf().attr_string(&unit.unit, dir_av)?;
        let dir = Some(dir_slice.to_string_lossy());

        Ok(Self { id, dir, name })
    }
}

/// Associates a PC range with a source file and line number.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LineTableEntry<'dwarf> {
    /// PC range being described by this line table entry.
    pub rng: Range<VirtAddr>,
    /// Source file that corresponds to this range.
    pub file: SourceFile<'dwarf>,
    /// Line number within the source file, starting at `1`.
    pub line: Option<NonZeroU64>,
}

/// Internal state of [`LineIter`].
#[derive(Debug, Clone, Eq, PartialEq)]
enum LineTableIterState<'dwarf> {
    /// We are in the void between ranges.
    Void,
    /// We are within a line table range.
    InRange(LineTableEntry<'dwarf>),
}

impl<'dwarf> LineTableIterState<'dwarf> {
    /// Constructs a [`Self::InRange`] variant of this enum from a gimli row.
    pub fn from_row<'units>(
        unit: Unit<'dwarf, 'units>,
        header: &gimli::LineProgramHeader<R<'dwarf>>,
        row: &gimli::LineRow,
    ) -> Result<LineTableIterState<'dwarf>> {
        Ok(Self::InRange(LineTableEntry {
            file: SourceFile::read_from_linetab(unit, header, SourceFileId(row.file_index()))?,
            rng: row.address()..row.address(),
            line: row.line(),
        }))
    }

    /// Consume this instance, extracting the current entry.
    ///
    /// # Panics
    ///
    /// If currently in [`Self::Void`] state.
    pub fn unwrap_entry(self) -> LineTableEntry<'dwarf> {
        match self {
            Self::Void => panic!("attempted unwrapping void state as range"),
            Self::InRange(entry) => entry,
        }
    }
}

/// Iterator yielding all line table entries in a unit.
///
/// Constructed via [`Unit::line_iter`].
pub struct LineIter<'dwarf, 'units> {
    unit: Unit<'dwarf, 'units>,
    rows: gimli::LineRows<R<'dwarf>, gimli::IncompleteLineProgram<R<'dwarf>>>,
    state: LineTableIterState<'dwarf>,
}

impl<'dwarf> FallibleIterator for LineIter<'dwarf, '_> {
    type Item = LineTableEntry<'dwarf>;
    type Error = Error;

    fn next(&mut self) -> Result<Option<Self::Item>> {
        use LineTableIterState::*;

        loop {
            let Some((header, row)) = self.rows.next_row()? else {
                // Line table exhausted: yield final record if we still have one stashed.
                return Ok(match mem::replace(&mut self.state, Void) {
                    Void => None,
                    InRange(entry) => Some(entry),
                });
            };

            let active = match (&mut self.state, row.end_sequence()) {
                // Sequence ends but we didn't even know that we are in one.
                (Void, true) => continue,

                // New sequence starts here: update state but don't yield anything.
                (Void, false) => {
                    self.state = LineTableIterState::from_row(self.unit.clone(), header, row)?;
                    continue;
                }

                // Sequence is ending and we're moving into the void.
                (state @ InRange { .. }, true) => {
                    let mut old_state = mem::replace(state, Void).unwrap_entry();
                    old_state.rng.end = row.address();
                    return Ok(Some(old_state));
                }

                // Sequence is ongoing: handle outside this match.
                (InRange(entry), false) => entry,
            };

            // DWARF5 [6.2.5]:
            // > Within a sequence, addresses and operation pointers may only increase.
            //
            // While this is clearly not permitted per specification, it is unfortunately
            // quite common in practice, so we have to handle it as graceful as possible.
            if active.rng.end > row.address() {
                debug!(
                    "Non-monotonic line table sequence (jumping from {:#08x} -> {:#08x})",
                    active.rng.end,
                    row.address()
                );

                let new = LineTableIterState::from_row(self.unit.clone(), header, row)?;
                let mut old = mem::replace(&mut self.state, new).unwrap_entry();

                // Since we have no idea where this would actually end we just
                // arbitrarily assume it to be 1 byte long.
                old.rng.end = old.rng.start + 1;

                return Ok(Some(old));
            }

            // Extend range.
            active.rng.end = row.address();

            // Neither line number nor the file changed: done here.
            if active.file.id == SourceFileId(row.file_index()) && active.line == row.line() {
                continue;
            }

            // Sequence is ongoing and something changed: create new record.
            let new_state = LineTableIterState::from_row(self.unit.clone(), header, row)?;
            debug_assert_ne!(&new_state, &self.state);
            let prev_state = mem::replace(&mut self.state, new_state);
            return Ok(Some(prev_state.unwrap_entry()));
        }
    }
}

/// Pair of an attribute value and the corresponding unit.
struct UnitAV<'dwarf, 'units>(Unit<'dwarf, 'units>, AV<R<'dwarf>>);

/// Unwraps the start offset of a unit into a generic [`usize`].
fn unit_start(unit: &gimli::UnitHeader<R<'_>>) -> gimli::DebugInfoOffset {
    unit.offset()
        .as_debug_info_offset()
        .expect("we only collect non-type units")
}

/// Constructs the offset [`Range`] for a unit.
fn unit_range(unit: &gimli::UnitHeader<R<'_>>) -> Range<gimli::DebugInfoOffset> {
    let start = unit_start(unit);
    let end = gimli::DebugInfoOffset(start.0 + unit.length_including_self());
    start..end
}

/// Inspect the given DIE and determine whether it is an abstract record
/// that doesn't actually describe a location in the executable by itself.
fn die_is_abstract(die: &gimli::DebuggingInformationEntry<'_, '_, R<'_>>) -> Result<bool> {
    let mut attrs = die.attrs();
    while let Some(attr) = attrs.next()? {
        match attr.name() {
            // DWARF 5 [3.3.8.1]:
            // > Any subroutine entry that contains a DW_AT_inline attribute
            // > whose value is other than DW_INL_not_inlined is known as an
            // > abstract instance root.
            DW_AT_inline => match attr.value() {
                AV::Inline(DW_INL_not_inlined) => (),
                AV::Inline(_) => return Ok(true),
                _ => (),
            },

            // DWARF 5 [2.13.1]:
            // > A debugging information entry that represents a non-defining or
            // > otherwise incomplete declaration of a program entity has a
            // > DW_AT_declaration attribute, which is a flag.
            DW_AT_declaration => {
                if let AV::Flag(true) = attr.value() {
                    return Ok(true);
                }
            }

            _ => (),
        }
    }

    Ok(false)
}

/// Collect list of all unit headers in a DWARF file.
fn collect_unit_headers<'obj>(
    dwarf: &gimli::Dwarf<R<'obj>>,
) -> Result<Vec<gimli::UnitHeader<R<'obj>>>> {
    let mut unit_iter = dwarf.units().enumerate();
    let mut units = Vec::with_capacity(unit_iter.size_hint().0);

    while let Some((i, unit)) = unit_iter.next()? {
        if i >= MAX_COMP_UNITS {
            return Err(Error::UnitLimitExceeded);
        }

        units.push(unit);
    }

    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objfile;

    /// The test executable itself is the only ELF with DWARF data that we
    /// can rely on being present, so all assertions here are structural.
    fn with_own_units<T>(f: impl FnOnce(&Units<'_>) -> T) -> T {
        let exe = std::env::current_exe().unwrap();
        let obj = objfile::File::load(&exe).unwrap();
        let obj = obj.parse().unwrap();

        let dwarf = Sections::load(&obj).unwrap();
        let units = dwarf.units().unwrap();
        f(&units)
    }

    #[test]
    fn own_units_present() {
        with_own_units(|units| {
            assert!(units.iter().count().unwrap() > 0);
        });
    }

    #[test]
    fn own_subprograms_have_names_and_ranges() {
        with_own_units(|units| {
            let mut named = 0usize;
            let mut ranged = 0usize;

            let mut unit_iter = units.iter();
            while let Some(unit) = unit_iter.next().unwrap() {
                let mut sp_iter = unit.subprograms();
                while let Some(mut sp) = sp_iter.next().unwrap() {
                    if let Ok(Some(_)) = sp.name() {
                        named += 1;
                    }
                    if let Some(ranges) = sp.take_ranges() {
                        ranged += ranges.count().unwrap_or(0);
                    }
                    assert!(sp.take_ranges().is_none(), "second take must yield None");
                }
            }

            assert!(named > 0, "expected named subprograms in own binary");
            assert!(ranged > 0, "expected PC ranges in own binary");
        });
    }

    #[test]
    fn own_line_tables_are_sane() {
        with_own_units(|units| {
            let mut entries = 0usize;

            let mut unit_iter = units.iter();
            while let Some(unit) = unit_iter.next().unwrap() {
                let Some(mut line_iter) = unit.line_iter() else {
                    continue;
                };

                while let Some(entry) = line_iter.next().unwrap() {
                    assert!(entry.rng.start <= entry.rng.end);
                    entries += 1;
                }
            }

            assert!(entries > 0, "expected line table entries in own binary");
        });
    }
}
