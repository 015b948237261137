// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Reading and caching of `/proc/<pid>/maps`.
//!
//! This module only collects the raw file-backed regions of a process.
//! Deciding which regions belong together (e.g. merging the segments that
//! a loader split one ELF file into) is left to the consumer.

use crate::VirtAddr;
use std::collections::hash_map::{Entry, HashMap};
use std::fmt;
use std::num::NonZeroU32;
use std::ops::Range;
use std::path::PathBuf;
use std::{fs, io};

/// Errors that can occur while reading process memory maps.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The process does not exist, or procfs denies access to it.
    #[error("process {0} not found")]
    ProcessNotFound(Pid),

    /// A maps line did not have the expected format.
    #[error("malformed maps line: {0:?}")]
    MalformedLine(String),

    /// IO error.
    #[error("IO error")]
    IO(#[from] io::Error),
}

/// Result type shorthand with error defaulted to this module's error type.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// A process identifier usable in `/proc` paths.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Pid {
    /// The current process.
    #[default]
    Slf,
    /// Another process, by numeric PID.
    Pid(NonZeroU32),
}

impl From<u32> for Pid {
    fn from(pid: u32) -> Self {
        // PID 0 conventionally refers to the calling process.
        NonZeroU32::new(pid).map(Pid::Pid).unwrap_or(Pid::Slf)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pid::Slf => write!(f, "self"),
            Pid::Pid(pid) => write!(f, "{pid}"),
        }
    }
}

/// Memory protection flags of a mapped region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Protection {
    /// Readable.
    pub r: bool,
    /// Writable.
    pub w: bool,
    /// Executable.
    pub x: bool,
}

impl Protection {
    fn parse(perms: &str) -> Self {
        let mut prot = Self::default();
        for c in perms.chars() {
            match c {
                'r' => prot.r = true,
                'w' => prot.w = true,
                'x' => prot.x = true,
                _ => (),
            }
        }
        prot
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (set, c) in [(self.r, 'r'), (self.w, 'w'), (self.x, 'x')] {
            write!(f, "{}", if set { c } else { '-' })?;
        }
        Ok(())
    }
}

/// A single file-backed region from a maps file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappedRegion {
    /// Mapped virtual address range.
    pub range: Range<VirtAddr>,
    /// Protection flags.
    pub perms: Protection,
    /// Offset into the backing file, in bytes.
    pub file_offset: u64,
    /// Absolute path of the backing file.
    pub path: PathBuf,
}

/// Snapshot of the file-backed mappings of a process.
#[derive(Clone, Debug)]
pub struct FileMaps {
    /// Process that this snapshot was taken from.
    pub pid: Pid,
    /// Path of the main executable, as resolved via `/proc/<pid>/exe`.
    pub exe: PathBuf,
    /// File-backed regions, in maps file order.
    pub regions: Vec<MappedRegion>,
}

impl FileMaps {
    /// Reads the current mappings of the given process.
    pub fn load(pid: impl Into<Pid>) -> Result<Self> {
        let pid = pid.into();

        let exe = fs::read_link(format!("/proc/{pid}/exe")).map_err(|e| procfs_err(pid, e))?;
        let maps =
            fs::read_to_string(format!("/proc/{pid}/maps")).map_err(|e| procfs_err(pid, e))?;

        Ok(Self {
            pid,
            exe,
            regions: parse_maps(&maps)?,
        })
    }
}

/// Translates procfs read errors, assuming the dominant failure cause.
/// Access denied (e.g. another user's ptrace-protected process) counts
/// as not found.
fn procfs_err(pid: Pid, err: io::Error) -> Error {
    if matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    ) {
        Error::ProcessNotFound(pid)
    } else {
        Error::IO(err)
    }
}

fn parse_maps(text: &str) -> Result<Vec<MappedRegion>> {
    let mut regions = Vec::new();
    for line in text.lines() {
        if let Some(region) = parse_maps_line(line)? {
            regions.push(region);
        }
    }
    Ok(regions)
}

/// Parses one maps line, skipping regions without an absolute backing path.
///
/// Lines have the following format:
///
/// ```text
/// address           perms offset  dev   inode      pathname
/// 08048000-08049000 r-xp 00000000 03:00 8312       /opt/test
/// ```
fn parse_maps_line(line: &str) -> Result<Option<MappedRegion>> {
    let malformed = || Error::MalformedLine(line.to_owned());

    let (addrs, rest) = split_field(line).ok_or_else(malformed)?;
    let (perms, rest) = split_field(rest).ok_or_else(malformed)?;
    let (offset, rest) = split_field(rest).ok_or_else(malformed)?;
    let (_dev, rest) = split_field(rest).ok_or_else(malformed)?;

    // The pathname column is optional: anonymous mappings don't have one.
    let (_inode, path) = match split_field(rest) {
        Some(x) => x,
        None => return Ok(None),
    };

    let path = path.trim();
    if !path.starts_with('/') {
        // Anonymous or pseudo mappings like `[heap]` and `[vdso]`.
        return Ok(None);
    }

    // Unlinked files stay usable through their old path often enough (e.g.
    // package upgrades with the process still running) that we keep them.
    let path = path.strip_suffix(" (deleted)").unwrap_or(path);

    let (start, end) = addrs.split_once('-').ok_or_else(malformed)?;
    let start = VirtAddr::from_str_radix(start, 16).map_err(|_| malformed())?;
    let end = VirtAddr::from_str_radix(end, 16).map_err(|_| malformed())?;
    let file_offset = u64::from_str_radix(offset, 16).map_err(|_| malformed())?;

    Ok(Some(MappedRegion {
        range: start..end,
        perms: Protection::parse(perms),
        file_offset,
        path: PathBuf::from(path),
    }))
}

/// Splits off the next whitespace-delimited field.
///
/// Only splitting at the first whitespace run keeps the final pathname
/// component intact even when the path itself contains spaces.
fn split_field(rest: &str) -> Option<(&str, &str)> {
    rest.trim_start()
        .split_once(|c: char| c.is_ascii_whitespace())
}

/// Cache of [`FileMaps`] snapshots, keyed by process.
///
/// Mappings of a live process change whenever it loads or unloads libraries,
/// so cached snapshots can go stale. [`MapsCache::refresh`] re-reads a
/// process and replaces whatever was cached for it.
#[derive(Debug, Default)]
pub struct MapsCache {
    cached: HashMap<Pid, FileMaps>,
}

impl MapsCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached snapshot for `pid`, reading it on first use.
    pub fn get(&mut self, pid: impl Into<Pid>) -> Result<&FileMaps> {
        let pid = pid.into();
        match self.cached.entry(pid) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(FileMaps::load(pid)?)),
        }
    }

    /// Re-reads the mappings for `pid`, replacing any cached snapshot.
    pub fn refresh(&mut self, pid: impl Into<Pid>) -> Result<&FileMaps> {
        let pid = pid.into();
        let maps = FileMaps::load(pid)?;
        Ok(match self.cached.entry(pid) {
            Entry::Occupied(mut entry) => {
                entry.insert(maps);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(maps),
        })
    }
}
