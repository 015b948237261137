// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Process-level symbol resolution context.
//!
//! [`DebugContext`] ties the other modules together: it discovers the
//! object files of a live process (or of an on-disk executable and its
//! dependencies), accepts name and address lookup requests, resolves them
//! against the right files and hands the results back through
//! [`DebugContext::resolved`].

use crate::procmaps::{self, FileMaps, Pid};
use crate::request::{RequestSet, SymbolRequest};
use crate::{debug, ldtrace, objfile, resolve, VirtAddr};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

pub use crate::request::SourceLocation;

/// Result type shorthand for this module.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors that can occur when building or querying a context.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Address lookup outside of every known mapping of the process.
    #[error("address {addr:#x} is not in any mapping of the process")]
    UnmappedAddress {
        /// The requested runtime address.
        addr: VirtAddr,
    },

    /// Failed to read the process memory mappings.
    #[error("failed to read process mappings")]
    Maps(#[from] procmaps::Error),
}

/// One object file known to the context.
struct FileEntry {
    path: PathBuf,

    /// Mapped file. [`None`] when the file could not be opened, e.g.
    /// because it was deleted or lives in another mount namespace.
    handle: Option<objfile::File>,

    /// Runtime address range the file is mapped at. [`None`] for files
    /// that were never observed in process memory, i.e. on-disk
    /// executables and their dependencies.
    span: Option<Range<VirtAddr>>,

    /// Load bias; the offset between runtime and link-time addresses.
    bias: i64,

    /// Address lookups that fall into this file's mapping.
    requests: RequestSet,
}

/// Symbol resolution context for one process or executable.
pub struct DebugContext {
    pid: Option<Pid>,
    exe: PathBuf,
    files: Vec<FileEntry>,

    /// Name lookups. They are matched against every file.
    name_requests: RequestSet,
}

impl DebugContext {
    /// Creates a context for a live process.
    ///
    /// Reads the process memory mappings and registers every file-backed
    /// mapping. With `libraries` unset, only the mappings of the main
    /// executable are registered and shared libraries are ignored.
    pub fn for_pid(pid: impl Into<Pid>, libraries: bool) -> Result<Self> {
        let maps = FileMaps::load(pid)?;

        let mut ctx = Self {
            pid: Some(maps.pid),
            exe: maps.exe.clone(),
            files: Vec::new(),
            name_requests: RequestSet::new(),
        };

        for region in &maps.regions {
            if !libraries && region.path != ctx.exe {
                continue;
            }
            ctx.add_file(&region.path, Some(region.range.clone()), region.file_offset);
        }

        Ok(ctx)
    }

    /// Creates a context for an on-disk executable without a live process.
    ///
    /// With `libraries` set, the executable's shared library dependencies
    /// are located through the dynamic linker and registered as well; see
    /// [`ldtrace::list_dependencies`] for the caveats of doing that.
    ///
    /// Never fails: files that cannot be opened or traced still get an
    /// entry and simply stay unresolved.
    pub fn for_file(path: &Path, libraries: bool) -> Self {
        let mut ctx = Self {
            pid: None,
            exe: path.to_path_buf(),
            files: Vec::new(),
            name_requests: RequestSet::new(),
        };

        ctx.add_file(path, None, 0);

        if libraries {
            match ldtrace::list_dependencies(path) {
                Ok(deps) => {
                    for dep in deps {
                        ctx.add_file(&dep, None, 0);
                    }
                }
                Err(e) => debug!("cannot trace dependencies of {}: {e}", path.display()),
            }
        }

        ctx
    }

    /// Process that the context inspects, for live-process contexts.
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// Path of the main executable.
    pub fn exe(&self) -> &Path {
        &self.exe
    }

    /// Registers an object file mapping.
    ///
    /// The loader splits an ELF file into multiple adjacent mappings; a
    /// region that continues where an entry for the same file ends extends
    /// that entry instead of creating a new one. The bias is derived from
    /// the first region of each entry, where the mapped file offset and
    /// the link-time address coincide.
    fn add_file(&mut self, path: &Path, vmem: Option<Range<VirtAddr>>, file_offset: u64) {
        if let Some(vmem) = &vmem {
            let prev = self
                .files
                .iter_mut()
                .filter(|f| f.path == path)
                .find_map(|f| f.span.as_mut().filter(|s| s.end == vmem.start));
            if let Some(span) = prev {
                span.end = vmem.end;
                return;
            }
        }

        let handle = match objfile::File::load(path) {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!("cannot open {}: {e}", path.display());
                None
            }
        };

        let bias = vmem
            .as_ref()
            .map_or(0, |r| r.start.wrapping_sub(file_offset) as i64);

        self.files.push(FileEntry {
            path: path.to_path_buf(),
            handle,
            span: vmem,
            bias,
            requests: RequestSet::new(),
        });
    }

    /// Adds a name lookup request.
    ///
    /// `pattern` may contain `*` and `?` wildcards (see [`crate::pattern`]);
    /// such patterns produce one result per matching symbol. The cookie is
    /// an arbitrary caller value handed back with the results. A pattern
    /// that is already registered is ignored.
    pub fn add_name_request(&mut self, pattern: &str, cookie: u64) {
        if self.name_requests.contains_name(pattern) {
            return;
        }
        self.name_requests.push(SymbolRequest::name(pattern, cookie));
    }

    /// Adds an address lookup request for a runtime address.
    ///
    /// The address must fall into the mapping of one of the context's
    /// files, so this is only useful on live-process contexts. An address
    /// that is already registered on the owning file is ignored, keeping
    /// the first cookie.
    pub fn add_address_request(&mut self, addr: VirtAddr, cookie: u64) -> Result {
        let entry = self
            .files
            .iter_mut()
            .find(|f| f.span.as_ref().is_some_and(|s| s.contains(&addr)))
            .ok_or(Error::UnmappedAddress { addr })?;

        if !entry.requests.contains_address(addr) {
            let mut request = SymbolRequest::address(addr, cookie);
            request.resolved_file = Some(entry.path.clone());
            entry.requests.push(request);
        }
        Ok(())
    }

    /// Runs symbol resolution for all pending requests.
    ///
    /// Results accumulate on the requests, so calling this again after
    /// adding further requests only does the remaining work. Files that
    /// cannot be read are skipped; their requests stay unresolved.
    pub fn resolve(&mut self) {
        for entry in &mut self.files {
            resolve::resolve_file(
                &entry.path,
                entry.handle.as_ref(),
                entry.bias,
                &mut entry.requests,
                &mut self.name_requests,
            );
        }
    }

    /// Iterates over all requests together with their resolution results.
    ///
    /// Yields the name requests first, including the per-symbol entries
    /// that wildcard patterns expanded into, then the address requests
    /// file by file.
    pub fn resolved(&self) -> impl Iterator<Item = ResolvedSymbol<'_>> {
        self.name_requests
            .iter()
            .chain(self.files.iter().flat_map(|f| f.requests.iter()))
            .map(ResolvedSymbol::new)
    }
}

/// Resolution results of one request, borrowed from the context.
///
/// Every field except the cookie is optional: requests resolve as far as
/// the available debug data allows and report whatever was found.
#[derive(Debug, Clone)]
pub struct ResolvedSymbol<'ctx> {
    /// Caller cookie the request was registered with.
    pub cookie: u64,
    /// Symbol name. For unresolved name requests this is the pattern text.
    pub name: Option<&'ctx str>,
    /// Object file the symbol was found in (or was expected in).
    pub file: Option<&'ctx Path>,
    /// Runtime address of the function entry point.
    pub start_addr: Option<VirtAddr>,
    /// Runtime address a probe for this request would target.
    pub probe_addr: Option<VirtAddr>,
    /// Offset of the probe address within the object file.
    pub file_offset: Option<u64>,
    /// Source location of the probe address, when line info is present.
    pub source: Option<&'ctx SourceLocation>,
}

impl<'ctx> ResolvedSymbol<'ctx> {
    fn new(req: &'ctx SymbolRequest) -> Self {
        Self {
            cookie: req.cookie,
            name: req.display_name(),
            file: req.resolved_file.as_deref(),
            start_addr: req.resolved_addr,
            probe_addr: req.probe_addr(),
            file_offset: req.resolved_file_offset,
            source: req.resolved_source.as_ref(),
        }
    }
}

impl fmt::Display for ResolvedSymbol<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}] {}", self.cookie, self.name.unwrap_or("<unresolved>"))?;
        if let Some(addr) = self.start_addr {
            write!(f, " @ {addr:#x}")?;
        }
        if let Some(file) = self.file {
            write!(f, " in {}", file.display())?;
            if let Some(offset) = self.file_offset {
                write!(f, "+{offset:#x}")?;
            }
        }
        if let Some(source) = self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{synthetic_elf, text_file_offset, write_temp_elf, SynthSym};

    /// Anchor function that the live-process tests look up by name and by
    /// runtime address.
    #[no_mangle]
    pub extern "C" fn probesym_context_test_anchor() {
        std::hint::black_box(());
    }

    fn fixture_elf() -> Vec<u8> {
        synthetic_elf(
            0x40,
            &[
                SynthSym::func("alpha", 0x08, 0x08),
                SynthSym::func("beta", 0x10, 0x08),
                SynthSym::func("beta_tail", 0x20, 0x08),
            ],
        )
    }

    #[test]
    fn file_context_resolves_names() {
        let elf = fixture_elf();
        let text_off = text_file_offset(&elf);
        let tmp = write_temp_elf(&elf);

        let mut ctx = DebugContext::for_file(tmp.path(), false);
        ctx.add_name_request("beta", 1);
        ctx.resolve();

        let results: Vec<_> = ctx.resolved().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].cookie, 1);
        assert_eq!(results[0].name, Some("beta"));
        assert_eq!(results[0].file, Some(tmp.path()));
        assert_eq!(results[0].start_addr, Some(0x10));
        assert_eq!(results[0].probe_addr, Some(0x10));
        assert_eq!(results[0].file_offset, Some(text_off + 0x10));
    }

    #[test]
    fn wildcards_fan_out() {
        let elf = fixture_elf();
        let tmp = write_temp_elf(&elf);

        let mut ctx = DebugContext::for_file(tmp.path(), false);
        ctx.add_name_request("beta*", 7);
        ctx.resolve();

        let mut names: Vec<_> = ctx
            .resolved()
            .filter_map(|r| r.start_addr.map(|_| r.name.unwrap()))
            .collect();
        names.sort();
        assert_eq!(names, ["beta", "beta_tail"]);

        // Resolving twice must not produce duplicates.
        ctx.resolve();
        assert_eq!(ctx.resolved().count(), 3);
    }

    #[test]
    fn unresolvable_name_is_still_reported() {
        let mut ctx = DebugContext::for_file(Path::new("/nonexistent/prog"), false);
        ctx.add_name_request("anything", 3);
        ctx.resolve();

        let results: Vec<_> = ctx.resolved().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, Some("anything"));
        assert_eq!(results[0].start_addr, None);
        assert_eq!(results[0].file, None);
    }

    #[test]
    fn name_requests_deduplicate() {
        let elf = fixture_elf();
        let tmp = write_temp_elf(&elf);

        let mut ctx = DebugContext::for_file(tmp.path(), false);
        ctx.add_name_request("beta", 1);
        ctx.add_name_request("beta", 2);
        ctx.resolve();

        let results: Vec<_> = ctx.resolved().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].cookie, 1);
    }

    #[test]
    fn dependency_trace_failure_is_contained() {
        // The fixture has no execute permission, so tracing its
        // dependencies fails; the file itself must still be registered.
        let elf = fixture_elf();
        let tmp = write_temp_elf(&elf);

        let ctx = DebugContext::for_file(tmp.path(), true);
        assert_eq!(ctx.files.len(), 1);
        assert!(ctx.files[0].handle.is_some());
    }

    #[test]
    fn adjacent_mappings_merge() {
        let mut ctx = DebugContext::for_file(Path::new("/nonexistent/prog"), false);

        ctx.add_file(Path::new("/lib/x.so"), Some(0x7f00001000..0x7f00002000), 0x1000);
        assert_eq!(ctx.files.len(), 2);
        assert_eq!(ctx.files[1].bias, 0x7f00000000);

        // Continues right where the previous region ended: extends it.
        ctx.add_file(Path::new("/lib/x.so"), Some(0x7f00002000..0x7f00003000), 0x2000);
        assert_eq!(ctx.files.len(), 2);
        assert_eq!(ctx.files[1].span, Some(0x7f00001000..0x7f00003000));
        assert_eq!(ctx.files[1].bias, 0x7f00000000);

        // Disjoint mapping of the same file: separate entry.
        ctx.add_file(Path::new("/lib/x.so"), Some(0x7f00009000..0x7f0000a000), 0x9000);
        assert_eq!(ctx.files.len(), 3);
    }

    #[test]
    fn resolves_own_process() {
        let mut ctx = DebugContext::for_pid(0_u32, false).unwrap();
        assert_eq!(ctx.pid(), Some(Pid::Slf));
        assert_eq!(ctx.exe(), std::env::current_exe().unwrap());

        let anchor_addr = probesym_context_test_anchor as usize as u64;
        ctx.add_name_request("probesym_context_test_anchor", 42);
        ctx.add_address_request(anchor_addr, 43).unwrap();
        ctx.resolve();

        let by_name = ctx.resolved().find(|r| r.cookie == 42).unwrap();
        assert_eq!(by_name.name, Some("probesym_context_test_anchor"));
        assert_eq!(by_name.start_addr, Some(anchor_addr));
        assert!(by_name.file_offset.is_some());

        let by_addr = ctx.resolved().find(|r| r.cookie == 43).unwrap();
        assert_eq!(by_addr.name, Some("probesym_context_test_anchor"));
        assert_eq!(by_addr.probe_addr, Some(anchor_addr));
        assert_eq!(by_addr.start_addr, Some(anchor_addr));
        assert_eq!(by_addr.file_offset, by_name.file_offset);
        if let Some(source) = by_addr.source {
            assert!(source.file.ends_with("context.rs"), "unexpected source {source}");
        }
    }

    #[test]
    fn unmapped_address_is_rejected() {
        let mut ctx = DebugContext::for_pid(0_u32, false).unwrap();
        assert!(matches!(
            ctx.add_address_request(1, 0),
            Err(Error::UnmappedAddress { addr: 1 })
        ));
    }

    #[test]
    fn nonexistent_process_is_rejected() {
        assert!(matches!(
            DebugContext::for_pid(u32::MAX, false),
            Err(Error::Maps(procmaps::Error::ProcessNotFound(_)))
        ));
    }
}
