// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Resolution passes that run against a single mapped object file.
//!
//! Each pass only ever fills empty result slots, so running resolution
//! repeatedly (e.g. after new requests were added) is safe and cheap.

use crate::funcmap::FuncMap;
use crate::pattern::SymbolPattern;
use crate::request::{RequestKind, RequestSet, SourceLocation, SymbolRequest};
use crate::{debug, objfile, VirtAddr};
use std::path::Path;

/// Runs all resolution passes for one mapped object file.
///
/// `file_requests` holds the address lookups that fall into this file's
/// mapping, `ctx_requests` the name lookups that are matched against every
/// file of the process. `handle` is [`None`] when the file could not be
/// opened; its requests then only learn the file name.
pub(crate) fn resolve_file(
    path: &Path,
    handle: Option<&objfile::File>,
    bias: i64,
    file_requests: &mut RequestSet,
    ctx_requests: &mut RequestSet,
) {
    if file_requests.is_empty() && ctx_requests.is_empty() {
        return;
    }

    let Some(handle) = handle else {
        mark_unavailable(file_requests, path);
        return;
    };

    let reader = match handle.parse() {
        Ok(reader) => reader,
        Err(e) => {
            debug!("failed to parse {}: {e}", path.display());
            mark_unavailable(file_requests, path);
            return;
        }
    };

    let rebase = Rebase::new(&reader, bias);

    // Address lookups need the function tables, which are expensive to
    // build. Skip them entirely when this file has none left to name.
    let needs_funcs = file_requests
        .iter()
        .any(|r| r.resolved_name.is_none() && r.probe_addr().is_some() && claimable(r, path));
    if needs_funcs {
        let funcs = FuncMap::build(&reader);
        resolve_addresses(file_requests, &funcs, path, rebase);
    }

    let symbols: Vec<objfile::Symbol<'_>> = reader
        .function_symbols(objfile::SymbolSource::Debug)
        .chain(reader.function_symbols(objfile::SymbolSource::Dynamic))
        .collect();
    match_names(&symbols, file_requests, path, rebase);
    match_names(&symbols, ctx_requests, path, rebase);

    let sections: Vec<objfile::CodeSection> = reader.code_sections().collect();
    fill_file_offsets(&sections, file_requests, path, rebase);
    fill_file_offsets(&sections, ctx_requests, path, rebase);
}

/// Records the file name on requests whose file cannot be read.
///
/// The requests stay otherwise unresolved, but the walker can still report
/// which file they belong to.
fn mark_unavailable(requests: &mut RequestSet, path: &Path) {
    for req in requests.iter_mut() {
        req.resolved_file.get_or_insert_with(|| path.to_path_buf());
    }
}

/// Whether this file may claim results for the request.
///
/// Once a request carries results from one file, other files must leave it
/// alone even if they happen to contain a matching symbol too.
fn claimable(req: &SymbolRequest, path: &Path) -> bool {
    req.resolved_file.as_deref().map_or(true, |f| f == path)
}

/// Translation between link-time and runtime addresses for one mapping.
///
/// Only files with a relocatable load address are actually rebased; fixed
/// position executables are loaded at their link address, so their bias
/// collapses to zero.
#[derive(Debug, Clone, Copy)]
struct Rebase {
    bias: i64,
}

impl Rebase {
    fn new(reader: &objfile::Reader<'_>, bias: i64) -> Self {
        Self {
            bias: if reader.has_relocatable_load_addr() {
                bias
            } else {
                0
            },
        }
    }

    fn to_runtime(self, link_addr: VirtAddr) -> VirtAddr {
        objfile::to_runtime_addr(link_addr, self.bias)
    }

    fn to_link(self, runtime_addr: VirtAddr) -> VirtAddr {
        objfile::to_link_addr(runtime_addr, self.bias)
    }
}

/// Names the function containing each pending address lookup.
///
/// Besides the (demangled) name this also records the runtime address of
/// the function entry point and, when line info is present, the source
/// location of the probe address.
fn resolve_addresses(requests: &mut RequestSet, funcs: &FuncMap, path: &Path, rebase: Rebase) {
    for req in requests.iter_mut() {
        if req.resolved_name.is_some() || !claimable(req, path) {
            continue;
        }
        let Some(probe_addr) = req.probe_addr() else {
            continue;
        };

        let link_addr = rebase.to_link(probe_addr);
        let Some(hit) = funcs.function_at(link_addr) else {
            continue;
        };

        req.resolved_name = Some(hit.name.to_owned());
        req.resolved_addr.get_or_insert(rebase.to_runtime(hit.entry));
        req.resolved_file.get_or_insert_with(|| path.to_path_buf());
        if req.resolved_source.is_none() {
            req.resolved_source = funcs.source_at(link_addr).map(|line| SourceLocation {
                file: line.file.clone(),
                line: line.line,
            });
        }
    }
}

/// Matches pending name lookups against the file's function symbols.
fn match_names(
    symbols: &[objfile::Symbol<'_>],
    requests: &mut RequestSet,
    path: &Path,
    rebase: Rebase,
) {
    // Exact patterns resolve in place. The symbol table order decides ties
    // between identically named symbols: the first match wins.
    for req in requests.iter_mut() {
        let RequestKind::Name(pattern) = &req.kind else {
            continue;
        };
        if pattern.is_glob() || req.resolved_addr.is_some() || !claimable(req, path) {
            continue;
        }
        let Some(sym) = symbols.iter().find(|s| s.name == pattern.text()) else {
            continue;
        };

        req.resolved_name = Some(sym.name.to_owned());
        req.resolved_addr = Some(rebase.to_runtime(sym.virt_addr));
        req.resolved_file = Some(path.to_path_buf());
    }

    // Wildcard patterns spawn a resolved child per matching symbol and are
    // themselves left untouched, so that every file gets to match them.
    let mut children = RequestSet::new();
    for req in requests.iter() {
        let RequestKind::Name(pattern) = &req.kind else {
            continue;
        };
        if !pattern.is_glob() || !claimable(req, path) {
            continue;
        }

        for sym in symbols.iter().filter(|s| pattern.matches(s.name)) {
            let addr = rebase.to_runtime(sym.virt_addr);
            if requests.contains_resolved(sym.name, addr, req.cookie)
                || children.contains_resolved(sym.name, addr, req.cookie)
            {
                continue;
            }

            children.push(SymbolRequest {
                kind: RequestKind::Name(SymbolPattern::Exact(sym.name.to_owned())),
                cookie: req.cookie,
                resolved_name: Some(sym.name.to_owned()),
                resolved_file: Some(path.to_path_buf()),
                resolved_addr: Some(addr),
                resolved_file_offset: None,
                resolved_source: None,
            });
        }
    }
    requests.extend(children);
}

/// Computes the object file offset behind each pending probe address.
///
/// The offset is what probe interfaces like uprobes expect when attaching
/// to a file rather than to live process memory.
fn fill_file_offsets(
    sections: &[objfile::CodeSection],
    requests: &mut RequestSet,
    path: &Path,
    rebase: Rebase,
) {
    for req in requests.iter_mut() {
        if req.resolved_file_offset.is_some() || !claimable(req, path) {
            continue;
        }
        let Some(probe_addr) = req.probe_addr() else {
            continue;
        };

        let link_addr = rebase.to_link(probe_addr);
        let Some(offset) = sections.iter().find_map(|s| s.file_offset_for(link_addr)) else {
            continue;
        };

        req.resolved_file_offset = Some(offset);
        req.resolved_file.get_or_insert_with(|| path.to_path_buf());
    }
}
